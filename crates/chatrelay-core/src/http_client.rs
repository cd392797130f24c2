use std::time::Duration;

use reqwest::Client;

use crate::config::RelayConfig;
use crate::error::Result;

const DISABLE_SYSTEM_PROXY_ENV: &str = "CHATRELAY_DISABLE_SYSTEM_PROXY";

pub(crate) fn build_http_client(config: &RelayConfig) -> Result<Client> {
    let mut builder =
        Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(secs) = config.read_timeout_secs {
        builder = builder.read_timeout(Duration::from_secs(secs));
    }

    if should_disable_system_proxy() {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
