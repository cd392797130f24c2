use chatrelay_core::{OutputMode, RelayConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    upstream: UpstreamSection,
    #[serde(default)]
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamSection {
    url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
    #[serde(default)]
    read_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputSection {
    #[serde(default)]
    mode: OutputMode,
    #[serde(default)]
    downstream_buffer: Option<usize>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Ok(file_config);
        }

        Self::from_env()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_env() -> anyhow::Result<Self> {
        let host = env::var("CHATRELAY_HOST").unwrap_or_else(|_| default_host());
        let port = env::var("CHATRELAY_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let max_body_bytes = env::var("CHATRELAY_MAX_BODY_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or_else(default_max_body_bytes);
        let relay = RelayConfig::from_env()?;

        Ok(Self {
            host,
            port,
            max_body_bytes,
            relay,
        })
    }
}

impl FileConfig {
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut relay = RelayConfig::new(self.upstream.url).with_output_mode(self.output.mode);
        relay.upstream_api_key = self.upstream.api_key.filter(|key| !key.trim().is_empty());
        if let Some(secs) = self.upstream.connect_timeout_secs {
            relay.connect_timeout_secs = secs;
        }
        relay.read_timeout_secs = self.upstream.read_timeout_secs;
        if let Some(capacity) = self.output.downstream_buffer {
            relay.downstream_buffer = capacity;
        }
        relay.validate()?;

        Ok(ServerConfig {
            host: self.server.host,
            port: self.server.port,
            max_body_bytes: self.server.max_body_bytes,
            relay,
        })
    }
}

fn parse_file_config(contents: &str) -> anyhow::Result<ServerConfig> {
    let parsed: FileConfig = toml::from_str(contents)?;
    parsed.into_server_config()
}

fn load_from_file() -> anyhow::Result<Option<ServerConfig>> {
    let config_path = env::var("CHATRELAY_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        Some(DEFAULT_CONFIG_FILE.to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let config = parse_file_config(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(config))
}
