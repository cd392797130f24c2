//! Per-request entry point: send upstream, then either pass the response
//! through or relay it.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::adapter::{RequestAdapter, RequestDescriptor, should_relay, upstream_body};
use crate::config::RelayConfig;
use crate::encoder::OutputMode;
use crate::error::Result;
use crate::http_client::build_http_client;
use crate::pipeline::{RelayOutcome, RelayPipeline};
use crate::sink::{DownstreamStream, channel_sink};

/// An inbound request, addressed relative to the upstream base URL.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path plus optional query, e.g. `/api/chat?stream=true`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub enum RelayResponse {
    /// Upstream response returned unmodified.
    Passthrough(Response),
    Stream(RelayStream),
}

/// A relay running in the background and the stream it writes to.
pub struct RelayStream {
    pub relay_id: Uuid,
    pub mode: OutputMode,
    pub body: DownstreamStream,
    pub handle: JoinHandle<RelayOutcome>,
}

impl RelayStream {
    pub fn content_type(&self) -> &'static str {
        self.mode.content_type()
    }
}

pub struct RelayService {
    adapter: RequestAdapter,
    config: RelayConfig,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let client = build_http_client(&config)?;
        let adapter = RequestAdapter::new(client).with_api_key(config.upstream_api_key.clone());
        Ok(Self { adapter, config })
    }

    /// Full upstream URL for an inbound path, before any rewriting.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        let base = self.config.upstream_base_url.trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{}{}", base, path_and_query)
        } else {
            format!("{}/{}", base, path_and_query)
        }
    }

    /// Send the request upstream and decide, once, how to answer it.
    pub async fn handle(&self, request: InboundRequest) -> Result<RelayResponse> {
        let descriptor = RequestDescriptor {
            method: request.method,
            url: self.upstream_url(&request.path_and_query),
            headers: request.headers,
            body: request.body,
        };
        let upstream_request = self.adapter.prepare(descriptor)?;
        let response = self.adapter.send(upstream_request).await?;

        if !should_relay(&response) {
            debug!(
                status = response.status().as_u16(),
                "Passing upstream response through"
            );
            return Ok(RelayResponse::Passthrough(response));
        }

        Ok(RelayResponse::Stream(self.spawn_relay(response)))
    }

    fn spawn_relay(&self, response: Response) -> RelayStream {
        let relay_id = Uuid::new_v4();
        let mode = self.config.output_mode;
        let (sink, body) = channel_sink(self.config.downstream_buffer);
        let pipeline = RelayPipeline::new(upstream_body(response), sink, mode);

        let span = info_span!("relay", relay_id = %relay_id, mode = %mode);
        let handle = tokio::spawn(pipeline.run().instrument(span));

        RelayStream {
            relay_id,
            mode,
            body,
            handle,
        }
    }
}
