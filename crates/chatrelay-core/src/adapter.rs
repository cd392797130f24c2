//! Outbound request rewriting and the upstream HTTP call.

use bytes::Bytes;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderMap, HeaderValue,
};
use reqwest::{Client, Method, Response, Url};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::termination::UpstreamBody;

/// Path the rewritten chat requests are sent to.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

static CHAT_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/chat(/|$)").expect("Invalid regex"));

/// The request as the caller issued it.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The request actually sent upstream. Built by [`RequestAdapter::prepare`].
#[derive(Debug)]
pub struct UpstreamRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl UpstreamRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Rewrite the first `/chat` or `/chat/` segment of `path` to the chat
/// completions path, keeping whatever follows it. Returns `None` when the path
/// does not match or already targets the completions endpoint.
pub fn rewrite_chat_path(path: &str) -> Option<String> {
    if path.contains(CHAT_COMPLETIONS_PATH) || !CHAT_SEGMENT.is_match(path) {
        return None;
    }
    let replacement = format!("{}$1", CHAT_COMPLETIONS_PATH);
    Some(CHAT_SEGMENT.replace(path, replacement.as_str()).into_owned())
}

/// Headers that only apply to a single connection.
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Drops connection-level headers and `accept-encoding`. The client does not
/// decompress, so the upstream must answer with an identity-encoded body.
fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str())
            || name == HOST
            || name == CONTENT_LENGTH
            || name == ACCEPT_ENCODING
        {
            continue;
        }
        filtered.append(name, value.clone());
    }
    filtered
}

/// Whether a response should go through the streaming relay rather than be
/// passed through untouched.
pub fn should_relay(response: &Response) -> bool {
    if !response.status().is_success() || response.content_length() == Some(0) {
        return false;
    }
    is_event_stream(response.headers())
}

pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Turn a response body into the stream consumed by the relay.
pub fn upstream_body(response: Response) -> UpstreamBody {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(RelayError::from_body_error))
        .boxed()
}

/// Rewrites outbound requests and performs the upstream call.
#[derive(Clone)]
pub struct RequestAdapter {
    client: Client,
    api_key: Option<String>,
}

impl RequestAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_key: None,
        }
    }

    /// Bearer token sent when the caller did not supply `Authorization`.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn prepare(&self, descriptor: RequestDescriptor) -> Result<UpstreamRequest> {
        let mut url = Url::parse(&descriptor.url)?;
        if let Some(path) = rewrite_chat_path(url.path()) {
            debug!(from = url.path(), to = %path, "Rewrote upstream path");
            url.set_path(&path);
        }

        let mut headers = filter_request_headers(&descriptor.headers);
        if !headers.contains_key(AUTHORIZATION)
            && let Some(api_key) = &self.api_key
        {
            let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|err| RelayError::Config(format!("Invalid upstream API key: {}", err)))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(UpstreamRequest {
            method: descriptor.method,
            url,
            headers,
            body: descriptor.body,
        })
    }

    /// Send the request. Non-2xx statuses are logged and returned as-is.
    pub async fn send(&self, request: UpstreamRequest) -> Result<Response> {
        let UpstreamRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            warn!(
                status = response.status().as_u16(),
                url = %url,
                "Upstream returned non-success status"
            );
        }
        Ok(response)
    }
}
