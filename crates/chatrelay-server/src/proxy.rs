use crate::error::ApiError;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chatrelay_core::{InboundRequest, RelayResponse, RelayService, RelayStream, is_hop_by_hop};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
    pub max_body_bytes: usize,
}

pub fn relay_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(relay_handler)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn relay_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path())
        .to_string();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            if exceeds_limit(&err) {
                return ApiError::payload_too_large(state.max_body_bytes).into_response();
            }
            return ApiError::bad_request(format!("Failed to read request body: {}", err))
                .into_response();
        }
    };

    let request = InboundRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    match state.service.handle(request).await {
        Ok(RelayResponse::Passthrough(response)) => passthrough_response(response),
        Ok(RelayResponse::Stream(stream)) => stream_response(stream),
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source = Some(err as &(dyn std::error::Error + 'static));
    while let Some(current) = source {
        if current.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

/// Return the upstream response as received, minus hop-by-hop headers.
fn passthrough_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = response.headers().clone();

    let mut builder = Response::builder().status(status);
    if let Some(header_map) = builder.headers_mut() {
        for (name, value) in headers.iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            header_map.append(name, value.clone());
        }
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| {
            ApiError::bad_gateway("Failed to build passthrough response").into_response()
        })
}

fn stream_response(stream: RelayStream) -> Response {
    tracing::debug!(relay_id = %stream.relay_id, "Streaming relay response");

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream.content_type())
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header("x-accel-buffering", HeaderValue::from_static("no"));

    // The pipeline task reports its own outcome; the response only needs the body.
    drop(stream.handle);
    builder
        .body(Body::from_stream(stream.body))
        .unwrap_or_else(|_| ApiError::bad_gateway("Failed to build relay response").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chatrelay_core::{OutputMode, RelayConfig};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn disable_system_proxy_for_tests() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            // Safety: set once for the process before any HTTP clients are built.
            unsafe {
                std::env::set_var("CHATRELAY_DISABLE_SYSTEM_PROXY", "1");
            }
        });
    }

    fn app(upstream: &str, mode: OutputMode, max_body_bytes: usize) -> Router {
        disable_system_proxy_for_tests();
        let service = RelayService::new(RelayConfig::new(upstream).with_output_mode(mode))
            .expect("valid relay config");
        relay_router(AppState {
            service: Arc::new(service),
            max_body_bytes,
        })
    }

    fn chat_post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .expect("valid request")
    }

    #[tokio::test]
    async fn health_returns_ok() -> anyhow::Result<()> {
        let app = app("http://127.0.0.1:9", OutputMode::Sse, 1024);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn relays_event_stream_as_sse() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                b"data: {\"id\":1}\n\ndata: {\"id\":\n\ndata: [DONE]\n\n".to_vec(),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let app = app(&server.uri(), OutputMode::Sse, 1024);
        let response = app.oneshot(chat_post("/api/chat", "{}")).await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"data: {\"id\":1}\n\ndata: [DONE]\n\n");
        Ok(())
    }

    #[tokio::test]
    async fn relays_event_stream_as_ndjson() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                b"data: {\"id\":1}\n\ndata: {\"id\":2}\n\ndata: [DONE]\n\n".to_vec(),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let app = app(&server.uri(), OutputMode::Ndjson, 1024);
        let response = app.oneshot(chat_post("/chat", "{}")).await?;

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-ndjson"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"{\"id\":1}\n{\"id\":2}\n");
        Ok(())
    }

    #[tokio::test]
    async fn passes_upstream_errors_through_verbatim() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "3")
                    .set_body_raw(b"{\"error\":\"rate limited\"}".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let app = app(&server.uri(), OutputMode::Sse, 1024);
        let response = app.oneshot(chat_post("/chat", "{}")).await?;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "3");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"{\"error\":\"rate limited\"}");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() -> anyhow::Result<()> {
        let app = app("http://127.0.0.1:9", OutputMode::Sse, 1024);
        let response = app.oneshot(chat_post("/chat", "{}")).await?;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() -> anyhow::Result<()> {
        let app = app("http://127.0.0.1:9", OutputMode::Sse, 4);
        let response = app
            .oneshot(chat_post("/chat", "{\"messages\":[]}"))
            .await?;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        Ok(())
    }
}
