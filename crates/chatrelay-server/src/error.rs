use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chatrelay_core::RelayError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {} bytes", limit),
        )
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        tracing::error!(error = %err, "Relay request failed");
        match err {
            RelayError::InvalidUrl(_) | RelayError::Config(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            RelayError::Timeout(_) => Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            RelayError::Transport(ref inner) if inner.is_timeout() => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
            _ => Self::bad_gateway(format!("Failed to reach upstream: {}", err)),
        }
    }
}
