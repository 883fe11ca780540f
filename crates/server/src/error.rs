use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use coedit_common::protocol::ws::AckBody;
use serde_json::{json, Value};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Machine-readable failure codes shared by HTTP responses, ack
/// rejections and channel error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    InvalidMessage,
    Forbidden,
    ReadOnly,
    NotJoined,
    NotFound,
    UpgradeRequired,
    StorageFailed,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::Forbidden => "FORBIDDEN",
            Self::ReadOnly => "READ_ONLY",
            Self::NotJoined => "NOT_JOINED",
            Self::NotFound => "NOT_FOUND",
            Self::UpgradeRequired => "UPGRADE_REQUIRED",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::InvalidMessage => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ReadOnly => StatusCode::FORBIDDEN,
            Self::NotJoined => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            Self::StorageFailed => StatusCode::BAD_GATEWAY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::StorageFailed | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::InvalidMessage => "invalid channel frame payload",
            Self::Forbidden => "caller lacks access to the document",
            Self::ReadOnly => "caller has read-only access to the document",
            Self::NotJoined => "caller has not joined the document",
            Self::NotFound => "requested resource not found",
            Self::UpgradeRequired => "client protocol version is not supported",
            Self::StorageFailed => "document storage is unavailable",
            Self::InternalError => "internal server error",
        }
    }

    /// Rejected acknowledgement carrying this code.
    pub fn reject(self, reason: impl Into<String>) -> AckBody {
        AckBody::rejected(self.as_str(), reason)
    }

    /// Rejected acknowledgement with the default message.
    pub fn reject_default(self) -> AckBody {
        self.reject(self.default_message())
    }
}

/// HTTP error envelope. The request id comes from the surrounding
/// request scope.
#[derive(Debug, Clone)]
pub struct ServerError {
    code: ErrorCode,
    message: String,
    details: Value,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}) }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn details(&self) -> &Value {
        &self.details
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::{with_request_id_scope, ErrorCode, ServerError};

    #[tokio::test]
    async fn server_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            ServerError::from_code(ErrorCode::StorageFailed).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");

        assert_eq!(parsed["error"]["code"], "STORAGE_FAILED");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
        assert_eq!(parsed["error"]["details"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn request_id_header_follows_scope() {
        let response = with_request_id_scope("req-scoped-456".to_owned(), async {
            ServerError::from_code(ErrorCode::Forbidden).into_response()
        })
        .await;

        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-scoped-456")
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn details_are_rendered_in_the_envelope() {
        let response = ServerError::new(ErrorCode::ValidationFailed, "bad payload")
            .with_details(serde_json::json!({ "field": "documentId" }))
            .into_response();
        assert!(response.headers().get("x-request-id").is_none());
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["details"]["field"], "documentId");
        assert_eq!(parsed["error"]["message"], "bad payload");
        assert_eq!(parsed["error"]["request_id"], Value::Null);
    }

    #[test]
    fn rejection_acks_carry_code_and_reason() {
        let body = ErrorCode::ReadOnly.reject_default();
        assert!(!body.ok);
        assert_eq!(body.code.as_deref(), Some("READ_ONLY"));
        assert_eq!(body.reason.as_deref(), Some("caller has read-only access to the document"));
    }
}
