// Shared server state, router assembly and request middleware.

use std::{sync::Arc, time::Duration, time::Instant};

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::autosave::AutosaveCoordinator;
use crate::cors::cors_layer;
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::events::EventBus;
use crate::rooms::RoomRegistry;
use crate::store::DocumentStore;
use crate::{api, ws};

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

pub struct AppState<S> {
    pub rooms: RoomRegistry,
    pub store: Arc<S>,
    pub autosave: AutosaveCoordinator<S>,
    pub events: EventBus,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            rooms: self.rooms.clone(),
            store: Arc::clone(&self.store),
            autosave: self.autosave.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: DocumentStore> AppState<S> {
    pub fn new(store: Arc<S>, autosave_quiet: Duration) -> Self {
        let events = EventBus::new();
        let autosave = AutosaveCoordinator::new(Arc::clone(&store), events.clone(), autosave_quiet);
        Self { rooms: RoomRegistry::new(), store, autosave, events }
    }
}

pub fn build_router<S: DocumentStore>(state: AppState<S>, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(state.clone()))
            .merge(api::router(state)),
    )
    .layer(cors_layer(cors_origins))
}

pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use coedit_common::protocol::payload::ParticipantsResponse;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, AppState, MAX_REQUEST_BODY_BYTES};
    use crate::store::MemoryDocumentStore;

    fn test_router() -> Router {
        let state = AppState::new(Arc::new(MemoryDocumentStore::new()), Duration::from_secs(5));
        build_router(state, None)
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-from-client")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-from-client")
        );
    }

    #[tokio::test]
    async fn participants_of_an_idle_document_are_empty() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/documents/D1/participants")
                    .body(Body::empty())
                    .expect("participants request should build"),
            )
            .await
            .expect("participants request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        let parsed: ParticipantsResponse =
            serde_json::from_slice(&body).expect("body should be a participants response");
        assert_eq!(parsed.document_id, "D1");
        assert!(parsed.participants.is_empty());
    }

    #[tokio::test]
    async fn unsupported_protocol_version_is_refused_before_upgrade() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/ws/D1?protocol=coedit-collab.v0")
                    .body(Body::empty())
                    .expect("upgrade request should build"),
            )
            .await
            .expect("upgrade request should return a response");

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["error"]["code"], "UPGRADE_REQUIRED");
        assert_eq!(parsed["error"]["details"]["requested"], "coedit-collab.v0");
        assert!(parsed["error"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn blank_document_id_is_a_validation_error() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/documents/%20/participants")
                    .body(Body::empty())
                    .expect("participants request should build"),
            )
            .await
            .expect("participants request should return a response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(parsed["error"]["details"]["field"], "documentId");
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
