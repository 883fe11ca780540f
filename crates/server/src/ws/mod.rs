// Document channel: one WebSocket per (client, document).

mod handler;
pub mod protocol;

use axum::{routing::get, Router};

use crate::app::AppState;
use crate::store::DocumentStore;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 262_144;

pub fn router<S: DocumentStore>(state: AppState<S>) -> Router {
    Router::new().route("/v1/ws/{document_id}", get(handler::ws_upgrade::<S>)).with_state(state)
}
