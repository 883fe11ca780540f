// HTTP surface next to the channel: the participant listing clients
// refresh after presence changes.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use coedit_common::protocol::payload::ParticipantsResponse;
use serde_json::json;

use crate::app::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::store::DocumentStore;

pub fn router<S: DocumentStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/v1/documents/{document_id}/participants", get(list_participants::<S>))
        .with_state(state)
}

async fn list_participants<S: DocumentStore>(
    Path(document_id): Path<String>,
    State(state): State<AppState<S>>,
) -> Result<Json<ParticipantsResponse>, ServerError> {
    if document_id.trim().is_empty() {
        return Err(ServerError::new(ErrorCode::ValidationFailed, "document id is required")
            .with_details(json!({ "field": "documentId" })));
    }
    let participants = state.rooms.participants(&document_id).await;
    Ok(Json(ParticipantsResponse { document_id, participants }))
}
