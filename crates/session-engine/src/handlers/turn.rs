use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::debug;

use crate::models::{TurnReply, TurnRequest};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Forward one participant turn. A session id is minted when absent.
pub async fn turn_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let participant_id = request.participant_id.trim();
    if participant_id.is_empty() {
        return Err(ApiError::BadRequest("participant_id required".to_string()));
    }

    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    debug!(
        "Turn request: session={}, participant={}, scenario={}",
        session_id, participant_id, request.scenario_id
    );

    let reply = state
        .orchestrator
        .handle_turn(&session_id, participant_id, request.scenario_id, &request.message)
        .await?;

    Ok(Json(reply))
}
