use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{SessionId, SessionStatus};
use crate::services::persistence::{EvaluationRecord, SessionRecord, WriteOutcome};
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub ended_at: Option<DateTime<Utc>>,
    /// False when only the local fallback mirror holds the change
    pub committed: bool,
}

impl From<WriteOutcome<SessionRecord>> for SessionStatusResponse {
    fn from(outcome: WriteOutcome<SessionRecord>) -> Self {
        let record = outcome.record.record;
        Self {
            session_id: record.session_id,
            status: record.status,
            ended_at: record.ended_at,
            committed: outcome.committed,
        }
    }
}

pub async fn complete_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let outcome = state.orchestrator.complete_session(&session_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let outcome = state.orchestrator.cancel_session(&session_id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationRequest {
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationResponse {
    pub session_id: SessionId,
    pub overall_score: f64,
    pub committed: bool,
}

pub async fn evaluation_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<EvaluationRequest>,
) -> Result<Json<EvaluationResponse>, ApiError> {
    let scores_valid = request.overall_score.is_finite()
        && request.scores.values().all(|score| score.is_finite());
    if !scores_valid {
        return Err(ApiError::BadRequest("scores must be finite numbers".to_string()));
    }

    let evaluation = EvaluationRecord {
        session_id,
        scores: request.scores,
        overall_score: request.overall_score,
        strengths: request.strengths,
        improvements: request.improvements,
        created_at: Utc::now(),
    };

    let outcome = state.orchestrator.record_evaluation(evaluation).await?;
    let record = outcome.record.record;

    Ok(Json(EvaluationResponse {
        session_id: record.session_id,
        overall_score: record.overall_score,
        committed: outcome.committed,
    }))
}
