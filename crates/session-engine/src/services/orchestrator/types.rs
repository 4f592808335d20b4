use serde::Serialize;
use thiserror::Error;

use crate::models::{SessionId, SessionStatus};
use crate::services::conversation::{CacheStats, StatusChangeError};
use crate::services::persistence::GatewayStats;

/// Rejections raised before any session state is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("Message is empty")]
    EmptyInput,

    #[error("Message is too long: {actual} characters (max {max})")]
    InputTooLong { max: usize, actual: usize },

    #[error("Session {session_id} is {} and accepts no more turns", .status.as_str())]
    SessionClosed {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("Session {0} not found")]
    UnknownSession(SessionId),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
}

impl From<StatusChangeError> for TurnError {
    fn from(err: StatusChangeError) -> Self {
        match err {
            StatusChangeError::UnknownSession(id) => TurnError::UnknownSession(id),
            terminal @ StatusChangeError::Terminal { .. } => {
                TurnError::InvalidTransition(terminal.to_string())
            }
        }
    }
}

/// Combined engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub persistence: GatewayStats,
    pub session_locks: usize,
}
