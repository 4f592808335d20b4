use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::records::{EvaluationRecord, ExchangeRecord, ReferenceKind, SessionRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Remote store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Referenced {kind} '{key}' does not exist")]
    MissingReference { kind: &'static str, key: String },

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected row data: {0}")]
    Decode(String),

    #[error("{kind} '{key}' already holds different content")]
    Conflict { kind: &'static str, key: String },
}

/// Record-oriented access to the system of record. Not-found is `Ok(None)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or update by external session id, returning the stored row
    async fn upsert_session(&self, record: &SessionRecord) -> Result<SessionRecord, StoreError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Insert an exchange. Replaying identical content is a no-op; a turn
    /// that already holds other content is a `Conflict`.
    async fn upsert_exchange(&self, record: &ExchangeRecord) -> Result<ExchangeRecord, StoreError>;

    async fn find_exchange(
        &self,
        session_id: &str,
        turn_index: i32,
    ) -> Result<Option<ExchangeRecord>, StoreError>;

    /// One past the highest stored turn index, 0 for a session without exchanges
    async fn next_turn_index(&self, session_id: &str) -> Result<i32, StoreError>;

    async fn upsert_evaluation(
        &self,
        record: &EvaluationRecord,
    ) -> Result<EvaluationRecord, StoreError>;

    async fn find_evaluation(
        &self,
        session_id: &str,
    ) -> Result<Option<EvaluationRecord>, StoreError>;

    /// Create the referenced entity if missing
    async fn ensure_reference(
        &self,
        kind: ReferenceKind,
        natural_key: &str,
    ) -> Result<(), StoreError>;
}
