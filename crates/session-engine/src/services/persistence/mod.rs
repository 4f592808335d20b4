//! Resilient persistence of session, exchange and evaluation records
//!
//! The [`PersistenceGateway`] writes through to a [`RemoteStore`] and keeps a
//! local mirror of the last attempted write per key. Remote failures are
//! masked from callers and surfaced through the `is_fallback` flag, logs and
//! [`GatewayStats`].

mod gateway;
mod metrics;
pub mod records;
pub mod store;

pub use gateway::{GatewayRecord, PersistenceGateway, ReconcileReport};
pub use metrics::{GatewayMetrics, GatewayStats};
pub use records::{
    EvaluationRecord, ExchangeRecord, Persisted, RecordKind, ReferenceKind, SessionRecord,
    WriteOutcome,
};
pub use store::{RemoteStore, StoreError};

#[cfg(test)]
pub use store::MockRemoteStore;
