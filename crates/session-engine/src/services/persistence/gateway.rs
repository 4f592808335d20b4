use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as KeyMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::metrics::{GatewayMetrics, GatewayStats};
use super::records::{
    EvaluationRecord, ExchangeRecord, Persisted, RecordKind, ReferenceKind, SessionRecord,
    WriteOutcome,
};
use super::store::{RemoteStore, StoreError};

/// Last attempted write per key, one map per record kind
#[derive(Default)]
pub struct FallbackMirrors {
    sessions: DashMap<String, Persisted<SessionRecord>>,
    exchanges: DashMap<String, Persisted<ExchangeRecord>>,
    evaluations: DashMap<String, Persisted<EvaluationRecord>>,
}

/// A record kind the gateway knows how to write, read and mirror
#[async_trait]
pub trait GatewayRecord: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn key(&self) -> String;

    async fn upsert(store: &dyn RemoteStore, record: &Self) -> Result<Self, StoreError>;

    async fn fetch(store: &dyn RemoteStore, key: &str) -> Result<Option<Self>, StoreError>;

    fn mirror(mirrors: &FallbackMirrors) -> &DashMap<String, Persisted<Self>>;
}

#[async_trait]
impl GatewayRecord for SessionRecord {
    const KIND: RecordKind = RecordKind::Session;

    fn key(&self) -> String {
        self.session_id.clone()
    }

    async fn upsert(store: &dyn RemoteStore, record: &Self) -> Result<Self, StoreError> {
        store.upsert_session(record).await
    }

    async fn fetch(store: &dyn RemoteStore, key: &str) -> Result<Option<Self>, StoreError> {
        store.find_session(key).await
    }

    fn mirror(mirrors: &FallbackMirrors) -> &DashMap<String, Persisted<Self>> {
        &mirrors.sessions
    }
}

#[async_trait]
impl GatewayRecord for ExchangeRecord {
    const KIND: RecordKind = RecordKind::Exchange;

    fn key(&self) -> String {
        ExchangeRecord::key_for(&self.session_id, self.turn_index)
    }

    async fn upsert(store: &dyn RemoteStore, record: &Self) -> Result<Self, StoreError> {
        store.upsert_exchange(record).await
    }

    async fn fetch(store: &dyn RemoteStore, key: &str) -> Result<Option<Self>, StoreError> {
        let (session_id, turn_index) =
            ExchangeRecord::parse_key(key).ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        store.find_exchange(session_id, turn_index).await
    }

    fn mirror(mirrors: &FallbackMirrors) -> &DashMap<String, Persisted<Self>> {
        &mirrors.exchanges
    }
}

#[async_trait]
impl GatewayRecord for EvaluationRecord {
    const KIND: RecordKind = RecordKind::Evaluation;

    fn key(&self) -> String {
        self.session_id.clone()
    }

    async fn upsert(store: &dyn RemoteStore, record: &Self) -> Result<Self, StoreError> {
        store.upsert_evaluation(record).await
    }

    async fn fetch(store: &dyn RemoteStore, key: &str) -> Result<Option<Self>, StoreError> {
        store.find_evaluation(key).await
    }

    fn mirror(mirrors: &FallbackMirrors) -> &DashMap<String, Persisted<Self>> {
        &mirrors.evaluations
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub reconciled: usize,
}

/// Write-through / read-through wrapper around the remote store.
///
/// Every write lands in the local mirror whether or not the remote store
/// accepted it, so the mirror always holds the most recent attempt for a
/// key. Remote failures never propagate to the caller.
///
/// Fallback-only entries are lost on process restart unless a
/// reconciliation pass replays them first. Writes and replays of the same key
/// are serialized, so a replay never lands after a newer write.
pub struct PersistenceGateway {
    store: Arc<dyn RemoteStore>,
    mirrors: FallbackMirrors,
    key_locks: DashMap<(RecordKind, String), Arc<KeyMutex<()>>>,
    ensured: Mutex<HashSet<(ReferenceKind, String)>>,
    timeout: Duration,
    metrics: GatewayMetrics,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        info!("Initializing persistence gateway: remote timeout={:?}", timeout);
        Self {
            store,
            mirrors: FallbackMirrors::default(),
            key_locks: DashMap::new(),
            ensured: Mutex::new(HashSet::new()),
            timeout,
            metrics: GatewayMetrics::default(),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Run `fut` while holding the lock of one record key
    async fn serialized<T, F>(&self, kind: RecordKind, key: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock_key = (kind, key.to_string());
        let lock = Arc::clone(self.key_locks.entry(lock_key.clone()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            fut.await
        };
        drop(lock);
        self.key_locks.remove_if(&lock_key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Upsert into the remote store and mirror the attempt locally.
    /// `committed` is false when only the mirror holds the record.
    pub async fn write<R: GatewayRecord>(&self, record: R) -> WriteOutcome<R> {
        let key = record.key();
        self.serialized(R::KIND, &key, self.write_unlocked(key.clone(), record))
            .await
    }

    async fn write_unlocked<R: GatewayRecord>(&self, key: String, record: R) -> WriteOutcome<R> {
        match self.bounded(R::upsert(self.store.as_ref(), &record)).await {
            Ok(stored) => {
                let persisted = Persisted::confirmed(stored);
                R::mirror(&self.mirrors).insert(key.clone(), persisted.clone());
                self.metrics.inc_remote_write();
                debug!(kind = %R::KIND, key = %key, "Record written to remote store");
                WriteOutcome {
                    committed: true,
                    record: persisted,
                }
            }
            Err(e) => {
                let persisted = Persisted::fallback(record);
                R::mirror(&self.mirrors).insert(key.clone(), persisted.clone());
                self.metrics.inc_fallback_write();
                warn!(
                    kind = %R::KIND,
                    key = %key,
                    operation = "write",
                    error = %e,
                    "Remote write failed, record kept in fallback mirror"
                );
                WriteOutcome {
                    committed: false,
                    record: persisted,
                }
            }
        }
    }

    /// Remote lookup with the mirror as fallback. A pending fallback entry
    /// is newer than anything the remote store holds and wins over it.
    pub async fn read<R: GatewayRecord>(&self, key: &str) -> Option<Persisted<R>> {
        let mirror = R::mirror(&self.mirrors);

        if let Some(pending) = mirror.get(key).filter(|p| p.is_fallback) {
            self.metrics.inc_fallback_read();
            debug!(kind = %R::KIND, key = %key, "Serving pending fallback record");
            return Some(pending.value().clone());
        }

        match self.bounded(R::fetch(self.store.as_ref(), key)).await {
            Ok(Some(found)) => {
                let persisted = Persisted::confirmed(found);
                mirror.insert(key.to_string(), persisted.clone());
                self.metrics.inc_remote_read();
                Some(persisted)
            }
            Ok(None) => {
                debug!(kind = %R::KIND, key = %key, "Not found in remote store, checking mirror");
                self.mirror_lookup::<R>(key)
            }
            Err(e) => {
                warn!(
                    kind = %R::KIND,
                    key = %key,
                    operation = "read",
                    error = %e,
                    "Remote read failed, serving from fallback mirror"
                );
                self.mirror_lookup::<R>(key)
            }
        }
    }

    fn mirror_lookup<R: GatewayRecord>(&self, key: &str) -> Option<Persisted<R>> {
        let found = R::mirror(&self.mirrors).get(key).map(|p| p.value().clone());
        if found.is_some() {
            self.metrics.inc_fallback_read();
        }
        found
    }

    /// Best-effort creation of a referenced entity, attempted at most once
    /// per key for the life of the process. Returns whether an attempt was made.
    pub async fn ensure_reference_exists(&self, kind: ReferenceKind, natural_key: &str) -> bool {
        let first_attempt = self
            .ensured
            .lock()
            .insert((kind, natural_key.to_string()));
        if !first_attempt {
            return false;
        }

        match self
            .bounded(self.store.ensure_reference(kind, natural_key))
            .await
        {
            Ok(()) => debug!(reference = kind.as_str(), key = %natural_key, "Reference ensured"),
            Err(e) => {
                self.metrics.inc_reference_failure();
                warn!(
                    reference = kind.as_str(),
                    key = %natural_key,
                    operation = "ensure_reference",
                    error = %e,
                    "Failed to ensure referenced entity"
                );
            }
        }
        true
    }

    /// Replay every fallback-only entry into the remote store
    pub async fn reconcile_fallbacks(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        // sessions first so dependent rows find their foreign key
        self.reconcile_kind::<SessionRecord>(&mut report).await;
        self.reconcile_kind::<ExchangeRecord>(&mut report).await;
        self.reconcile_kind::<EvaluationRecord>(&mut report).await;

        if report.attempted > 0 {
            self.metrics.inc_reconciled(report.reconciled as u64);
            info!(
                "Reconciled {}/{} fallback records, {} still pending",
                report.reconciled,
                report.attempted,
                self.pending_fallbacks()
            );
        }
        report
    }

    async fn reconcile_kind<R: GatewayRecord>(&self, report: &mut ReconcileReport) {
        let mirror = R::mirror(&self.mirrors);
        let pending: Vec<(String, Persisted<R>)> = mirror
            .iter()
            .filter(|e| e.is_fallback)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, snapshot) in pending {
            match self.serialized(R::KIND, &key, self.replay(&key, &snapshot)).await {
                Some(true) => {
                    report.attempted += 1;
                    report.reconciled += 1;
                }
                Some(false) => report.attempted += 1,
                None => {}
            }
        }
    }

    /// Upsert a pending snapshot if it is still the mirror's latest entry.
    /// `None` when a newer write replaced it, otherwise whether the store took it.
    /// Callers hold the key lock.
    async fn replay<R: GatewayRecord>(&self, key: &str, snapshot: &Persisted<R>) -> Option<bool> {
        let mirror = R::mirror(&self.mirrors);
        let current = mirror
            .get(key)
            .is_some_and(|p| p.is_fallback && p.written_at == snapshot.written_at);
        if !current {
            debug!(kind = %R::KIND, key = %key, "Skipping superseded fallback snapshot");
            return None;
        }

        match self.bounded(R::upsert(self.store.as_ref(), &snapshot.record)).await {
            Ok(stored) => {
                mirror.insert(key.to_string(), Persisted::confirmed(stored));
                Some(true)
            }
            Err(e) => {
                debug!(kind = %R::KIND, key = %key, error = %e, "Reconciliation attempt failed");
                Some(false)
            }
        }
    }

    /// Turn index for the next exchange of a session: one past the highest
    /// index known to the remote store or the mirror
    pub async fn next_turn_index(&self, session_id: &str) -> i32 {
        let mirrored = self
            .mirrors
            .exchanges
            .iter()
            .filter(|e| e.record.session_id == session_id)
            .map(|e| e.record.turn_index.saturating_add(1))
            .max()
            .unwrap_or(0);

        match self.bounded(self.store.next_turn_index(session_id)).await {
            Ok(stored) => stored.max(mirrored),
            Err(e) => {
                warn!(
                    kind = %RecordKind::Exchange,
                    key = %session_id,
                    operation = "next_turn_index",
                    error = %e,
                    "Remote turn count unavailable, using fallback mirror"
                );
                mirrored
            }
        }
    }

    /// Run `reconcile_fallbacks` on a fixed interval until the handle is aborted
    pub fn spawn_reconciler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if gateway.pending_fallbacks() > 0 {
                    gateway.reconcile_fallbacks().await;
                }
            }
        })
    }

    /// Mirror entries not confirmed by the remote store
    pub fn pending_fallbacks(&self) -> usize {
        self.mirrors.sessions.iter().filter(|e| e.is_fallback).count()
            + self.mirrors.exchanges.iter().filter(|e| e.is_fallback).count()
            + self.mirrors.evaluations.iter().filter(|e| e.is_fallback).count()
    }

    pub fn stats(&self) -> GatewayStats {
        self.metrics.snapshot(self.pending_fallbacks())
    }
}
