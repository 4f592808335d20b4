use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{ScenarioConfig, ScenarioProvider, SessionConfig};
use crate::models::{
    Addressing, ConversationMessage, ParticipantRole, SessionId, SessionStatus, TurnReply,
};
use crate::services::conversation::{
    ConversationCache, ConversationContext, SessionEntry, StatusChangeError, TopicExtractor,
};
use crate::services::emotion::EmotionalStateEngine;
use crate::services::llm_service::{GenerationProvider, GenerationRequest};
use crate::services::persistence::{
    EvaluationRecord, ExchangeRecord, GatewayRecord, PersistenceGateway, ReferenceKind,
    SessionRecord, WriteOutcome,
};

use super::types::{EngineStats, TurnError};

/// Sequences cache, emotional engine, generation and persistence for each
/// participant turn.
///
/// Turns for the same session are serialized by a per-session async mutex.
/// Everything after input validation is masked: the caller always receives a
/// well-formed reply.
pub struct SessionOrchestrator {
    cache: ConversationCache,
    gateway: Arc<PersistenceGateway>,
    generator: Arc<dyn GenerationProvider>,
    scenarios: Arc<dyn ScenarioProvider>,
    session: SessionConfig,
    generation_timeout: Duration,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionOrchestrator {
    pub fn new(
        cache: ConversationCache,
        gateway: Arc<PersistenceGateway>,
        generator: Arc<dyn GenerationProvider>,
        scenarios: Arc<dyn ScenarioProvider>,
        session: SessionConfig,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            gateway,
            generator,
            scenarios,
            session,
            generation_timeout,
            session_locks: DashMap::new(),
        }
    }

    /// Process one participant turn and produce the actor's reply
    pub async fn handle_turn(
        &self,
        session_id: &str,
        participant_id: &str,
        scenario_id: i32,
        text: &str,
    ) -> Result<TurnReply, TurnError> {
        let text = self.validate_input(text)?;

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        match self.cache.get(session_id) {
            Some(entry) if entry.status.is_terminal() => {
                return Err(TurnError::SessionClosed {
                    session_id: session_id.to_string(),
                    status: entry.status,
                });
            }
            Some(_) => {}
            None => self.resume_session(session_id).await?,
        }

        match self.run_turn(session_id, participant_id, scenario_id, text).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                error!("Turn for session {} failed, replying with fallback: {:#}", session_id, e);
                Ok(self.fallback_reply(session_id))
            }
        }
    }

    /// Rebuild the cache entry of a session that was evicted but is still
    /// known to the gateway. Closed sessions stay closed and turn indexes
    /// continue after the stored ones.
    async fn resume_session(&self, session_id: &str) -> Result<(), TurnError> {
        let Some(stored) = self.gateway.read::<SessionRecord>(session_id).await else {
            return Ok(());
        };
        let record = stored.record;

        if record.status.is_terminal() {
            return Err(TurnError::SessionClosed {
                session_id: session_id.to_string(),
                status: record.status,
            });
        }

        let next_turn = self.gateway.next_turn_index(session_id).await;
        let mut entry = SessionEntry::new(
            record.session_id,
            record.participant_id,
            record.scenario_id,
            None,
            self.cache.history_limit(),
        );
        entry.started_at = record.started_at;
        entry.metadata.resumed_at_turn = Some(next_turn);
        self.cache.restore(entry);

        info!("Session {} resumed from stored record at turn {}", session_id, next_turn);
        Ok(())
    }

    fn validate_input<'a>(&self, text: &'a str) -> Result<&'a str, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        let length = text.graphemes(true).count();
        if length > self.session.max_input_chars {
            return Err(TurnError::InputTooLong {
                max: self.session.max_input_chars,
                actual: length,
            });
        }
        Ok(text)
    }

    async fn run_turn(
        &self,
        session_id: &str,
        participant_id: &str,
        scenario_id: i32,
        text: &str,
    ) -> Result<TurnReply> {
        let entry = self.cache.initialize(session_id, participant_id, scenario_id, None);
        let scenario = self.resolve_scenario(entry.scenario_id).await;

        if scenario.tracks_emotion() && entry.emotional_state.is_none() {
            let state = EmotionalStateEngine::initialize(&scenario)?;
            debug!("Session {} starts at agitation {}", session_id, state.level);
            self.cache.update_emotional_state(session_id, state);
        }

        let detected = ConversationCache::detect_role(text);
        let role = if detected.is_known() {
            self.cache.set_detected_role(session_id, detected)
        } else {
            entry.detected_role
        };

        if scenario.tracks_emotion() {
            if let Some(state) = self.cache.get_emotional_state(session_id).filter(|s| s.enabled) {
                let analysis = EmotionalStateEngine::analyze(text, &scenario)?;
                let next = EmotionalStateEngine::transition(&state, &analysis, &scenario)?;
                debug!(
                    "Session {}: score {} ({}), agitation {} -> {}",
                    session_id,
                    analysis.total,
                    if analysis.is_adaptive { "adaptive" } else { "not adaptive" },
                    state.level,
                    next.level
                );
                self.cache.update_emotional_state(session_id, next);
            }
        }

        let context = self.cache.get_context(session_id);
        let request = GenerationRequest {
            system_directive: Self::system_directive(&scenario, role, &context),
            history: context.recent_messages,
            user_turn: text.to_string(),
        };

        let (reply, degraded) = match self.generate(&request).await {
            Some(reply) => (reply, false),
            None => (self.session.fallback_utterance.clone(), true),
        };

        let participant_message = ConversationMessage::participant(text, TopicExtractor::extract(text));
        let actor_message = ConversationMessage::actor(&reply);
        self.cache.push_message(session_id, participant_message.clone());
        self.cache.push_message(session_id, actor_message.clone());

        let exchange = ExchangeRecord {
            session_id: session_id.to_string(),
            turn_index: entry.next_turn_index(),
            messages: vec![participant_message, actor_message],
        };
        let session_start = entry.is_fresh().then(|| session_record(&entry));
        self.persist_in_background(session_start, exchange);

        let emotional_summary = self
            .cache
            .get_emotional_state(session_id)
            .and_then(|state| EmotionalStateEngine::summary(&state, &scenario));
        if let Some(summary) = &emotional_summary {
            info!("Session {} turn complete: {}", session_id, summary);
        }

        Ok(TurnReply {
            session_id: session_id.to_string(),
            reply,
            addressing: Addressing::for_role(role),
            emotional_summary,
            degraded,
        })
    }

    async fn resolve_scenario(&self, scenario_id: i32) -> ScenarioConfig {
        match self.scenarios.scenario(scenario_id).await {
            Some(scenario) => scenario,
            None => {
                debug!("Scenario {} has no configuration, tracking disabled", scenario_id);
                ScenarioConfig::untracked(scenario_id)
            }
        }
    }

    /// Persona, addressing, behavioral directives and topics already covered
    fn system_directive(
        scenario: &ScenarioConfig,
        role: ParticipantRole,
        context: &ConversationContext,
    ) -> String {
        let mut sections = vec![scenario.persona.trim().to_string()];

        sections.push(if role.is_known() {
            format!(
                "INTERLOCUTEUR : {}. Adressez-vous à lui en disant « {} ».",
                role.as_str(),
                role.form_of_address()
            )
        } else {
            "INTERLOCUTEUR : il ne s'est pas encore présenté. Vouvoyez-le.".to_string()
        });

        if let Some(state) = context.emotional_state.as_ref().filter(|s| s.enabled) {
            let directives = EmotionalStateEngine::behavioral_directives(state.level, scenario);
            if !directives.is_empty() {
                sections.push(directives);
            }
        }

        if !context.topics_summary.is_empty() {
            sections.push(context.topics_summary.clone());
        }

        sections.join("\n\n")
    }

    /// Bounded generation call. `None` means the fallback utterance applies.
    async fn generate(&self, request: &GenerationRequest) -> Option<String> {
        match tokio::time::timeout(self.generation_timeout, self.generator.generate(request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(Ok(_)) => {
                warn!("Generation returned an empty reply, using fallback utterance");
                None
            }
            Ok(Err(e)) => {
                warn!("Generation failed, using fallback utterance: {:#}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Generation timed out after {:?}, using fallback utterance",
                    self.generation_timeout
                );
                None
            }
        }
    }

    /// Write the session (first turn only) then the exchange, off the reply path
    fn persist_in_background(
        &self,
        session_start: Option<SessionRecord>,
        exchange: ExchangeRecord,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Some(session) = session_start {
                gateway
                    .ensure_reference_exists(ReferenceKind::Participant, &session.participant_id)
                    .await;
                gateway
                    .ensure_reference_exists(ReferenceKind::Scenario, &session.scenario_id.to_string())
                    .await;
                gateway.write(session).await;
            }

            let key = exchange.key();
            if !gateway.write(exchange).await.committed {
                debug!("Exchange {} held in fallback mirror", key);
            }
        })
    }

    fn fallback_reply(&self, session_id: &str) -> TurnReply {
        let role = self
            .cache
            .get(session_id)
            .map(|e| e.detected_role)
            .unwrap_or_default();

        TurnReply {
            session_id: session_id.to_string(),
            reply: self.session.fallback_utterance.clone(),
            addressing: Addressing::for_role(role),
            emotional_summary: None,
            degraded: true,
        }
    }

    pub async fn complete_session(
        &self,
        session_id: &str,
    ) -> Result<WriteOutcome<SessionRecord>, TurnError> {
        self.close_session(session_id, SessionStatus::Completed).await
    }

    pub async fn cancel_session(
        &self,
        session_id: &str,
    ) -> Result<WriteOutcome<SessionRecord>, TurnError> {
        self.close_session(session_id, SessionStatus::Cancelled).await
    }

    async fn close_session(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<WriteOutcome<SessionRecord>, TurnError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let record = match self.cache.set_status(session_id, status) {
            Ok(entry) => session_record(&entry),
            Err(StatusChangeError::UnknownSession(_)) => {
                self.close_from_store(session_id, status).await?
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = self.gateway.write(record).await;
        info!(
            "Session {} marked {} (committed={})",
            session_id,
            status.as_str(),
            outcome.committed
        );
        Ok(outcome)
    }

    /// Status change for a session no longer cached, based on the stored record
    async fn close_from_store(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<SessionRecord, TurnError> {
        let persisted = self
            .gateway
            .read::<SessionRecord>(session_id)
            .await
            .ok_or_else(|| TurnError::UnknownSession(session_id.to_string()))?;

        let mut record = persisted.record;
        if record.status.is_terminal() {
            return Err(TurnError::InvalidTransition(format!(
                "Session {} is already {}",
                session_id,
                record.status.as_str()
            )));
        }

        record.status = status;
        record.ended_at = Some(Utc::now());
        Ok(record)
    }

    /// Persist the evaluation of a known session
    pub async fn record_evaluation(
        &self,
        evaluation: EvaluationRecord,
    ) -> Result<WriteOutcome<EvaluationRecord>, TurnError> {
        let session_id = evaluation.session_id.clone();
        let known = self.cache.contains(&session_id)
            || self.gateway.read::<SessionRecord>(&session_id).await.is_some();
        if !known {
            return Err(TurnError::UnknownSession(session_id));
        }

        let outcome = self.gateway.write(evaluation).await;
        info!(
            "Evaluation for session {} recorded (score {:.1}, committed={})",
            session_id, outcome.record.record.overall_score, outcome.committed
        );
        Ok(outcome)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.stats(),
            persistence: self.gateway.stats(),
            session_locks: self.session_locks.len(),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let entry = self
            .session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Drop locks of sessions that left the cache and have no waiter
    pub fn prune_session_locks(&self) -> usize {
        let before = self.session_locks.len();
        self.session_locks
            .retain(|id, lock| Arc::strong_count(lock) > 1 || self.cache.contains(id));
        before.saturating_sub(self.session_locks.len())
    }

    /// Spawn cache sweeping, lock pruning and fallback reconciliation
    pub fn start_background(
        self: &Arc<Self>,
        sweep_interval: Duration,
        reconcile_interval: Duration,
    ) -> BackgroundTasks {
        let orchestrator = Arc::clone(self);
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = orchestrator.prune_session_locks();
                if pruned > 0 {
                    debug!("Pruned {} idle session locks", pruned);
                }
            }
        });

        info!(
            "Background tasks started: sweep every {:?}, reconcile every {:?}",
            sweep_interval, reconcile_interval
        );

        BackgroundTasks {
            handles: vec![
                self.cache.spawn_sweeper(sweep_interval),
                self.gateway.spawn_reconciler(reconcile_interval),
                pruner,
            ],
            gateway: Arc::clone(&self.gateway),
        }
    }
}

fn session_record(entry: &SessionEntry) -> SessionRecord {
    SessionRecord {
        session_id: entry.session_id.clone(),
        participant_id: entry.participant_id.clone(),
        scenario_id: entry.scenario_id,
        status: entry.status,
        started_at: entry.started_at,
        ended_at: entry.ended_at,
        remote_id: None,
    }
}

/// Handle over the engine's periodic tasks
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
    gateway: Arc<PersistenceGateway>,
}

impl BackgroundTasks {
    /// Stop the periodic tasks and make one last reconciliation attempt.
    /// Whatever is still fallback-only afterwards is reported, since it does
    /// not survive the process.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }

        if self.gateway.pending_fallbacks() > 0 {
            self.gateway.reconcile_fallbacks().await;
        }

        match self.gateway.pending_fallbacks() {
            0 => info!("Background tasks stopped, no pending fallback records"),
            pending => warn!(
                "Background tasks stopped with {} records held only in the fallback mirror; they are lost on exit",
                pending
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CacheConfig, CategoryThresholds, DirectiveTemplates, EmotionalProfile,
        MockScenarioProvider,
    };
    use crate::services::llm_service::MockGenerationProvider;
    use crate::services::persistence::{MockRemoteStore, StoreError};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FALLBACK: &str = "Pardon, je n'ai pas compris.";

    fn tracked_scenario() -> ScenarioConfig {
        ScenarioConfig {
            id: 7,
            name: "Épisode psychotique".to_string(),
            persona: "Vous êtes Julien, 24 ans, vous entendez des voix.".to_string(),
            emotion: Some(EmotionalProfile {
                initial: 40,
                min: 0,
                max: 100,
                thresholds: CategoryThresholds { nervous: 30, agitated: 60, aggressive: 80 },
                directives: DirectiveTemplates::default(),
                triggers: Vec::new(),
            }),
        }
    }

    fn scenarios(scenario: Option<ScenarioConfig>) -> Arc<dyn ScenarioProvider> {
        let mut provider = MockScenarioProvider::new();
        provider.expect_scenario().returning(move |_| scenario.clone());
        Arc::new(provider)
    }

    fn replying(text: &'static str) -> Arc<dyn GenerationProvider> {
        let mut generator = MockGenerationProvider::new();
        generator.expect_generate().returning(move |_| Ok(text.to_string()));
        Arc::new(generator)
    }

    fn healthy_store() -> MockRemoteStore {
        let mut store = MockRemoteStore::new();
        store.expect_ensure_reference().returning(|_, _| Ok(()));
        store.expect_upsert_session().returning(|r| {
            let mut stored = r.clone();
            stored.remote_id = Some(1);
            Ok(stored)
        });
        store.expect_upsert_exchange().returning(|r| Ok(r.clone()));
        store.expect_upsert_evaluation().returning(|r| Ok(r.clone()));
        store.expect_find_session().returning(|_| Ok(None));
        store.expect_find_exchange().returning(|_, _| Ok(None));
        store.expect_next_turn_index().returning(|_| Ok(0));
        store
    }

    fn down_store() -> MockRemoteStore {
        let down = || StoreError::Unavailable("connection refused".into());
        let mut store = MockRemoteStore::new();
        store.expect_ensure_reference().returning(move |_, _| Err(down()));
        store.expect_upsert_session().returning(move |_| Err(down()));
        store.expect_upsert_exchange().returning(move |_| Err(down()));
        store.expect_upsert_evaluation().returning(move |_| Err(down()));
        store.expect_find_session().returning(move |_| Err(down()));
        store.expect_find_exchange().returning(move |_, _| Err(down()));
        store.expect_next_turn_index().returning(move |_| Err(down()));
        store
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        cache: ConversationCache,
        gateway: Arc<PersistenceGateway>,
    }

    fn harness(
        store: MockRemoteStore,
        generator: Arc<dyn GenerationProvider>,
        scenario: Option<ScenarioConfig>,
    ) -> Harness {
        let cache = ConversationCache::new(&CacheConfig::default());
        let gateway = Arc::new(PersistenceGateway::new(Arc::new(store), Duration::from_millis(200)));
        let session = SessionConfig {
            max_input_chars: 200,
            fallback_utterance: FALLBACK.to_string(),
        };
        let orchestrator = SessionOrchestrator::new(
            cache.clone(),
            Arc::clone(&gateway),
            generator,
            scenarios(scenario),
            session,
            Duration::from_millis(100),
        );
        Harness { orchestrator, cache, gateway }
    }

    /// Let spawned persistence tasks run to completion
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_turn_tracks_emotion_and_persists() {
        let h = harness(healthy_store(), replying("Oui... elles me parlent."), Some(tracked_scenario()));

        let reply = h
            .orchestrator
            .handle_turn(
                "s-1",
                "p-1",
                7,
                "Bonjour, je suis infirmier. Je comprends que c'est difficile, entendez-vous des voix actuellement?",
            )
            .await
            .unwrap();

        assert_eq!(reply.reply, "Oui... elles me parlent.");
        assert!(!reply.degraded);
        assert_eq!(reply.addressing.role, ParticipantRole::Nurse);
        assert_eq!(reply.addressing.form_of_address, "l'infirmier");
        assert!(reply.emotional_summary.unwrap().starts_with("agitation "));

        let state = h.cache.get_emotional_state("s-1").unwrap();
        assert!(state.level < 40);
        assert_eq!(state.triggers.len(), 1);

        let entry = h.cache.get("s-1").unwrap();
        assert_eq!(entry.messages.len(), 2);
        assert_eq!(entry.messages[0].tags, vec!["voix"]);

        settle().await;
        let stats = h.gateway.stats();
        assert_eq!(stats.remote_writes, 2);
        assert_eq!(stats.pending_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_history_and_directives_reach_generator() {
        let mut generator = MockGenerationProvider::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        generator.expect_generate().returning(move |request| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.history.len(), n * 2);
            assert!(request.system_directive.contains("Julien"));
            assert!(request.system_directive.contains("ÉTAT ÉMOTIONNEL"));
            Ok(format!("réponse {}", n))
        });
        let h = harness(healthy_store(), Arc::new(generator), Some(tracked_scenario()));

        h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        let second = h.orchestrator.handle_turn("s-1", "p-1", 7, "Vous dormez bien ?").await.unwrap();

        assert_eq!(second.reply, "réponse 1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_uses_fallback_utterance() {
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("503 Service Unavailable")));
        let h = harness(healthy_store(), Arc::new(generator), Some(tracked_scenario()));

        let reply = h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        assert_eq!(reply.reply, FALLBACK);
        assert!(reply.degraded);

        let entry = h.cache.get("s-1").unwrap();
        assert_eq!(entry.messages.len(), 2);
        assert_eq!(entry.messages[1].content, FALLBACK);
    }

    struct SlowGenerator;

    #[async_trait]
    impl GenerationProvider for SlowGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("trop tard".to_string())
        }
    }

    #[tokio::test]
    async fn test_generation_timeout_uses_fallback_utterance() {
        let h = harness(healthy_store(), Arc::new(SlowGenerator), None);

        let reply = h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        assert_eq!(reply.reply, FALLBACK);
        assert!(reply.degraded);
    }

    #[tokio::test]
    async fn test_remote_store_down_keeps_turn_flowing() {
        let h = harness(down_store(), replying("Bonjour."), Some(tracked_scenario()));

        let reply = h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        assert_eq!(reply.reply, "Bonjour.");
        assert!(!reply.degraded);

        settle().await;
        assert_eq!(h.gateway.pending_fallbacks(), 2);

        let exchange = h.gateway.read::<ExchangeRecord>("s-1#0").await.unwrap();
        assert!(exchange.is_fallback);
        assert_eq!(exchange.record.messages.len(), 2);
        assert_eq!(exchange.record.messages[0].content, "Bonjour");
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_state_change() {
        let h = harness(MockRemoteStore::new(), replying("..."), None);

        assert_eq!(
            h.orchestrator.handle_turn("s-1", "p-1", 7, "   ").await.unwrap_err(),
            TurnError::EmptyInput
        );

        let long = "a".repeat(201);
        assert_eq!(
            h.orchestrator.handle_turn("s-1", "p-1", 7, &long).await.unwrap_err(),
            TurnError::InputTooLong { max: 200, actual: 201 }
        );
        assert!(h.cache.is_empty());
    }

    #[test]
    fn test_input_length_counts_graphemes() {
        let h = harness(MockRemoteStore::new(), replying("..."), None);
        let decomposed = "e\u{301}".repeat(200);
        assert!(h.orchestrator.validate_input(&decomposed).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_scenario_disables_tracking() {
        let h = harness(healthy_store(), replying("D'accord."), None);

        let reply = h.orchestrator.handle_turn("s-1", "p-1", 99, "Calmez-vous.").await.unwrap();
        assert!(reply.emotional_summary.is_none());
        assert!(h.cache.get_emotional_state("s-1").is_none());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_turns() {
        let h = harness(healthy_store(), replying("Au revoir."), None);
        h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();

        let outcome = h.orchestrator.complete_session("s-1").await.unwrap();
        assert!(outcome.committed);
        assert_eq!(outcome.record.record.status, SessionStatus::Completed);
        assert!(outcome.record.record.ended_at.is_some());

        let err = h.orchestrator.handle_turn("s-1", "p-1", 7, "Encore une question").await.unwrap_err();
        assert!(matches!(err, TurnError::SessionClosed { status: SessionStatus::Completed, .. }));

        let err = h.orchestrator.cancel_session("s-1").await.unwrap_err();
        assert!(matches!(err, TurnError::InvalidTransition(_)));

        let err = h.orchestrator.cancel_session("ghost").await.unwrap_err();
        assert_eq!(err, TurnError::UnknownSession("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_evicted_closed_session_stays_closed() {
        let h = harness(healthy_store(), replying("ok"), None);
        h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        settle().await;
        h.orchestrator.complete_session("s-1").await.unwrap();

        assert!(h.cache.clear("s-1"));
        let err = h.orchestrator.handle_turn("s-1", "p-1", 7, "Je reviens").await.unwrap_err();
        assert!(matches!(err, TurnError::SessionClosed { status: SessionStatus::Completed, .. }));
        assert!(!h.cache.contains("s-1"));
    }

    #[tokio::test]
    async fn test_resumed_session_keeps_stored_exchanges() {
        let h = harness(healthy_store(), replying("Encore vous."), None);
        h.orchestrator.handle_turn("s-1", "p-1", 7, "Premier message").await.unwrap();
        settle().await;

        assert!(h.cache.clear("s-1"));
        h.orchestrator.handle_turn("s-1", "p-1", 7, "Message apres retour").await.unwrap();
        settle().await;

        let first = h.gateway.read::<ExchangeRecord>("s-1#0").await.unwrap();
        assert_eq!(first.record.messages[0].content, "Premier message");
        let second = h.gateway.read::<ExchangeRecord>("s-1#1").await.unwrap();
        assert_eq!(second.record.messages[0].content, "Message apres retour");
    }

    #[tokio::test]
    async fn test_resume_continues_after_stored_turns() {
        let started_at = Utc::now() - chrono::Duration::hours(2);
        let turn_indexes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&turn_indexes);
        let mut store = MockRemoteStore::new();
        store.expect_find_session().returning(move |id| {
            Ok(Some(SessionRecord {
                session_id: id.to_string(),
                participant_id: "p-1".to_string(),
                scenario_id: 7,
                status: SessionStatus::Active,
                started_at,
                ended_at: None,
                remote_id: Some(3),
            }))
        });
        store.expect_next_turn_index().returning(|_| Ok(5));
        store.expect_upsert_exchange().returning(move |r| {
            recorded.lock().push(r.turn_index);
            Ok(r.clone())
        });
        // no upsert_session expectation: a resumed session is not re-created
        let h = harness(store, replying("Vous encore."), None);

        h.orchestrator.handle_turn("s-old", "p-1", 99, "Rebonjour").await.unwrap();
        h.orchestrator.handle_turn("s-old", "p-1", 99, "Comment allez-vous ?").await.unwrap();
        settle().await;

        assert_eq!(*turn_indexes.lock(), vec![5, 6]);
        let entry = h.cache.get("s-old").unwrap();
        assert_eq!(entry.started_at, started_at);
        assert_eq!(entry.scenario_id, 7);
    }

    #[tokio::test]
    async fn test_close_evicted_session_from_stored_record() {
        let mut store = MockRemoteStore::new();
        store.expect_find_session().returning(|id| {
            Ok(Some(SessionRecord {
                session_id: id.to_string(),
                participant_id: "p-1".to_string(),
                scenario_id: 7,
                status: SessionStatus::Active,
                started_at: Utc::now(),
                ended_at: None,
                remote_id: Some(3),
            }))
        });
        store.expect_upsert_session().returning(|r| Ok(r.clone()));
        let h = harness(store, replying("..."), None);

        let outcome = h.orchestrator.cancel_session("s-old").await.unwrap();
        assert!(outcome.committed);
        assert_eq!(outcome.record.record.status, SessionStatus::Cancelled);
        assert_eq!(outcome.record.record.remote_id, Some(3));
    }

    #[tokio::test]
    async fn test_concurrent_turns_are_serialized() {
        let turn_indexes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&turn_indexes);
        let mut store = MockRemoteStore::new();
        store.expect_ensure_reference().returning(|_, _| Ok(()));
        store.expect_upsert_session().returning(|r| Ok(r.clone()));
        store.expect_upsert_exchange().returning(move |r| {
            recorded.lock().push(r.turn_index);
            Ok(r.clone())
        });
        store.expect_find_session().returning(|_| Ok(None));

        let h = harness(store, replying("Hmm."), Some(tracked_scenario()));
        let (a, b) = tokio::join!(
            h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour"),
            h.orchestrator.handle_turn("s-1", "p-1", 7, "Comment allez-vous ?"),
        );
        assert!(a.is_ok() && b.is_ok());

        let entry = h.cache.get("s-1").unwrap();
        assert_eq!(entry.messages.len(), 4);
        assert_eq!(entry.emotional_state.unwrap().triggers.len(), 2);

        settle().await;
        let mut indexes = turn_indexes.lock().clone();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_record_evaluation_requires_known_session() {
        let h = harness(healthy_store(), replying("Merci."), None);
        let evaluation = |id: &str| EvaluationRecord {
            session_id: id.to_string(),
            scores: BTreeMap::from([("empathy".to_string(), 20.0), ("questioning".to_string(), 15.0)]),
            overall_score: 70.0,
            strengths: vec!["reformulation".to_string()],
            improvements: vec!["éviter les injonctions".to_string()],
            created_at: Utc::now(),
        };

        let err = h.orchestrator.record_evaluation(evaluation("ghost")).await.unwrap_err();
        assert_eq!(err, TurnError::UnknownSession("ghost".to_string()));

        h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        let outcome = h.orchestrator.record_evaluation(evaluation("s-1")).await.unwrap();
        assert!(outcome.committed);
        assert!(!outcome.record.is_fallback);
    }

    #[tokio::test]
    async fn test_prune_drops_locks_of_evicted_sessions() {
        let h = harness(healthy_store(), replying("Oui."), None);
        h.orchestrator.handle_turn("s-1", "p-1", 7, "Bonjour").await.unwrap();
        h.orchestrator.handle_turn("s-2", "p-1", 7, "Bonjour").await.unwrap();

        assert_eq!(h.orchestrator.prune_session_locks(), 0);
        assert!(h.cache.clear("s-1"));
        assert_eq!(h.orchestrator.prune_session_locks(), 1);
        assert_eq!(h.orchestrator.stats().session_locks, 1);
    }

    #[tokio::test]
    async fn test_shutdown_reconciles_pending_fallbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = MockRemoteStore::new();
        store.expect_upsert_session().returning(move |r| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Timeout(Duration::from_millis(200)))
            } else {
                Ok(r.clone())
            }
        });
        let h = harness(store, replying("..."), None);
        let orchestrator = Arc::new(h.orchestrator);

        let record = SessionRecord {
            session_id: "s-1".to_string(),
            participant_id: "p-1".to_string(),
            scenario_id: 7,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            remote_id: None,
        };
        assert!(!h.gateway.write(record).await.committed);

        let tasks = orchestrator.start_background(Duration::from_secs(3600), Duration::from_secs(3600));
        tasks.shutdown().await;
        assert_eq!(h.gateway.pending_fallbacks(), 0);
    }

    #[test]
    fn test_system_directive_sections() {
        let scenario = tracked_scenario();
        let context = ConversationContext {
            emotional_state: Some(crate::services::emotion::EmotionalState::new(85, 0, 100)),
            topics_summary: "Sujets déjà abordés : voix".to_string(),
            ..Default::default()
        };

        let directive = SessionOrchestrator::system_directive(&scenario, ParticipantRole::Doctor, &context);
        assert!(directive.starts_with("Vous êtes Julien"));
        assert!(directive.contains("« Docteur »"));
        assert!(directive.contains("agitation 85/100"));
        assert!(directive.ends_with("Sujets déjà abordés : voix"));

        let untracked = ScenarioConfig::untracked(1);
        let directive = SessionOrchestrator::system_directive(&untracked, ParticipantRole::Unknown, &ConversationContext::default());
        assert!(directive.contains("Vouvoyez-le"));
        assert!(!directive.contains("ÉTAT ÉMOTIONNEL"));
    }
}
