use async_trait::async_trait;
use sqlx::types::Json;
use tracing::{debug, info};

use super::models::{EvaluationRow, MessageRow, SessionRow};
use super::DbPool;
use crate::models::ConversationMessage;
use crate::services::persistence::{
    EvaluationRecord, ExchangeRecord, ReferenceKind, RemoteStore, SessionRecord, StoreError,
};

/// Postgres-backed system of record for simulation sessions.
pub struct PgRemoteStore {
    pub pool: DbPool,
}

const SCHEMA: &str = include_str!("../../migrations/20260301000000_session_engine.sql");

impl PgRemoteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Ensure the simulation tables and indexes exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(self.pool.get_pool()).await?;
        info!("Session tables ready");
        Ok(())
    }

    async fn session_pk(&self, session_key: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM sim_sessions WHERE session_key = $1")
            .bind(session_key)
            .fetch_optional(self.pool.get_pool())
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn upsert_session(&self, record: &SessionRecord) -> Result<SessionRecord, StoreError> {
        // A terminal status in the store is never reverted by a late write.
        let row = sqlx::query_as::<_, SessionRow>(
            r#"INSERT INTO sim_sessions
                (session_key, participant_id, scenario_id, status, started_at, ended_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (session_key) DO UPDATE SET
                status = CASE
                    WHEN sim_sessions.status IN ('completed', 'cancelled') THEN sim_sessions.status
                    ELSE EXCLUDED.status
                END,
                ended_at = COALESCE(sim_sessions.ended_at, EXCLUDED.ended_at),
                updated_at = NOW()
               RETURNING id, session_key, participant_id, scenario_id, status, started_at, ended_at"#,
        )
        .bind(&record.session_id)
        .bind(&record.participant_id)
        .bind(record.scenario_id)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.ended_at)
        .persistent(false)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!("Upserted session {} (id={})", row.session_key, row.id);
        row.try_into()
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"SELECT id, session_key, participant_id, scenario_id, status, started_at, ended_at
               FROM sim_sessions
               WHERE session_key = $1"#,
        )
        .bind(session_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn upsert_exchange(&self, record: &ExchangeRecord) -> Result<ExchangeRecord, StoreError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let session_pk = sqlx::query_scalar::<_, i64>("SELECT id FROM sim_sessions WHERE session_key = $1")
            .bind(&record.session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::MissingReference {
                kind: "session",
                key: record.session_id.clone(),
            })?;

        // An existing row is only touched when it holds the same message,
        // so a replay is idempotent and another turn's content is never replaced.
        for (position, message) in record.messages.iter().enumerate() {
            let written = sqlx::query(
                r#"INSERT INTO sim_messages
                    (session_id, turn_index, position, role, content, tags, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   ON CONFLICT (session_id, turn_index, position) DO UPDATE SET
                    tags = EXCLUDED.tags
                   WHERE sim_messages.role = EXCLUDED.role
                     AND sim_messages.content = EXCLUDED.content"#,
            )
            .bind(session_pk)
            .bind(record.turn_index)
            .bind(position as i16)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(Json(&message.tags))
            .bind(message.timestamp)
            .persistent(false)
            .execute(&mut *tx)
            .await?;

            if written.rows_affected() == 0 {
                return Err(StoreError::Conflict {
                    kind: "exchange",
                    key: ExchangeRecord::key_for(&record.session_id, record.turn_index),
                });
            }
        }

        tx.commit().await?;

        debug!(
            "Stored exchange {}#{} ({} messages)",
            record.session_id,
            record.turn_index,
            record.messages.len()
        );
        Ok(record.clone())
    }

    async fn find_exchange(
        &self,
        session_id: &str,
        turn_index: i32,
    ) -> Result<Option<ExchangeRecord>, StoreError> {
        let Some(session_pk) = self.session_pk(session_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"SELECT role, content, tags, created_at
               FROM sim_messages
               WHERE session_id = $1 AND turn_index = $2
               ORDER BY position ASC"#,
        )
        .bind(session_pk)
        .bind(turn_index)
        .fetch_all(self.pool.get_pool())
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let messages = rows
            .into_iter()
            .map(ConversationMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ExchangeRecord {
            session_id: session_id.to_string(),
            turn_index,
            messages,
        }))
    }

    async fn next_turn_index(&self, session_id: &str) -> Result<i32, StoreError> {
        let next = sqlx::query_scalar::<_, i32>(
            r#"SELECT COALESCE(MAX(m.turn_index) + 1, 0)
               FROM sim_messages m
               JOIN sim_sessions s ON s.id = m.session_id
               WHERE s.session_key = $1"#,
        )
        .bind(session_id)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(next)
    }

    async fn upsert_evaluation(
        &self,
        record: &EvaluationRecord,
    ) -> Result<EvaluationRecord, StoreError> {
        let row = sqlx::query_as::<_, EvaluationRow>(
            r#"INSERT INTO sim_evaluations
                (session_id, scores, overall_score, strengths, improvements, created_at)
               SELECT s.id, $2, $3, $4, $5, $6
               FROM sim_sessions s
               WHERE s.session_key = $1
               ON CONFLICT (session_id) DO UPDATE SET
                scores = EXCLUDED.scores,
                overall_score = EXCLUDED.overall_score,
                strengths = EXCLUDED.strengths,
                improvements = EXCLUDED.improvements,
                created_at = EXCLUDED.created_at
               RETURNING $1::TEXT AS session_key, scores, overall_score, strengths, improvements, created_at"#,
        )
        .bind(&record.session_id)
        .bind(Json(&record.scores))
        .bind(record.overall_score)
        .bind(&record.strengths)
        .bind(&record.improvements)
        .bind(record.created_at)
        .persistent(false)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(EvaluationRecord::from)
            .ok_or_else(|| StoreError::MissingReference {
                kind: "session",
                key: record.session_id.clone(),
            })
    }

    async fn find_evaluation(
        &self,
        session_id: &str,
    ) -> Result<Option<EvaluationRecord>, StoreError> {
        let row = sqlx::query_as::<_, EvaluationRow>(
            r#"SELECT s.session_key, e.scores, e.overall_score, e.strengths, e.improvements, e.created_at
               FROM sim_evaluations e
               JOIN sim_sessions s ON s.id = e.session_id
               WHERE s.session_key = $1"#,
        )
        .bind(session_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(EvaluationRecord::from))
    }

    async fn ensure_reference(
        &self,
        kind: ReferenceKind,
        natural_key: &str,
    ) -> Result<(), StoreError> {
        match kind {
            ReferenceKind::Participant => {
                sqlx::query(
                    "INSERT INTO sim_participants (external_id) VALUES ($1) ON CONFLICT (external_id) DO NOTHING",
                )
                .bind(natural_key)
                .execute(self.pool.get_pool())
                .await?;
            }
            ReferenceKind::Scenario => {
                let scenario_id: i32 = natural_key
                    .parse()
                    .map_err(|_| StoreError::InvalidKey(natural_key.to_string()))?;
                sqlx::query("INSERT INTO sim_scenarios (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
                    .bind(scenario_id)
                    .execute(self.pool.get_pool())
                    .await?;
            }
        }

        Ok(())
    }
}
