//! Result repository
//!
//! Results only move forward along the status ladder. Tracking callbacks are
//! appended to `result_events` unconditionally; the status advance that may
//! follow is applied in the same transaction under a row lock.

use crate::db::{map_sqlx_error, DatabasePool};
use crate::models::{
    CampaignResult, NewResultEvent, RecordedEvent, ResultEvent, ResultStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_common::types::{CampaignId, TargetId};
use hookline_common::{Error, Result};
use std::collections::HashMap;
use uuid::Uuid;

/// Result repository trait
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn get_by_rid(&self, campaign_id: CampaignId, rid: &str)
        -> Result<Option<CampaignResult>>;
    async fn get_by_target(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
    ) -> Result<Option<CampaignResult>>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignResult>>;

    /// Move a `queued` result to `sent`; false if it had already moved on
    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Move a result to `error`; false if it was already `error`
    async fn mark_error(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Append a tracking event and advance the result if the event is ahead
    /// of it. `NotFound` if no result carries the rId.
    async fn record_event(&self, event: NewResultEvent, now: DateTime<Utc>)
        -> Result<RecordedEvent>;

    async fn list_events(&self, campaign_id: CampaignId) -> Result<Vec<ResultEvent>>;
    async fn status_counts(&self, campaign_id: CampaignId)
        -> Result<HashMap<ResultStatus, i64>>;
}

/// Database result repository
pub struct DbResultRepository {
    pool: DatabasePool,
}

impl DbResultRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for DbResultRepository {
    async fn get_by_rid(
        &self,
        campaign_id: CampaignId,
        rid: &str,
    ) -> Result<Option<CampaignResult>> {
        sqlx::query_as::<_, CampaignResult>(
            "SELECT * FROM results WHERE campaign_id = $1 AND rid = $2",
        )
        .bind(campaign_id)
        .bind(rid)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_by_target(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
    ) -> Result<Option<CampaignResult>> {
        sqlx::query_as::<_, CampaignResult>(
            "SELECT * FROM results WHERE campaign_id = $1 AND target_id = $2",
        )
        .bind(campaign_id)
        .bind(target_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignResult>> {
        sqlx::query_as::<_, CampaignResult>(
            "SELECT * FROM results WHERE campaign_id = $1 ORDER BY email ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE results SET
                status = 'sent',
                send_date = $3,
                last_transition_at = $3
            WHERE campaign_id = $1
              AND target_id = $2
              AND status = 'queued'
            "#,
        )
        .bind(campaign_id)
        .bind(target_id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_error(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE results SET
                status = 'error',
                last_error = $3,
                last_transition_at = $4
            WHERE campaign_id = $1
              AND target_id = $2
              AND status <> 'error'
            "#,
        )
        .bind(campaign_id)
        .bind(target_id)
        .bind(error)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_event(
        &self,
        event: NewResultEvent,
        now: DateTime<Utc>,
    ) -> Result<RecordedEvent> {
        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx_error)?;

        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM results WHERE campaign_id = $1 AND rid = $2 FOR UPDATE",
        )
        .bind(event.campaign_id)
        .bind(&event.rid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let (result_id, previous) = match row {
            Some((id, status)) => (id, status.parse::<ResultStatus>().map_err(Error::Database)?),
            None => {
                return Err(Error::NotFound(format!(
                    "No result for rId {} in campaign {}",
                    event.rid, event.campaign_id
                )))
            }
        };

        let stored = sqlx::query_as::<_, ResultEvent>(
            r#"
            INSERT INTO result_events (id, campaign_id, rid, kind, details, occurred_at, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(event.campaign_id)
        .bind(&event.rid)
        .bind(event.kind.as_str())
        .bind(&event.details)
        .bind(event.occurred_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let next = event.kind.status();
        let current = if previous.can_advance_to(next) {
            sqlx::query("UPDATE results SET status = $2, last_transition_at = $3 WHERE id = $1")
                .bind(result_id)
                .bind(next.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            next
        } else {
            previous
        };

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(RecordedEvent {
            event: stored,
            previous,
            current,
        })
    }

    async fn list_events(&self, campaign_id: CampaignId) -> Result<Vec<ResultEvent>> {
        sqlx::query_as::<_, ResultEvent>(
            "SELECT * FROM result_events WHERE campaign_id = $1 ORDER BY recorded_at ASC, id ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<HashMap<ResultStatus, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM results WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(status, n)| {
                status
                    .parse::<ResultStatus>()
                    .map(|status| (status, n))
                    .map_err(Error::Database)
            })
            .collect()
    }
}
