//! Mail log repository
//!
//! The mail log is the durable work queue. Every transition here is a single
//! conditional write so concurrent schedulers never both own an entry:
//!
//! ```text
//! pending --claim--> locked --complete--> sent
//!    ^                 |  \--fail(permanent or exhausted)--> error
//!    |                 |
//!    +--fail(retry)----+
//!    +--reclaim--------+ (lease expired)
//! ```
//!
//! Once a campaign is cancelled its pending entries are never claimed, and a
//! failed or expired attempt goes straight to `error` instead of `pending`.

use crate::db::{map_sqlx_error, DatabasePool};
use crate::models::{Backoff, MailLogCounts, MailLogEntry, MailLogState};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hookline_common::types::{CampaignId, MailLogId, TargetId};
use hookline_common::Result;
use uuid::Uuid;

/// Error recorded on entries drained by a cancellation
pub const CANCELLED_ERROR: &str = "campaign cancelled";

/// Error recorded when a lease expires after the final allowed attempt
pub const LEASE_EXHAUSTED_ERROR: &str = "lease expired after final attempt";

/// How a failed attempt should be recorded
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub error: String,
    pub permanent: bool,
    pub backoff: Backoff,
}

/// Mail log repository trait
#[async_trait]
pub trait MailLogRepository: Send + Sync {
    /// Create a `pending` entry; `DuplicateKey` if the pair already has one
    async fn enqueue(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        send_at: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<MailLogEntry>;

    /// Lock up to `limit` due entries for `owner`, oldest `send_at` first.
    /// Entries of cancelled campaigns are skipped.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> Result<Vec<MailLogEntry>>;

    /// Return expired leases to `pending` (or `error` when out of retries or
    /// the campaign was cancelled)
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailLogEntry>>;

    /// Mark a held entry `sent`; `None` if `owner` no longer holds it
    async fn complete(
        &self,
        id: MailLogId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>>;

    /// Record a failed attempt on a held entry; `None` if `owner` no longer holds it
    async fn fail(
        &self,
        id: MailLogId,
        owner: &str,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>>;

    /// Move every `pending` entry of a campaign to `error`
    async fn cancel_pending(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MailLogEntry>>;

    async fn state_counts(&self, campaign_id: CampaignId) -> Result<MailLogCounts>;
    async fn get(&self, id: MailLogId) -> Result<Option<MailLogEntry>>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<MailLogEntry>>;
}

/// Database mail log repository
pub struct DbMailLogRepository {
    pool: DatabasePool,
}

impl DbMailLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailLogRepository for DbMailLogRepository {
    async fn enqueue(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        send_at: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<MailLogEntry> {
        sqlx::query_as::<_, MailLogEntry>(
            r#"
            INSERT INTO mail_logs (
                id, campaign_id, target_id, send_at, state, retry_count,
                max_retries, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign_id)
        .bind(target_id)
        .bind(send_at)
        .bind(max_retries)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> Result<Vec<MailLogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut claimed = sqlx::query_as::<_, MailLogEntry>(
            r#"
            UPDATE mail_logs SET
                state = 'locked',
                lock_owner = $3,
                lock_expires_at = $4,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM mail_logs
                WHERE state = 'pending'
                  AND send_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM campaigns c
                      WHERE c.id = mail_logs.campaign_id
                        AND c.cancelled_at IS NOT NULL
                  )
                ORDER BY send_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .bind(owner)
        .bind(now + lease)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        claimed.sort_by_key(|entry| entry.send_at);
        Ok(claimed)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailLogEntry>> {
        // SET expressions all see the pre-update row.
        sqlx::query_as::<_, MailLogEntry>(
            r#"
            UPDATE mail_logs m SET
                state = CASE WHEN m.retry_count < m.max_retries AND c.cancelled_at IS NULL
                             THEN 'pending' ELSE 'error' END,
                last_error = CASE WHEN c.cancelled_at IS NOT NULL THEN $3
                                  WHEN m.retry_count < m.max_retries THEN m.last_error
                                  ELSE $2 END,
                retry_count = CASE WHEN m.retry_count < m.max_retries AND c.cancelled_at IS NULL
                                   THEN m.retry_count + 1 ELSE m.retry_count END,
                lock_owner = NULL,
                lock_expires_at = NULL,
                updated_at = $1
            FROM campaigns c
            WHERE c.id = m.campaign_id
              AND m.state = 'locked'
              AND m.lock_expires_at <= $1
            RETURNING m.*
            "#,
        )
        .bind(now)
        .bind(LEASE_EXHAUSTED_ERROR)
        .bind(CANCELLED_ERROR)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn complete(
        &self,
        id: MailLogId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        sqlx::query_as::<_, MailLogEntry>(
            r#"
            UPDATE mail_logs SET
                state = 'sent',
                lock_owner = NULL,
                lock_expires_at = NULL,
                last_error = NULL,
                updated_at = $3
            WHERE id = $1
              AND state = 'locked'
              AND lock_owner = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn fail(
        &self,
        id: MailLogId,
        owner: &str,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        if report.permanent {
            return sqlx::query_as::<_, MailLogEntry>(
                r#"
                UPDATE mail_logs SET
                    state = 'error',
                    last_error = $3,
                    lock_owner = NULL,
                    lock_expires_at = NULL,
                    updated_at = $4
                WHERE id = $1
                  AND state = 'locked'
                  AND lock_owner = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(owner)
            .bind(&report.error)
            .bind(now)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error);
        }

        sqlx::query_as::<_, MailLogEntry>(
            r#"
            UPDATE mail_logs m SET
                state = CASE WHEN m.retry_count < m.max_retries AND c.cancelled_at IS NULL
                             THEN 'pending' ELSE 'error' END,
                send_at = CASE WHEN m.retry_count < m.max_retries AND c.cancelled_at IS NULL
                    THEN $4 + make_interval(secs => LEAST(
                        $5 * POWER(2, LEAST(m.retry_count, $7)), $6))
                    ELSE m.send_at END,
                retry_count = CASE WHEN m.retry_count < m.max_retries AND c.cancelled_at IS NULL
                                   THEN m.retry_count + 1 ELSE m.retry_count END,
                last_error = CASE WHEN c.cancelled_at IS NULL THEN $3 ELSE $8 END,
                lock_owner = NULL,
                lock_expires_at = NULL,
                updated_at = $4
            FROM campaigns c
            WHERE c.id = m.campaign_id
              AND m.id = $1
              AND m.state = 'locked'
              AND m.lock_owner = $2
            RETURNING m.*
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(&report.error)
        .bind(now)
        .bind(report.backoff.base.num_seconds() as f64)
        .bind(report.backoff.cap.num_seconds() as f64)
        .bind(Backoff::MAX_EXPONENT)
        .bind(CANCELLED_ERROR)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn cancel_pending(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MailLogEntry>> {
        sqlx::query_as::<_, MailLogEntry>(
            r#"
            UPDATE mail_logs SET
                state = 'error',
                last_error = $2,
                updated_at = $3
            WHERE campaign_id = $1
              AND state = 'pending'
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .bind(CANCELLED_ERROR)
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn state_counts(&self, campaign_id: CampaignId) -> Result<MailLogCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM mail_logs WHERE campaign_id = $1 GROUP BY state",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = MailLogCounts::default();
        for (state, n) in rows {
            let state: MailLogState = state
                .parse()
                .map_err(hookline_common::Error::Database)?;
            counts.add(state, n);
        }
        Ok(counts)
    }

    async fn get(&self, id: MailLogId) -> Result<Option<MailLogEntry>> {
        sqlx::query_as::<_, MailLogEntry>("SELECT * FROM mail_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<MailLogEntry>> {
        sqlx::query_as::<_, MailLogEntry>(
            "SELECT * FROM mail_logs WHERE campaign_id = $1 ORDER BY send_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
