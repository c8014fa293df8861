//! MailLog - the durable send queue with lease and retry policy applied

use crate::retry::RetryPolicy;
use chrono::{DateTime, Duration, Utc};
use hookline_common::types::{CampaignId, MailLogId, TargetId};
use hookline_common::Result;
use hookline_storage::{FailureReport, MailLogCounts, MailLogEntry, MailLogRepository, MailLogState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Send queue for campaign targets
#[derive(Clone)]
pub struct MailLog {
    repo: Arc<dyn MailLogRepository>,
    retry: RetryPolicy,
    lease: Duration,
}

impl MailLog {
    pub fn new(repo: Arc<dyn MailLogRepository>, retry: RetryPolicy, lease: Duration) -> Self {
        Self { repo, retry, lease }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Queue a target for sending at `send_at`
    pub async fn enqueue(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<MailLogEntry> {
        self.repo
            .enqueue(campaign_id, target_id, send_at, self.retry.max_retries, now)
            .await
    }

    /// Lock up to `limit` due entries for `owner`
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
    ) -> Result<Vec<MailLogEntry>> {
        let claimed = self.repo.claim_due(now, limit, owner, self.lease).await?;
        if !claimed.is_empty() {
            debug!(owner, claimed = claimed.len(), "Claimed due mail log entries");
        }
        Ok(claimed)
    }

    /// Return entries whose lease has passed to the queue
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailLogEntry>> {
        let reclaimed = self.repo.reclaim_expired(now).await?;
        for entry in &reclaimed {
            match entry.state {
                MailLogState::Error => warn!(
                    mail_log_id = %entry.id,
                    campaign_id = %entry.campaign_id,
                    retry_count = entry.retry_count,
                    "Lease expired with no retries left"
                ),
                _ => info!(
                    mail_log_id = %entry.id,
                    campaign_id = %entry.campaign_id,
                    retry_count = entry.retry_count,
                    "Reclaimed expired lease"
                ),
            }
        }
        Ok(reclaimed)
    }

    /// Record a delivery; `None` if the lease was lost
    pub async fn complete(
        &self,
        id: MailLogId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        self.repo.complete(id, owner, now).await
    }

    /// Record a failed attempt; `None` if the lease was lost
    pub async fn fail(
        &self,
        id: MailLogId,
        owner: &str,
        error: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        let report = FailureReport {
            error: error.to_string(),
            permanent,
            backoff: self.retry.backoff,
        };
        self.repo.fail(id, owner, &report, now).await
    }

    /// Stop every queued send of a campaign
    pub async fn cancel_pending(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MailLogEntry>> {
        self.repo.cancel_pending(campaign_id, now).await
    }

    pub async fn state_counts(&self, campaign_id: CampaignId) -> Result<MailLogCounts> {
        self.repo.state_counts(campaign_id).await
    }

    pub async fn get(&self, id: MailLogId) -> Result<Option<MailLogEntry>> {
        self.repo.get(id).await
    }

    pub async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<MailLogEntry>> {
        self.repo.list_by_campaign(campaign_id).await
    }
}
