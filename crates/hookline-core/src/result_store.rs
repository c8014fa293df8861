//! ResultStore - per-target outcomes and their event log

use chrono::{DateTime, Utc};
use hookline_common::types::{CampaignId, TargetId};
use hookline_common::Result;
use hookline_storage::{
    CampaignResult, NewResultEvent, RecordedEvent, ResultEvent, ResultRepository, ResultStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-target result state machine
#[derive(Clone)]
pub struct ResultStore {
    repo: Arc<dyn ResultRepository>,
}

impl ResultStore {
    pub fn new(repo: Arc<dyn ResultRepository>) -> Self {
        Self { repo }
    }

    /// Delivery confirmed. Leaves results that already moved past `queued`.
    pub async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.repo.mark_sent(campaign_id, target_id, now).await?;
        if !changed {
            debug!(
                campaign_id = %campaign_id,
                target_id = %target_id,
                "Result already past queued, send confirmation not applied"
            );
        }
        Ok(changed)
    }

    pub async fn mark_error(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.repo.mark_error(campaign_id, target_id, error, now).await
    }

    /// Append a tracking event, advancing the status if it is ahead
    pub async fn record(&self, event: NewResultEvent, now: DateTime<Utc>) -> Result<RecordedEvent> {
        self.repo.record_event(event, now).await
    }

    pub async fn get_by_rid(
        &self,
        campaign_id: CampaignId,
        rid: &str,
    ) -> Result<Option<CampaignResult>> {
        self.repo.get_by_rid(campaign_id, rid).await
    }

    pub async fn get_by_target(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
    ) -> Result<Option<CampaignResult>> {
        self.repo.get_by_target(campaign_id, target_id).await
    }

    pub async fn list(&self, campaign_id: CampaignId) -> Result<Vec<CampaignResult>> {
        self.repo.list_by_campaign(campaign_id).await
    }

    pub async fn events(&self, campaign_id: CampaignId) -> Result<Vec<ResultEvent>> {
        self.repo.list_events(campaign_id).await
    }

    pub async fn status_counts(&self, campaign_id: CampaignId) -> Result<HashMap<ResultStatus, i64>> {
        self.repo.status_counts(campaign_id).await
    }
}
