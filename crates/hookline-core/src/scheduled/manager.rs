//! Campaign Manager - launch, cancellation and derived campaign status

use crate::clock::Clock;
use crate::delivery::TemplateRenderer;
use crate::mail_log::MailLog;
use crate::repos::Repositories;
use crate::result_store::ResultStore;
use chrono::{DateTime, Duration, Utc};
use hookline_common::types::{
    generate_rid, CampaignId, EmailAddress, OwnerId, PageId, SendingProfileId, TemplateId,
};
use hookline_storage::{
    Campaign, CampaignResult, CampaignStatus, CreateCampaign, CreateTarget, MailLogCounts,
    MailLogState, RecipientFields, ResultEvent, ResultStatus, CANCELLED_ERROR,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Campaign manager errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign name is required")]
    MissingName,

    #[error("Campaign has no targets")]
    NoTargets,

    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Invalid target email: {0}")]
    InvalidEmail(String),

    #[error("send_by_date must be after launch_date")]
    InvalidSendWindow,

    #[error("Template not found")]
    TemplateNotFound,

    #[error("Sending profile not found")]
    SendingProfileNotFound,

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error(transparent)]
    Store(#[from] hookline_common::Error),
}

impl From<CampaignError> for hookline_common::Error {
    fn from(err: CampaignError) -> Self {
        match err {
            CampaignError::NotFound => hookline_common::Error::NotFound("Campaign".to_string()),
            CampaignError::InvalidTemplate(msg) => hookline_common::Error::Template(msg),
            CampaignError::Store(e) => e,
            other => hookline_common::Error::Validation(other.to_string()),
        }
    }
}

/// Launch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub template_id: TemplateId,
    #[serde(default)]
    pub page_id: Option<PageId>,
    pub sending_profile_id: SendingProfileId,
    /// Landing page exposed to templates as `base_url`
    #[serde(default)]
    pub url: String,
    /// Defaults to now
    #[serde(default)]
    pub launch_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub send_by_date: Option<DateTime<Utc>>,
    pub targets: Vec<RecipientFields>,
}

/// Cumulative per-status counts; a clicked target also counts as sent and opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: i64,
    pub sent: i64,
    pub opened: i64,
    pub clicked: i64,
    pub submitted_data: i64,
    pub reported: i64,
    pub error: i64,
}

impl CampaignStats {
    fn from_counts(counts: &std::collections::HashMap<ResultStatus, i64>) -> Self {
        let reached = |floor: ResultStatus| -> i64 {
            counts
                .iter()
                .filter(|(status, _)| match (status.rank(), floor.rank()) {
                    (Some(rank), Some(floor)) => rank >= floor,
                    _ => false,
                })
                .map(|(_, n)| *n)
                .sum()
        };

        Self {
            total: counts.values().sum(),
            sent: reached(ResultStatus::Sent),
            opened: reached(ResultStatus::Opened),
            clicked: reached(ResultStatus::Clicked),
            submitted_data: reached(ResultStatus::SubmittedData),
            reported: reached(ResultStatus::Reported),
            error: counts.get(&ResultStatus::Error).copied().unwrap_or(0),
        }
    }
}

/// Campaign with its statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign: Campaign,
    pub stats: CampaignStats,
}

/// Outcome of a cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub campaign: Campaign,
    /// Pending sends that were stopped
    pub cancelled: usize,
}

/// Send time of target `index` out of `count`.
///
/// Without a send-by date every target goes at launch; otherwise targets are
/// spread evenly over `[launch, send_by)`.
pub fn compute_send_times(
    launch: DateTime<Utc>,
    send_by: Option<DateTime<Utc>>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let Some(send_by) = send_by.filter(|end| *end > launch) else {
        return vec![launch; count];
    };

    let span_ms = (send_by - launch).num_milliseconds() as i128;
    (0..count)
        .map(|i| {
            let offset = span_ms * i as i128 / count as i128;
            launch + Duration::milliseconds(offset as i64)
        })
        .collect()
}

/// Campaign Manager - owns the campaign lifecycle around the send queue
pub struct CampaignManager {
    repos: Repositories,
    mail_log: MailLog,
    results: ResultStore,
    renderer: Arc<dyn TemplateRenderer>,
    clock: Arc<dyn Clock>,
}

impl CampaignManager {
    pub fn new(
        repos: Repositories,
        mail_log: MailLog,
        results: ResultStore,
        renderer: Arc<dyn TemplateRenderer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repos,
            mail_log,
            results,
            renderer,
            clock,
        }
    }

    /// Validate and persist a campaign with its schedule
    pub async fn launch(
        &self,
        owner_id: OwnerId,
        request: NewCampaign,
    ) -> Result<Campaign, CampaignError> {
        let now = self.clock.now();
        let launch_date = request.launch_date.unwrap_or(now);

        if request.name.trim().is_empty() {
            return Err(CampaignError::MissingName);
        }
        if request.targets.is_empty() {
            return Err(CampaignError::NoTargets);
        }
        if let Some(send_by) = request.send_by_date {
            if send_by <= launch_date {
                return Err(CampaignError::InvalidSendWindow);
            }
        }

        let template = self
            .repos
            .assets
            .get_template(owner_id, request.template_id)
            .await?
            .ok_or(CampaignError::TemplateNotFound)?;
        self.renderer
            .validate(&template)
            .map_err(|e| CampaignError::InvalidTemplate(e.to_string()))?;

        self.repos
            .assets
            .get_sending_profile(owner_id, request.sending_profile_id)
            .await?
            .ok_or(CampaignError::SendingProfileNotFound)?;

        let recipients = normalize_targets(request.targets)?;
        let send_times = compute_send_times(launch_date, request.send_by_date, recipients.len());

        let mut rids = HashSet::with_capacity(recipients.len());
        let targets: Vec<CreateTarget> = recipients
            .into_iter()
            .zip(send_times)
            .map(|(recipient, send_at)| {
                let mut rid = generate_rid();
                while !rids.insert(rid.clone()) {
                    rid = generate_rid();
                }
                CreateTarget {
                    recipient,
                    rid,
                    send_at,
                }
            })
            .collect();
        let target_count = targets.len();

        let input = CreateCampaign {
            owner_id,
            name: request.name.trim().to_string(),
            template_id: request.template_id,
            page_id: request.page_id,
            sending_profile_id: request.sending_profile_id,
            url: request.url,
            launch_date,
            send_by_date: request.send_by_date,
        };

        let campaign = self
            .repos
            .campaigns
            .create(
                input,
                targets,
                self.mail_log.retry_policy().max_retries,
                now,
            )
            .await?;

        info!(
            campaign_id = %campaign.id,
            owner_id = %owner_id,
            targets = target_count,
            launch_date = %campaign.launch_date,
            "Campaign launched"
        );
        Ok(campaign)
    }

    /// Stop every pending send.
    ///
    /// Entries already locked may still deliver, but a failed or expired
    /// attempt on them ends in `error` instead of going back to the queue.
    pub async fn cancel(
        &self,
        owner_id: OwnerId,
        campaign_id: CampaignId,
    ) -> Result<CancelOutcome, CampaignError> {
        self.owned(owner_id, campaign_id).await?;
        let now = self.clock.now();

        // Flag first so nothing drained below can be claimed again
        if !self.repos.campaigns.mark_cancelled(campaign_id, now).await? {
            debug!(campaign_id = %campaign_id, "Campaign was already cancelled");
        }

        let drained = self.mail_log.cancel_pending(campaign_id, now).await?;
        for entry in &drained {
            self.results
                .mark_error(campaign_id, entry.target_id, CANCELLED_ERROR, now)
                .await?;
        }
        self.refresh_status(campaign_id).await?;

        info!(
            campaign_id = %campaign_id,
            cancelled = drained.len(),
            "Campaign cancelled"
        );

        let campaign = self.owned(owner_id, campaign_id).await?;
        Ok(CancelOutcome {
            campaign,
            cancelled: drained.len(),
        })
    }

    /// Recompute the campaign status from its mail log and persist it if it changed.
    ///
    /// Results still `queued` behind a finished mail log entry are brought in
    /// line first.
    pub async fn refresh_status(&self, campaign_id: CampaignId) -> Result<CampaignStatus, CampaignError> {
        let campaign = self
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let counts = self.mail_log.state_counts(campaign_id).await?;
        self.reconcile_results(campaign_id, &counts).await?;
        let status = match counts.derive_status() {
            // A retry back to pending does not un-start a campaign
            CampaignStatus::Queued if campaign.status == CampaignStatus::InProgress => {
                CampaignStatus::InProgress
            }
            derived => derived,
        };
        if status == campaign.status {
            return Ok(status);
        }

        let completed_at = if status.is_finished() {
            Some(campaign.completed_at.unwrap_or_else(|| self.clock.now()))
        } else {
            None
        };
        self.repos
            .campaigns
            .set_status(campaign_id, status, completed_at)
            .await?;

        info!(
            campaign_id = %campaign_id,
            from = %campaign.status,
            to = %status,
            pending = counts.pending,
            locked = counts.locked,
            sent = counts.sent,
            error = counts.error,
            "Campaign status changed"
        );
        Ok(status)
    }

    /// Copy finished mail log outcomes onto results left `queued`.
    ///
    /// A result write can fail after the mail log write committed. Every
    /// queued result normally has a pending or locked entry, so a surplus
    /// means some need repair.
    async fn reconcile_results(
        &self,
        campaign_id: CampaignId,
        counts: &MailLogCounts,
    ) -> Result<usize, CampaignError> {
        let queued = self
            .results
            .status_counts(campaign_id)
            .await?
            .get(&ResultStatus::Queued)
            .copied()
            .unwrap_or(0);
        if queued <= counts.pending + counts.locked {
            return Ok(0);
        }

        let statuses: HashMap<_, _> = self
            .results
            .list(campaign_id)
            .await?
            .into_iter()
            .map(|r| (r.target_id, r.status))
            .collect();
        let now = self.clock.now();

        let mut repaired = 0;
        for entry in self.mail_log.list_by_campaign(campaign_id).await? {
            if statuses.get(&entry.target_id) != Some(&ResultStatus::Queued) {
                continue;
            }
            let changed = match entry.state {
                MailLogState::Sent => {
                    self.results
                        .mark_sent(campaign_id, entry.target_id, now)
                        .await?
                }
                MailLogState::Error => {
                    let reason = entry.last_error.as_deref().unwrap_or("delivery failed");
                    self.results
                        .mark_error(campaign_id, entry.target_id, reason, now)
                        .await?
                }
                MailLogState::Pending | MailLogState::Locked => false,
            };
            if changed {
                warn!(
                    campaign_id = %campaign_id,
                    target_id = %entry.target_id,
                    state = %entry.state,
                    "Repaired result left behind its mail log entry"
                );
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    pub async fn stats(
        &self,
        owner_id: OwnerId,
        campaign_id: CampaignId,
    ) -> Result<CampaignStats, CampaignError> {
        self.owned(owner_id, campaign_id).await?;
        self.refresh_status(campaign_id).await?;
        let counts = self.results.status_counts(campaign_id).await?;
        Ok(CampaignStats::from_counts(&counts))
    }

    pub async fn summary(
        &self,
        owner_id: OwnerId,
        campaign_id: CampaignId,
    ) -> Result<CampaignSummary, CampaignError> {
        self.owned(owner_id, campaign_id).await?;
        self.refresh_status(campaign_id).await?;
        let campaign = self.owned(owner_id, campaign_id).await?;
        let counts = self.results.status_counts(campaign_id).await?;
        Ok(CampaignSummary {
            campaign,
            stats: CampaignStats::from_counts(&counts),
        })
    }

    pub async fn results(
        &self,
        owner_id: OwnerId,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignResult>, CampaignError> {
        self.owned(owner_id, campaign_id).await?;
        Ok(self.results.list(campaign_id).await?)
    }

    /// Every tracking event of the campaign in arrival order
    pub async fn timeline(
        &self,
        owner_id: OwnerId,
        campaign_id: CampaignId,
    ) -> Result<Vec<ResultEvent>, CampaignError> {
        self.owned(owner_id, campaign_id).await?;
        Ok(self.results.events(campaign_id).await?)
    }

    pub async fn list(&self, owner_id: OwnerId) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.repos.campaigns.list_by_owner(owner_id).await?)
    }

    /// Delete a campaign and everything it owns
    pub async fn delete(&self, owner_id: OwnerId, campaign_id: CampaignId) -> Result<(), CampaignError> {
        if !self.repos.campaigns.delete(owner_id, campaign_id).await? {
            return Err(CampaignError::NotFound);
        }
        info!(campaign_id = %campaign_id, owner_id = %owner_id, "Campaign deleted");
        Ok(())
    }

    async fn owned(&self, owner_id: OwnerId, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        self.repos
            .campaigns
            .get_for_owner(owner_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }
}

/// Trim fields, check addresses and reject repeated emails
fn normalize_targets(targets: Vec<RecipientFields>) -> Result<Vec<RecipientFields>, CampaignError> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .into_iter()
        .map(|target| {
            let email = target.email.trim().to_string();
            if EmailAddress::parse(&email).is_none() {
                return Err(CampaignError::InvalidEmail(email));
            }
            if !seen.insert(email.to_lowercase()) {
                return Err(CampaignError::DuplicateTarget(email));
            }
            Ok(RecipientFields {
                email,
                first_name: target.first_name.trim().to_string(),
                last_name: target.last_name.trim().to_string(),
                position: target.position.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_send_times_without_window() {
        assert_eq!(compute_send_times(t0(), None, 3), vec![t0(); 3]);
        assert!(compute_send_times(t0(), None, 0).is_empty());
    }

    #[test]
    fn test_send_times_spread_evenly() {
        let times = compute_send_times(t0(), Some(t0() + Duration::hours(1)), 4);
        assert_eq!(
            times,
            vec![
                t0(),
                t0() + Duration::minutes(15),
                t0() + Duration::minutes(30),
                t0() + Duration::minutes(45),
            ]
        );
    }

    #[test]
    fn test_stats_are_cumulative() {
        let counts = HashMap::from([
            (ResultStatus::Queued, 2),
            (ResultStatus::Sent, 3),
            (ResultStatus::Clicked, 1),
            (ResultStatus::Reported, 1),
            (ResultStatus::Error, 2),
        ]);

        assert_eq!(
            CampaignStats::from_counts(&counts),
            CampaignStats {
                total: 9,
                sent: 5,
                opened: 2,
                clicked: 2,
                submitted_data: 1,
                reported: 1,
                error: 2,
            }
        );
    }

    #[test]
    fn test_normalize_targets() {
        let targets = vec![
            RecipientFields {
                email: " Alice@example.com ".to_string(),
                first_name: "Alice ".to_string(),
                ..Default::default()
            },
            RecipientFields {
                email: "bob@example.com".to_string(),
                ..Default::default()
            },
        ];
        let normalized = normalize_targets(targets).unwrap();
        assert_eq!(normalized[0].email, "Alice@example.com");
        assert_eq!(normalized[0].first_name, "Alice");

        let dupes = vec![
            RecipientFields {
                email: "alice@example.com".to_string(),
                ..Default::default()
            },
            RecipientFields {
                email: "ALICE@example.com".to_string(),
                ..Default::default()
            },
        ];
        assert!(matches!(
            normalize_targets(dupes),
            Err(CampaignError::DuplicateTarget(_))
        ));

        let bad = vec![RecipientFields {
            email: "not-an-address".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            normalize_targets(bad),
            Err(CampaignError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        let err: hookline_common::Error = CampaignError::NoTargets.into();
        assert_eq!(err.status_code(), 422);
        let err: hookline_common::Error = CampaignError::NotFound.into();
        assert_eq!(err.status_code(), 404);
    }
}
