//! In-memory store
//!
//! [`MemoryStore`] implements every repository trait over plain maps behind a
//! single lock, so each operation is atomic in the same way the conditional
//! SQL writes are. Used by tests and single-process embedding.
//!
//! Not durable: everything is lost when the process exits.

use crate::models::{
    Campaign, CampaignResult, CampaignStatus, CreateCampaign, CreateTarget, MailLogCounts,
    MailLogEntry, MailLogState, MessageTemplate, NewResultEvent, RecordedEvent, ResultEvent,
    ResultStatus, SendingProfile, Target,
};
use crate::repository::mail_logs::{FailureReport, CANCELLED_ERROR, LEASE_EXHAUSTED_ERROR};
use crate::repository::{AssetRepository, CampaignRepository, MailLogRepository, ResultRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hookline_common::types::{
    CampaignId, MailLogId, OwnerId, SendingProfileId, TargetId, TemplateId,
};
use hookline_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    targets: HashMap<TargetId, Target>,
    mail_logs: HashMap<MailLogId, MailLogEntry>,
    results: HashMap<TargetId, CampaignResult>,
    events: Vec<ResultEvent>,
    templates: HashMap<TemplateId, MessageTemplate>,
    profiles: HashMap<SendingProfileId, SendingProfile>,
}

fn is_cancelled(campaigns: &HashMap<CampaignId, Campaign>, id: CampaignId) -> bool {
    campaigns
        .get(&id)
        .map(|c| c.cancelled_at.is_some())
        .unwrap_or(false)
}

impl State {
    fn result_by_rid_mut(
        &mut self,
        campaign_id: CampaignId,
        rid: &str,
    ) -> Option<&mut CampaignResult> {
        self.results
            .values_mut()
            .find(|r| r.campaign_id == campaign_id && r.rid == rid)
    }

    fn result_by_target_mut(
        &mut self,
        campaign_id: CampaignId,
        target_id: TargetId,
    ) -> Option<&mut CampaignResult> {
        self.results
            .get_mut(&target_id)
            .filter(|r| r.campaign_id == campaign_id)
    }
}

/// In-memory implementation of all repositories
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store offline".to_string()))
        }
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> Result<R>) -> Result<R> {
        self.check_available()?;
        let state = self.state.read().map_err(poison_err)?;
        f(&state)
    }

    fn write<R>(&self, f: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        self.check_available()?;
        let mut state = self.state.write().map_err(poison_err)?;
        f(&mut state)
    }

    /// Seed a message template
    pub fn insert_template(&self, template: MessageTemplate) -> Result<()> {
        self.write(|state| {
            state.templates.insert(template.id, template);
            Ok(())
        })
    }

    /// Seed a sending profile
    pub fn insert_sending_profile(&self, profile: SendingProfile) -> Result<()> {
        self.write(|state| {
            state.profiles.insert(profile.id, profile);
            Ok(())
        })
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(
        &self,
        input: CreateCampaign,
        targets: Vec<CreateTarget>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        self.write(|state| {
            let mut emails = HashSet::new();
            let mut rids = HashSet::new();
            for target in &targets {
                if !emails.insert(target.recipient.email.as_str()) {
                    return Err(Error::DuplicateKey(format!(
                        "target email {}",
                        target.recipient.email
                    )));
                }
                if !rids.insert(target.rid.as_str()) {
                    return Err(Error::DuplicateKey(format!("target rid {}", target.rid)));
                }
            }

            let campaign = Campaign {
                id: Uuid::now_v7(),
                owner_id: input.owner_id,
                name: input.name,
                template_id: input.template_id,
                page_id: input.page_id,
                sending_profile_id: input.sending_profile_id,
                url: input.url,
                launch_date: input.launch_date,
                send_by_date: input.send_by_date,
                status: CampaignStatus::Queued,
                created_at: now,
                completed_at: None,
                cancelled_at: None,
            };

            for target in targets {
                let target_id = Uuid::now_v7();
                state.results.insert(
                    target_id,
                    CampaignResult {
                        id: Uuid::now_v7(),
                        campaign_id: campaign.id,
                        target_id,
                        rid: target.rid.clone(),
                        recipient: target.recipient.clone(),
                        status: ResultStatus::Queued,
                        send_date: None,
                        last_transition_at: now,
                        last_error: None,
                    },
                );
                let entry = new_entry(campaign.id, target_id, target.send_at, max_retries, now);
                state.mail_logs.insert(entry.id, entry);
                state.targets.insert(
                    target_id,
                    Target {
                        id: target_id,
                        campaign_id: campaign.id,
                        recipient: target.recipient,
                        rid: target.rid,
                    },
                );
            }

            state.campaigns.insert(campaign.id, campaign.clone());
            Ok(campaign)
        })
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.read(|state| Ok(state.campaigns.get(&id).cloned()))
    }

    async fn get_for_owner(&self, owner_id: OwnerId, id: CampaignId) -> Result<Option<Campaign>> {
        self.read(|state| {
            Ok(state
                .campaigns
                .get(&id)
                .filter(|c| c.owner_id == owner_id)
                .cloned())
        })
    }

    async fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Campaign>> {
        self.read(|state| {
            let mut campaigns: Vec<Campaign> = state
                .campaigns
                .values()
                .filter(|c| c.owner_id == owner_id)
                .cloned()
                .collect();
            campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(campaigns)
        })
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<Target>> {
        self.read(|state| Ok(state.targets.get(&id).cloned()))
    }

    async fn list_targets(&self, campaign_id: CampaignId) -> Result<Vec<Target>> {
        self.read(|state| {
            let mut targets: Vec<Target> = state
                .targets
                .values()
                .filter(|t| t.campaign_id == campaign_id)
                .cloned()
                .collect();
            targets.sort_by_key(|t| t.id);
            Ok(targets)
        })
    }

    async fn set_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.write(|state| {
            if let Some(campaign) = state.campaigns.get_mut(&id) {
                campaign.status = status;
                campaign.completed_at = completed_at;
            }
            Ok(())
        })
    }

    async fn mark_cancelled(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool> {
        self.write(|state| match state.campaigns.get_mut(&id) {
            Some(campaign) if campaign.cancelled_at.is_none() => {
                campaign.cancelled_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn delete(&self, owner_id: OwnerId, id: CampaignId) -> Result<bool> {
        self.write(|state| {
            let owned = state
                .campaigns
                .get(&id)
                .map(|c| c.owner_id == owner_id)
                .unwrap_or(false);
            if !owned {
                return Ok(false);
            }

            state.campaigns.remove(&id);
            state.targets.retain(|_, t| t.campaign_id != id);
            state.mail_logs.retain(|_, m| m.campaign_id != id);
            state.results.retain(|_, r| r.campaign_id != id);
            state.events.retain(|e| e.campaign_id != id);
            Ok(true)
        })
    }
}

fn new_entry(
    campaign_id: CampaignId,
    target_id: TargetId,
    send_at: DateTime<Utc>,
    max_retries: i32,
    now: DateTime<Utc>,
) -> MailLogEntry {
    MailLogEntry {
        id: Uuid::now_v7(),
        campaign_id,
        target_id,
        send_at,
        state: MailLogState::Pending,
        lock_owner: None,
        lock_expires_at: None,
        retry_count: 0,
        max_retries,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

fn release(entry: &mut MailLogEntry, now: DateTime<Utc>) {
    entry.lock_owner = None;
    entry.lock_expires_at = None;
    entry.updated_at = now;
}

#[async_trait]
impl MailLogRepository for MemoryStore {
    async fn enqueue(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        send_at: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<MailLogEntry> {
        self.write(|state| {
            let exists = state
                .mail_logs
                .values()
                .any(|m| m.campaign_id == campaign_id && m.target_id == target_id);
            if exists {
                return Err(Error::DuplicateKey(format!(
                    "mail log for campaign {} target {}",
                    campaign_id, target_id
                )));
            }

            let entry = new_entry(campaign_id, target_id, send_at, max_retries, now);
            state.mail_logs.insert(entry.id, entry.clone());
            Ok(entry)
        })
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> Result<Vec<MailLogEntry>> {
        self.write(|state| {
            let State {
                ref campaigns,
                ref mut mail_logs,
                ..
            } = *state;
            let mut due: Vec<&mut MailLogEntry> = mail_logs
                .values_mut()
                .filter(|m| m.state == MailLogState::Pending && m.send_at <= now)
                .filter(|m| !is_cancelled(campaigns, m.campaign_id))
                .collect();
            due.sort_by_key(|m| (m.send_at, m.id));

            let claimed = due
                .into_iter()
                .take(limit)
                .map(|entry| {
                    entry.state = MailLogState::Locked;
                    entry.lock_owner = Some(owner.to_string());
                    entry.lock_expires_at = Some(now + lease);
                    entry.updated_at = now;
                    entry.clone()
                })
                .collect();
            Ok(claimed)
        })
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailLogEntry>> {
        self.write(|state| {
            let State {
                ref campaigns,
                ref mut mail_logs,
                ..
            } = *state;
            let mut reclaimed = Vec::new();
            for entry in mail_logs.values_mut() {
                let expired = entry.state == MailLogState::Locked
                    && entry.lock_expires_at.map(|at| at <= now).unwrap_or(true);
                if !expired {
                    continue;
                }

                if is_cancelled(campaigns, entry.campaign_id) {
                    entry.state = MailLogState::Error;
                    entry.last_error = Some(CANCELLED_ERROR.to_string());
                } else if entry.can_retry() {
                    entry.state = MailLogState::Pending;
                    entry.retry_count += 1;
                } else {
                    entry.state = MailLogState::Error;
                    entry.last_error = Some(LEASE_EXHAUSTED_ERROR.to_string());
                }
                release(entry, now);
                reclaimed.push(entry.clone());
            }
            Ok(reclaimed)
        })
    }

    async fn complete(
        &self,
        id: MailLogId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        self.write(|state| match state.mail_logs.get_mut(&id) {
            Some(entry) if entry.is_held_by(owner) => {
                entry.state = MailLogState::Sent;
                entry.last_error = None;
                release(entry, now);
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        })
    }

    async fn fail(
        &self,
        id: MailLogId,
        owner: &str,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Option<MailLogEntry>> {
        self.write(|state| {
            let State {
                ref campaigns,
                ref mut mail_logs,
                ..
            } = *state;
            match mail_logs.get_mut(&id) {
                Some(entry) if entry.is_held_by(owner) => {
                    if is_cancelled(campaigns, entry.campaign_id) {
                        entry.state = MailLogState::Error;
                        entry.last_error = Some(if report.permanent {
                            report.error.clone()
                        } else {
                            CANCELLED_ERROR.to_string()
                        });
                    } else if !report.permanent && entry.can_retry() {
                        entry.state = MailLogState::Pending;
                        entry.send_at = now + report.backoff.delay(entry.retry_count);
                        entry.retry_count += 1;
                        entry.last_error = Some(report.error.clone());
                    } else {
                        entry.state = MailLogState::Error;
                        entry.last_error = Some(report.error.clone());
                    }
                    release(entry, now);
                    Ok(Some(entry.clone()))
                }
                _ => Ok(None),
            }
        })
    }

    async fn cancel_pending(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MailLogEntry>> {
        self.write(|state| {
            let cancelled = state
                .mail_logs
                .values_mut()
                .filter(|m| m.campaign_id == campaign_id && m.state == MailLogState::Pending)
                .map(|entry| {
                    entry.state = MailLogState::Error;
                    entry.last_error = Some(CANCELLED_ERROR.to_string());
                    entry.updated_at = now;
                    entry.clone()
                })
                .collect();
            Ok(cancelled)
        })
    }

    async fn state_counts(&self, campaign_id: CampaignId) -> Result<MailLogCounts> {
        self.read(|state| {
            let mut counts = MailLogCounts::default();
            for entry in state
                .mail_logs
                .values()
                .filter(|m| m.campaign_id == campaign_id)
            {
                counts.add(entry.state, 1);
            }
            Ok(counts)
        })
    }

    async fn get(&self, id: MailLogId) -> Result<Option<MailLogEntry>> {
        self.read(|state| Ok(state.mail_logs.get(&id).cloned()))
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<MailLogEntry>> {
        self.read(|state| {
            let mut entries: Vec<MailLogEntry> = state
                .mail_logs
                .values()
                .filter(|m| m.campaign_id == campaign_id)
                .cloned()
                .collect();
            entries.sort_by_key(|m| (m.send_at, m.id));
            Ok(entries)
        })
    }
}

#[async_trait]
impl ResultRepository for MemoryStore {
    async fn get_by_rid(
        &self,
        campaign_id: CampaignId,
        rid: &str,
    ) -> Result<Option<CampaignResult>> {
        self.read(|state| {
            Ok(state
                .results
                .values()
                .find(|r| r.campaign_id == campaign_id && r.rid == rid)
                .cloned())
        })
    }

    async fn get_by_target(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
    ) -> Result<Option<CampaignResult>> {
        self.read(|state| {
            Ok(state
                .results
                .get(&target_id)
                .filter(|r| r.campaign_id == campaign_id)
                .cloned())
        })
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignResult>> {
        self.read(|state| {
            let mut results: Vec<CampaignResult> = state
                .results
                .values()
                .filter(|r| r.campaign_id == campaign_id)
                .cloned()
                .collect();
            results.sort_by(|a, b| a.recipient.email.cmp(&b.recipient.email));
            Ok(results)
        })
    }

    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.write(|state| match state.result_by_target_mut(campaign_id, target_id) {
            Some(result) if result.status == ResultStatus::Queued => {
                result.status = ResultStatus::Sent;
                result.send_date = Some(now);
                result.last_transition_at = now;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn mark_error(
        &self,
        campaign_id: CampaignId,
        target_id: TargetId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.write(|state| match state.result_by_target_mut(campaign_id, target_id) {
            Some(result) if result.status != ResultStatus::Error => {
                result.status = ResultStatus::Error;
                result.last_error = Some(error.to_string());
                result.last_transition_at = now;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn record_event(
        &self,
        event: NewResultEvent,
        now: DateTime<Utc>,
    ) -> Result<RecordedEvent> {
        self.write(|state| {
            let result = state
                .result_by_rid_mut(event.campaign_id, &event.rid)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "No result for rId {} in campaign {}",
                        event.rid, event.campaign_id
                    ))
                })?;

            let previous = result.status;
            let next = event.kind.status();
            if previous.can_advance_to(next) {
                result.status = next;
                result.last_transition_at = now;
            }
            let current = result.status;

            let stored = ResultEvent {
                id: Uuid::now_v7(),
                campaign_id: event.campaign_id,
                rid: event.rid,
                kind: event.kind,
                details: event.details,
                occurred_at: event.occurred_at,
                recorded_at: now,
            };
            state.events.push(stored.clone());

            Ok(RecordedEvent {
                event: stored,
                previous,
                current,
            })
        })
    }

    async fn list_events(&self, campaign_id: CampaignId) -> Result<Vec<ResultEvent>> {
        self.read(|state| {
            Ok(state
                .events
                .iter()
                .filter(|e| e.campaign_id == campaign_id)
                .cloned()
                .collect())
        })
    }

    async fn status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<HashMap<ResultStatus, i64>> {
        self.read(|state| {
            let mut counts = HashMap::new();
            for result in state
                .results
                .values()
                .filter(|r| r.campaign_id == campaign_id)
            {
                *counts.entry(result.status).or_insert(0) += 1;
            }
            Ok(counts)
        })
    }
}

#[async_trait]
impl AssetRepository for MemoryStore {
    async fn get_template(
        &self,
        owner_id: OwnerId,
        id: TemplateId,
    ) -> Result<Option<MessageTemplate>> {
        self.read(|state| {
            Ok(state
                .templates
                .get(&id)
                .filter(|t| t.owner_id == owner_id)
                .cloned())
        })
    }

    async fn get_sending_profile(
        &self,
        owner_id: OwnerId,
        id: SendingProfileId,
    ) -> Result<Option<SendingProfile>> {
        self.read(|state| {
            Ok(state
                .profiles
                .get(&id)
                .filter(|p| p.owner_id == owner_id)
                .cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Backoff, EventKind, RecipientFields};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::seconds(60), Duration::hours(4))
    }

    async fn launch(store: &MemoryStore, emails: &[&str], max_retries: i32) -> Campaign {
        let input = CreateCampaign {
            owner_id: Uuid::new_v4(),
            name: "Quarterly phish".to_string(),
            template_id: Uuid::new_v4(),
            page_id: None,
            sending_profile_id: Uuid::new_v4(),
            url: "https://landing.example.com".to_string(),
            launch_date: t0(),
            send_by_date: None,
        };
        let targets = emails
            .iter()
            .enumerate()
            .map(|(i, email)| CreateTarget {
                recipient: RecipientFields {
                    email: email.to_string(),
                    ..Default::default()
                },
                rid: format!("rid{:04}", i),
                send_at: t0(),
            })
            .collect();
        store.create(input, targets, max_retries, t0()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_materializes_children() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test", "b@x.test"], 3).await;

        let entries = MailLogRepository::list_by_campaign(&store, campaign.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.state == MailLogState::Pending));

        let counts = ResultRepository::status_counts(&store, campaign.id).await.unwrap();
        assert_eq!(counts.get(&ResultStatus::Queued), Some(&2));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_email() {
        let store = MemoryStore::new();
        let input = CreateCampaign {
            owner_id: Uuid::new_v4(),
            name: "dup".to_string(),
            template_id: Uuid::new_v4(),
            page_id: None,
            sending_profile_id: Uuid::new_v4(),
            url: String::new(),
            launch_date: t0(),
            send_by_date: None,
        };
        let target = |rid: &str| CreateTarget {
            recipient: RecipientFields {
                email: "same@x.test".to_string(),
                ..Default::default()
            },
            rid: rid.to_string(),
            send_at: t0(),
        };

        let err = store
            .create(input, vec![target("aaaaaaa"), target("bbbbbbb")], 3, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_pair() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test"], 3).await;
        let entry = MailLogRepository::list_by_campaign(&store, campaign.id).await.unwrap().remove(0);

        let err = store
            .enqueue(campaign.id, entry.target_id, t0(), 3, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let store = Arc::new(MemoryStore::new());
        let emails: Vec<String> = (0..20).map(|i| format!("u{}@x.test", i)).collect();
        let refs: Vec<&str> = emails.iter().map(String::as_str).collect();
        launch(&store, &refs, 3).await;

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_due(t0(), 8, &format!("worker-{}", worker), Duration::minutes(2))
                    .await
                    .unwrap()
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for entry in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(entry.id), "entry claimed twice");
            }
        }
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_claim_skips_future_entries() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test"], 3).await;

        let claimed = store
            .claim_due(t0() - Duration::seconds(1), 10, "w", Duration::minutes(2))
            .await
            .unwrap();
        assert!(claimed.is_empty());

        let claimed = store
            .claim_due(t0(), 10, "w", Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].campaign_id, campaign.id);
        assert_eq!(claimed[0].lock_expires_at, Some(t0() + Duration::minutes(2)));
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_complete() {
        let store = MemoryStore::new();
        launch(&store, &["a@x.test"], 3).await;

        let entry = store
            .claim_due(t0(), 1, "old", Duration::seconds(30))
            .await
            .unwrap()
            .remove(0);

        let reclaimed = store.reclaim_expired(t0() + Duration::seconds(31)).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].retry_count, 1);

        store
            .claim_due(t0() + Duration::seconds(32), 1, "new", Duration::seconds(30))
            .await
            .unwrap();

        let now = t0() + Duration::seconds(33);
        assert!(store.complete(entry.id, "old", now).await.unwrap().is_none());
        let done = store.complete(entry.id, "new", now).await.unwrap().unwrap();
        assert_eq!(done.state, MailLogState::Sent);
        assert!(store.complete(entry.id, "new", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let store = MemoryStore::new();
        launch(&store, &["a@x.test", "b@x.test"], 3).await;
        store
            .claim_due(t0(), 2, "w", Duration::seconds(30))
            .await
            .unwrap();

        let later = t0() + Duration::minutes(5);
        assert_eq!(store.reclaim_expired(later).await.unwrap().len(), 2);
        assert!(store.reclaim_expired(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_exhausted_entry_errors() {
        let store = MemoryStore::new();
        launch(&store, &["a@x.test"], 0).await;
        store
            .claim_due(t0(), 1, "w", Duration::seconds(30))
            .await
            .unwrap();

        let reclaimed = store
            .reclaim_expired(t0() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(reclaimed[0].state, MailLogState::Error);
        assert_eq!(reclaimed[0].last_error.as_deref(), Some(LEASE_EXHAUSTED_ERROR));
    }

    #[tokio::test]
    async fn test_transient_fail_reschedules_with_backoff() {
        let store = MemoryStore::new();
        launch(&store, &["a@x.test"], 2).await;
        let report = FailureReport {
            error: "421 try later".to_string(),
            permanent: false,
            backoff: backoff(),
        };

        let mut now = t0();
        for expected_retry in 1..=2 {
            let entry = store
                .claim_due(now, 1, "w", Duration::minutes(2))
                .await
                .unwrap()
                .remove(0);
            let failed = store.fail(entry.id, "w", &report, now).await.unwrap().unwrap();
            assert_eq!(failed.state, MailLogState::Pending);
            assert_eq!(failed.retry_count, expected_retry);
            assert_eq!(failed.send_at, now + backoff().delay(expected_retry - 1));
            now = failed.send_at;
        }

        let entry = store
            .claim_due(now, 1, "w", Duration::minutes(2))
            .await
            .unwrap()
            .remove(0);
        let failed = store.fail(entry.id, "w", &report, now).await.unwrap().unwrap();
        assert_eq!(failed.state, MailLogState::Error);
        assert_eq!(failed.retry_count, 2);
    }

    #[tokio::test]
    async fn test_cancel_pending_leaves_locked() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test", "b@x.test", "c@x.test"], 3).await;
        store
            .claim_due(t0(), 1, "w", Duration::minutes(2))
            .await
            .unwrap();

        let cancelled = store.cancel_pending(campaign.id, t0()).await.unwrap();
        assert_eq!(cancelled.len(), 2);

        let counts = store.state_counts(campaign.id).await.unwrap();
        assert_eq!(
            counts,
            MailLogCounts {
                pending: 0,
                locked: 1,
                sent: 0,
                error: 2
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_campaign_never_returns_to_queue() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test", "b@x.test", "c@x.test"], 3).await;
        let held = store
            .claim_due(t0(), 2, "w", Duration::minutes(2))
            .await
            .unwrap();
        assert!(store.mark_cancelled(campaign.id, t0()).await.unwrap());

        // The third entry is still pending but belongs to a cancelled campaign
        assert!(store
            .claim_due(t0(), 10, "other", Duration::minutes(2))
            .await
            .unwrap()
            .is_empty());

        let report = FailureReport {
            error: "421 try later".to_string(),
            permanent: false,
            backoff: backoff(),
        };
        let failed = store.fail(held[0].id, "w", &report, t0()).await.unwrap().unwrap();
        assert_eq!(failed.state, MailLogState::Error);
        assert_eq!(failed.retry_count, 0);
        assert_eq!(failed.last_error.as_deref(), Some(CANCELLED_ERROR));

        let reclaimed = store
            .reclaim_expired(t0() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, held[1].id);
        assert_eq!(reclaimed[0].state, MailLogState::Error);
        assert_eq!(reclaimed[0].last_error.as_deref(), Some(CANCELLED_ERROR));
    }

    #[tokio::test]
    async fn test_record_event_is_monotonic() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test"], 3).await;
        let event = |kind| NewResultEvent {
            campaign_id: campaign.id,
            rid: "rid0000".to_string(),
            kind,
            details: serde_json::json!({}),
            occurred_at: t0(),
        };

        let clicked = store.record_event(event(EventKind::Clicked), t0()).await.unwrap();
        assert!(clicked.advanced());
        assert_eq!(clicked.current, ResultStatus::Clicked);

        let opened = store.record_event(event(EventKind::Opened), t0()).await.unwrap();
        assert!(!opened.advanced());
        assert_eq!(opened.current, ResultStatus::Clicked);

        assert_eq!(store.list_events(campaign.id).await.unwrap().len(), 2);

        let unknown = NewResultEvent {
            rid: "nope000".to_string(),
            ..event(EventKind::Opened)
        };
        assert!(matches!(
            store.record_event(unknown, t0()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.reclaim_expired(t0()).await.unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        assert!(store.reclaim_expired(t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_owner_scoped() {
        let store = MemoryStore::new();
        let campaign = launch(&store, &["a@x.test"], 3).await;

        assert!(!store.delete(Uuid::new_v4(), campaign.id).await.unwrap());
        assert!(store.delete(campaign.owner_id, campaign.id).await.unwrap());
        assert!(MailLogRepository::list_by_campaign(&store, campaign.id).await.unwrap().is_empty());
        assert!(CampaignRepository::get(&store, campaign.id).await.unwrap().is_none());
    }
}
