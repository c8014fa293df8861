//! Scheduler - polls the mail log and dispatches due entries
//!
//! A tick never waits for the sends it starts. Dispatches run on a task
//! tracker bounded by the concurrency permits, and the campaigns they touch
//! are refreshed at the start of the next tick.

use super::manager::{CampaignError, CampaignManager};
use super::rate_limiter::RateLimiter;
use crate::clock::Clock;
use crate::delivery::{DispatchReport, Dispatcher};
use crate::mail_log::MailLog;
use crate::result_store::ResultStore;
use chrono::{DateTime, Utc};
use hookline_common::config::Config;
use hookline_common::types::CampaignId;
use hookline_common::Result;
use hookline_storage::{MailLogState, LEASE_EXHAUSTED_ERROR};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Prefix of every lock owner this instance stamps
    pub instance_name: String,
    pub tick_interval: Duration,
    /// Maximum entries claimed per tick
    pub batch_size: usize,
    /// Maximum concurrent dispatches; a tick claims no more than the free slots
    pub concurrency: usize,
    /// Upper bound of the random pause before each send
    pub jitter: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            instance_name: config.server.instance_name.clone(),
            tick_interval: config.scheduler.tick_interval(),
            batch_size: config.scheduler.batch_size,
            concurrency: config.scheduler.concurrency,
            jitter: Duration::from_millis(config.scheduler.jitter_ms),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            instance_name: "hookline".to_string(),
            tick_interval: Duration::from_secs(1),
            batch_size: 100,
            concurrency: 10,
            jitter: Duration::ZERO,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub reclaimed: usize,
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub lease_lost: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.reclaimed == 0 && self.claimed == 0
    }

    fn count(&mut self, report: DispatchReport) {
        match report {
            DispatchReport::Sent => self.sent += 1,
            DispatchReport::Retried => self.retried += 1,
            DispatchReport::Failed => self.failed += 1,
            DispatchReport::LeaseLost => self.lease_lost += 1,
        }
    }
}

/// Campaigns whose status must be recomputed on the next refresh
#[derive(Debug, Default)]
struct DirtySet(Mutex<HashSet<CampaignId>>);

impl DirtySet {
    fn insert(&self, campaign_id: CampaignId) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(campaign_id);
    }

    fn take(&self) -> HashSet<CampaignId> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

type DispatchHandle = JoinHandle<Option<DispatchReport>>;

/// Scheduler - stateless across ticks; the mail log is the only shared state
pub struct Scheduler {
    mail_log: MailLog,
    results: ResultStore,
    dispatcher: Arc<Dispatcher>,
    manager: Arc<CampaignManager>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    dirty: Arc<DirtySet>,
}

impl Scheduler {
    pub fn new(
        mail_log: MailLog,
        results: ResultStore,
        dispatcher: Arc<Dispatcher>,
        manager: Arc<CampaignManager>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        Self {
            mail_log,
            results,
            dispatcher,
            manager,
            rate_limiter,
            clock,
            options,
            semaphore,
            tracker: TaskTracker::new(),
            dirty: Arc::new(DirtySet::default()),
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Dispatches still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Fresh lock owner for one tick, so a later tick of the same instance
    /// cannot finish an entry an earlier tick lost
    fn lock_owner(&self) -> String {
        format!("{}:{}", self.options.instance_name, Uuid::new_v4())
    }

    fn jitter(&self) -> Duration {
        let max = self.options.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Run until `shutdown` fires. Tick failures are logged and retried on
    /// the next tick. In-flight sends are drained before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            instance = %self.options.instance_name,
            concurrency = self.options.concurrency,
            batch_size = self.options.batch_size,
            interval_ms = self.options.tick_interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    match self.start_tick(now).await {
                        Ok((report, _detached)) if report.is_idle() => {}
                        Ok((report, _detached)) => debug!(
                            reclaimed = report.reclaimed,
                            claimed = report.claimed,
                            in_flight = self.tracker.len(),
                            "Scheduler tick dispatched"
                        ),
                        Err(e) if e.is_retryable() => {
                            warn!(error = %e, "Scheduler tick skipped, store unavailable")
                        }
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(in_flight = self.tracker.len(), "Waiting for in-flight sends");
        }
        self.tracker.wait().await;
        self.refresh_dirty().await;
        info!("Scheduler stopped");
    }

    /// One pass that also waits for the sends it started and refreshes the
    /// campaigns they touched
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let (mut report, handles) = self.start_tick(now).await?;
        for handle in handles {
            match handle.await {
                Ok(Some(dispatched)) => report.count(dispatched),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Dispatch task panicked"),
            }
        }
        self.refresh_dirty().await;
        Ok(report)
    }

    /// Refresh what earlier dispatches touched, reclaim expired leases, then
    /// claim as many due entries as there are free dispatch slots and start
    /// sending them without waiting
    async fn start_tick(&self, now: DateTime<Utc>) -> Result<(TickReport, Vec<DispatchHandle>)> {
        let mut report = TickReport::default();
        self.refresh_dirty().await;

        let reclaimed = self.mail_log.reclaim_expired(now).await?;
        report.reclaimed = reclaimed.len();
        for entry in &reclaimed {
            if entry.state == MailLogState::Error {
                let reason = entry.last_error.as_deref().unwrap_or(LEASE_EXHAUSTED_ERROR);
                if let Err(e) = self
                    .results
                    .mark_error(entry.campaign_id, entry.target_id, reason, now)
                    .await
                {
                    // Reconciled from the mail log on a later refresh
                    error!(
                        mail_log_id = %entry.id,
                        campaign_id = %entry.campaign_id,
                        error = %e,
                        "Failed to record exhausted lease on result"
                    );
                }
            }
            self.dirty.insert(entry.campaign_id);
        }
        if !reclaimed.is_empty() {
            self.refresh_dirty().await;
        }

        let mut permits = Vec::new();
        while permits.len() < self.options.batch_size {
            match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        if permits.is_empty() {
            debug!("Every dispatch slot busy, claim skipped");
            return Ok((report, Vec::new()));
        }

        let allowance = self.rate_limiter.acquire(permits.len(), now).await;
        if allowance == 0 {
            return Ok((report, Vec::new()));
        }

        let owner = self.lock_owner();
        let claimed = match self.mail_log.claim_due(now, allowance, &owner).await {
            Ok(claimed) => claimed,
            Err(e) => {
                self.rate_limiter.release(allowance).await;
                return Err(e);
            }
        };
        self.rate_limiter
            .release(allowance.saturating_sub(claimed.len()))
            .await;
        report.claimed = claimed.len();

        // Permits beyond the claimed count are dropped with the iterator
        let handles = claimed
            .into_iter()
            .zip(permits)
            .map(|(entry, permit)| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let dirty = Arc::clone(&self.dirty);
                let owner = owner.clone();
                let pause = self.jitter();

                self.tracker.spawn(async move {
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    let result = dispatcher.dispatch(&entry, &owner).await;
                    drop(permit);
                    dirty.insert(entry.campaign_id);

                    match result {
                        Ok(dispatched) => Some(dispatched),
                        Err(e) => {
                            // A failed mail log write leaves the entry locked
                            // until its lease expires; a failed result write is
                            // repaired by the next status refresh.
                            error!(
                                mail_log_id = %entry.id,
                                campaign_id = %entry.campaign_id,
                                error = %e,
                                "Failed to record dispatch outcome"
                            );
                            None
                        }
                    }
                })
            })
            .collect();

        Ok((report, handles))
    }

    /// Recompute the status of every campaign marked dirty. Failures stay
    /// marked for the next attempt.
    async fn refresh_dirty(&self) {
        for campaign_id in self.dirty.take() {
            if let Err(e) = self.manager.refresh_status(campaign_id).await {
                warn!(campaign_id = %campaign_id, error = %e, "Failed to refresh campaign status");
                if !matches!(e, CampaignError::NotFound) {
                    self.dirty.insert(campaign_id);
                }
            }
        }
    }
}
