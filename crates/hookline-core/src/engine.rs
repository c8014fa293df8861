//! Engine - wires the components over one set of repositories

use crate::clock::Clock;
use crate::delivery::{Dispatcher, MailTransport, TemplateRenderer};
use crate::ingest::EventIngest;
use crate::mail_log::MailLog;
use crate::repos::Repositories;
use crate::result_store::ResultStore;
use crate::retry::RetryPolicy;
use crate::scheduled::{CampaignManager, RateLimiter, Scheduler, SchedulerOptions};
use chrono::Duration;
use hookline_common::Config;
use std::sync::Arc;

/// Knobs the engine needs from configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub scheduler: SchedulerOptions,
    pub retry: RetryPolicy,
    pub lease: Duration,
    pub max_per_minute: Option<u32>,
    pub tracking_base_url: String,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler: SchedulerOptions::from_config(config),
            retry: RetryPolicy::from_config(&config.retry),
            lease: Duration::seconds(config.scheduler.lease_secs as i64),
            max_per_minute: config.scheduler.max_per_minute,
            tracking_base_url: config.tracking.base_url.clone(),
        }
    }
}

/// Every engine component, sharing repositories and clock
#[derive(Clone)]
pub struct Engine {
    pub repos: Repositories,
    pub mail_log: MailLog,
    pub results: ResultStore,
    pub dispatcher: Arc<Dispatcher>,
    pub campaigns: Arc<CampaignManager>,
    pub scheduler: Arc<Scheduler>,
    pub ingest: EventIngest,
    pub clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        repos: Repositories,
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mail_log = MailLog::new(repos.mail_logs.clone(), options.retry, options.lease);
        let results = ResultStore::new(repos.results.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            repos.clone(),
            mail_log.clone(),
            results.clone(),
            Arc::clone(&renderer),
            transport,
            options.tracking_base_url,
            Arc::clone(&clock),
        ));
        let campaigns = Arc::new(CampaignManager::new(
            repos.clone(),
            mail_log.clone(),
            results.clone(),
            renderer,
            Arc::clone(&clock),
        ));
        let scheduler = Arc::new(Scheduler::new(
            mail_log.clone(),
            results.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&campaigns),
            Arc::new(RateLimiter::new(options.max_per_minute)),
            Arc::clone(&clock),
            options.scheduler,
        ));
        let ingest = EventIngest::new(results.clone(), Arc::clone(&clock));

        Self {
            repos,
            mail_log,
            results,
            dispatcher,
            campaigns,
            scheduler,
            ingest,
            clock,
        }
    }
}
