//! Hookline Core - campaign execution engine
//!
//! Turns a launched campaign into a durable schedule of outbound messages,
//! sends them with retry and lease semantics, and keeps each target's result
//! moving forward as tracking callbacks arrive.

pub mod clock;
pub mod delivery;
pub mod engine;
pub mod ingest;
pub mod mail_log;
pub mod repos;
pub mod result_store;
pub mod retry;
pub mod scheduled;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{
    DeliveryOutcome, DispatchReport, Dispatcher, LettreTransport, MailTransport,
    MiniJinjaRenderer, OutboundMessage, TemplateContext, TemplateError, TemplateRenderer,
    TransportError,
};
pub use engine::{Engine, EngineOptions};
pub use ingest::{EventIngest, IngestOutcome};
pub use mail_log::MailLog;
pub use repos::Repositories;
pub use result_store::ResultStore;
pub use retry::RetryPolicy;
pub use scheduled::{
    CampaignError, CampaignManager, CampaignStats, CampaignSummary, CancelOutcome, NewCampaign,
    RateLimiter, Scheduler, SchedulerOptions, TickReport,
};
