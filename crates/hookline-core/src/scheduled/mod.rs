//! Scheduled delivery - campaign lifecycle, pacing and the scheduler loop

mod manager;
mod rate_limiter;
mod scheduler;

pub use manager::{
    compute_send_times, CampaignError, CampaignManager, CampaignStats, CampaignSummary,
    CancelOutcome, NewCampaign,
};
pub use rate_limiter::{RateLimiter, RemainingQuota};
pub use scheduler::{Scheduler, SchedulerOptions, TickReport};
