//! Database models

use chrono::{DateTime, Duration, Utc};
use hookline_common::types::{
    CampaignId, MailLogId, OwnerId, PageId, ResultId, SendingProfileId, TargetId, TemplateId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Personal fields shared by a target and its result
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RecipientFields {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub position: String,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Queued,
    InProgress,
    Completed,
    Error,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Queued => "queued",
            CampaignStatus::InProgress => "in_progress",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Error => "error",
        }
    }

    /// Whether every entry of the campaign has reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Error)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CampaignStatus::Queued),
            "in_progress" => Ok(CampaignStatus::InProgress),
            "completed" => Ok(CampaignStatus::Completed),
            "error" => Ok(CampaignStatus::Error),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Campaign model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub owner_id: OwnerId,
    pub name: String,
    pub template_id: TemplateId,
    pub page_id: Option<PageId>,
    pub sending_profile_id: SendingProfileId,
    /// Landing page the click callback redirects to
    pub url: String,
    pub launch_date: DateTime<Utc>,
    pub send_by_date: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub owner_id: OwnerId,
    pub name: String,
    pub template_id: TemplateId,
    pub page_id: Option<PageId>,
    pub sending_profile_id: SendingProfileId,
    pub url: String,
    pub launch_date: DateTime<Utc>,
    pub send_by_date: Option<DateTime<Utc>>,
}

/// Campaign target, immutable once launched
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub campaign_id: CampaignId,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub recipient: RecipientFields,
    pub rid: String,
}

/// One target of a launch, with its rId and scheduled send time
#[derive(Debug, Clone)]
pub struct CreateTarget {
    pub recipient: RecipientFields,
    pub rid: String,
    pub send_at: DateTime<Utc>,
}

/// Mail log state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailLogState {
    Pending,
    Locked,
    Sent,
    Error,
}

impl MailLogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailLogState::Pending => "pending",
            MailLogState::Locked => "locked",
            MailLogState::Sent => "sent",
            MailLogState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MailLogState::Sent | MailLogState::Error)
    }
}

impl std::fmt::Display for MailLogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MailLogState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MailLogState::Pending),
            "locked" => Ok(MailLogState::Locked),
            "sent" => Ok(MailLogState::Sent),
            "error" => Ok(MailLogState::Error),
            _ => Err(format!("Invalid mail log state: {}", s)),
        }
    }
}

impl TryFrom<String> for MailLogState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// A unit of scheduled sending work
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MailLogEntry {
    pub id: MailLogId,
    pub campaign_id: CampaignId,
    pub target_id: TargetId,
    pub send_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub state: MailLogState,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailLogEntry {
    /// Check if a transient failure may be retried
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the entry is locked by `owner` right now
    pub fn is_held_by(&self, owner: &str) -> bool {
        self.state == MailLogState::Locked && self.lock_owner.as_deref() == Some(owner)
    }
}

/// Number of mail log entries per state for one campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailLogCounts {
    pub pending: i64,
    pub locked: i64,
    pub sent: i64,
    pub error: i64,
}

impl MailLogCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.locked + self.sent + self.error
    }

    pub fn add(&mut self, state: MailLogState, n: i64) {
        match state {
            MailLogState::Pending => self.pending += n,
            MailLogState::Locked => self.locked += n,
            MailLogState::Sent => self.sent += n,
            MailLogState::Error => self.error += n,
        }
    }

    /// Derive the campaign status these counts imply
    pub fn derive_status(&self) -> CampaignStatus {
        let terminal = self.sent + self.error;
        if self.pending + self.locked == 0 {
            if self.total() == 0 || self.sent == 0 {
                CampaignStatus::Error
            } else {
                CampaignStatus::Completed
            }
        } else if terminal == 0 && self.locked == 0 {
            CampaignStatus::Queued
        } else {
            CampaignStatus::InProgress
        }
    }
}

/// Exponential retry delay with an upper bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// Exponent ceiling; any larger shift is past every sane cap
    pub const MAX_EXPONENT: i32 = 30;

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the retry that follows attempt number `retry_count`
    pub fn delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, Self::MAX_EXPONENT) as u32;
        let secs = self.base.num_seconds().saturating_mul(1_i64 << exponent);
        if secs >= self.cap.num_seconds() {
            self.cap
        } else {
            Duration::seconds(secs)
        }
    }
}

/// Per-target result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Queued,
    Sent,
    Opened,
    Clicked,
    SubmittedData,
    Reported,
    Error,
}

impl ResultStatus {
    pub const ALL: [ResultStatus; 7] = [
        ResultStatus::Queued,
        ResultStatus::Sent,
        ResultStatus::Opened,
        ResultStatus::Clicked,
        ResultStatus::SubmittedData,
        ResultStatus::Reported,
        ResultStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Queued => "queued",
            ResultStatus::Sent => "sent",
            ResultStatus::Opened => "opened",
            ResultStatus::Clicked => "clicked",
            ResultStatus::SubmittedData => "submitted_data",
            ResultStatus::Reported => "reported",
            ResultStatus::Error => "error",
        }
    }

    /// Position on the progress ladder; `Error` sits outside it
    pub fn rank(&self) -> Option<u8> {
        match self {
            ResultStatus::Queued => Some(0),
            ResultStatus::Sent => Some(1),
            ResultStatus::Opened => Some(2),
            ResultStatus::Clicked => Some(3),
            ResultStatus::SubmittedData => Some(4),
            ResultStatus::Reported => Some(5),
            ResultStatus::Error => None,
        }
    }

    /// Whether moving from `self` to `next` is forward progress
    pub fn can_advance_to(&self, next: ResultStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }

    /// Statuses that `next` would advance
    pub fn preceding(next: ResultStatus) -> Vec<ResultStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_advance_to(next))
            .collect()
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ResultStatus::Queued),
            "sent" => Ok(ResultStatus::Sent),
            "opened" => Ok(ResultStatus::Opened),
            "clicked" => Ok(ResultStatus::Clicked),
            "submitted_data" => Ok(ResultStatus::SubmittedData),
            "reported" => Ok(ResultStatus::Reported),
            "error" => Ok(ResultStatus::Error),
            _ => Err(format!("Invalid result status: {}", s)),
        }
    }
}

impl TryFrom<String> for ResultStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Tracking callback kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Opened,
    Clicked,
    SubmittedData,
    Reported,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Opened => "opened",
            EventKind::Clicked => "clicked",
            EventKind::SubmittedData => "submitted_data",
            EventKind::Reported => "reported",
        }
    }

    /// Result status this event moves a target to
    pub fn status(&self) -> ResultStatus {
        match self {
            EventKind::Opened => ResultStatus::Opened,
            EventKind::Clicked => ResultStatus::Clicked,
            EventKind::SubmittedData => ResultStatus::SubmittedData,
            EventKind::Reported => ResultStatus::Reported,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(EventKind::Opened),
            "clicked" => Ok(EventKind::Clicked),
            "submitted_data" => Ok(EventKind::SubmittedData),
            "reported" => Ok(EventKind::Reported),
            _ => Err(format!("Invalid event kind: {}", s)),
        }
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Per-target outcome of a campaign
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CampaignResult {
    pub id: ResultId,
    pub campaign_id: CampaignId,
    pub target_id: TargetId,
    pub rid: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub recipient: RecipientFields,
    #[sqlx(try_from = "String")]
    pub status: ResultStatus,
    pub send_date: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Append-only record of one tracking callback
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ResultEvent {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub rid: String,
    #[sqlx(try_from = "String")]
    pub kind: EventKind,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// Incoming tracking callback
#[derive(Debug, Clone)]
pub struct NewResultEvent {
    pub campaign_id: CampaignId,
    pub rid: String,
    pub kind: EventKind,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of appending an event to a result
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: ResultEvent,
    pub previous: ResultStatus,
    pub current: ResultStatus,
}

impl RecordedEvent {
    pub fn advanced(&self) -> bool {
        self.previous != self.current
    }
}

/// Message template
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub owner_id: OwnerId,
    pub name: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// SMTP relay settings used to send a campaign
#[derive(Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SendingProfile {
    pub id: SendingProfileId,
    pub owner_id: OwnerId,
    pub name: String,
    pub from_address: String,
    pub host: String,
    pub port: i32,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub use_tls: bool,
    pub use_starttls: bool,
}

impl std::fmt::Debug for SendingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingProfile")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("from_address", &self.from_address)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_tls", &self.use_tls)
            .field("use_starttls", &self.use_starttls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: i64, locked: i64, sent: i64, error: i64) -> MailLogCounts {
        MailLogCounts {
            pending,
            locked,
            sent,
            error,
        }
    }

    #[test]
    fn test_derive_status() {
        assert_eq!(counts(4, 0, 0, 0).derive_status(), CampaignStatus::Queued);
        assert_eq!(counts(3, 1, 0, 0).derive_status(), CampaignStatus::InProgress);
        assert_eq!(counts(2, 0, 1, 1).derive_status(), CampaignStatus::InProgress);
        assert_eq!(counts(0, 0, 3, 1).derive_status(), CampaignStatus::Completed);
        assert_eq!(counts(0, 0, 0, 4).derive_status(), CampaignStatus::Error);
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff::new(Duration::seconds(60), Duration::hours(4));
        assert_eq!(backoff.delay(0), Duration::seconds(60));
        assert_eq!(backoff.delay(1), Duration::seconds(120));
        assert_eq!(backoff.delay(3), Duration::seconds(480));
        assert_eq!(backoff.delay(8), Duration::hours(4));
        assert_eq!(backoff.delay(500), Duration::hours(4));
    }

    #[test]
    fn test_result_status_order() {
        assert!(ResultStatus::Queued.can_advance_to(ResultStatus::Sent));
        assert!(ResultStatus::Sent.can_advance_to(ResultStatus::Clicked));
        assert!(!ResultStatus::Clicked.can_advance_to(ResultStatus::Opened));
        assert!(!ResultStatus::Clicked.can_advance_to(ResultStatus::Clicked));
        assert!(!ResultStatus::Error.can_advance_to(ResultStatus::Reported));
        assert!(!ResultStatus::Sent.can_advance_to(ResultStatus::Error));

        assert_eq!(
            ResultStatus::preceding(ResultStatus::Opened),
            vec![ResultStatus::Queued, ResultStatus::Sent]
        );
    }

    #[test]
    fn test_status_strings() {
        for status in ResultStatus::ALL {
            assert_eq!(status.as_str().parse::<ResultStatus>(), Ok(status));
        }
        assert_eq!(
            "submitted_data".parse::<EventKind>().map(|k| k.status()),
            Ok(ResultStatus::SubmittedData)
        );
        assert!("bounced".parse::<MailLogState>().is_err());
    }

    #[test]
    fn test_try_from_database_strings() {
        assert_eq!(
            CampaignStatus::try_from("in_progress".to_string()),
            Ok(CampaignStatus::InProgress)
        );
        assert_eq!(
            MailLogState::try_from("locked".to_string()),
            Ok(MailLogState::Locked)
        );
        assert_eq!(
            ResultStatus::try_from("error".to_string()),
            Ok(ResultStatus::Error)
        );
        assert!(ResultStatus::try_from("bounced".to_string()).is_err());
    }
}
