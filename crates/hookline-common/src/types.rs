//! Common types for Hookline

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaign owners
pub type OwnerId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign targets
pub type TargetId = Uuid;

/// Unique identifier for mail log entries
pub type MailLogId = Uuid;

/// Unique identifier for results
pub type ResultId = Uuid;

/// Unique identifier for message templates
pub type TemplateId = Uuid;

/// Unique identifier for landing pages
pub type PageId = Uuid;

/// Unique identifier for sending profiles
pub type SendingProfileId = Uuid;

/// Length of a recipient id
pub const RID_LENGTH: usize = 7;

/// Generate a fresh recipient id (`rId`).
///
/// The rId is the only handle a tracking callback carries, so it is random
/// rather than derived from the target.
pub fn generate_rid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RID_LENGTH)
        .map(char::from)
        .collect()
}

/// Check that an inbound rId has the shape we hand out
pub fn is_well_formed_rid(rid: &str) -> bool {
    rid.len() == RID_LENGTH && rid.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_rid() {
        let rid = generate_rid();
        assert_eq!(rid.len(), RID_LENGTH);
        assert!(is_well_formed_rid(&rid));
        assert_ne!(rid, generate_rid());
    }

    #[test]
    fn test_rid_shape() {
        assert!(is_well_formed_rid("aB3dE9z"));
        assert!(!is_well_formed_rid("short"));
        assert!(!is_well_formed_rid("bad-rid"));
        assert!(!is_well_formed_rid("aB3dE9z0"));
    }

    #[test]
    fn test_email_parse() {
        let addr = EmailAddress::parse("alice@example.com").unwrap();
        assert_eq!(addr.local, "alice");
        assert_eq!(addr.domain, "example.com");
        assert_eq!(addr.to_string(), "alice@example.com");

        assert!(EmailAddress::parse("no-at-sign").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!("bob@".parse::<EmailAddress>().is_err());
    }
}
