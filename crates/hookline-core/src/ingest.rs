//! EventIngest - records tracking callbacks against campaign results

use crate::clock::Clock;
use crate::result_store::ResultStore;
use chrono::{DateTime, Utc};
use hookline_common::types::{is_well_formed_rid, CampaignId};
use hookline_common::{Error, Result};
use hookline_storage::{EventKind, NewResultEvent, ResultStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a tracking callback did to its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Advanced { from: ResultStatus, to: ResultStatus },
    Unchanged { current: ResultStatus },
}

/// Entry point for opens, clicks, submissions and reports
#[derive(Clone)]
pub struct EventIngest {
    results: ResultStore,
    clock: Arc<dyn Clock>,
}

impl EventIngest {
    pub fn new(results: ResultStore, clock: Arc<dyn Clock>) -> Self {
        Self { results, clock }
    }

    /// Append the event and advance the result if the event is ahead of it.
    ///
    /// An unknown campaign or rId is `NotFound`; callers report it to the
    /// client and carry on.
    pub async fn record_event(
        &self,
        campaign_id: CampaignId,
        rid: &str,
        kind: EventKind,
        details: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        if !is_well_formed_rid(rid) {
            warn!(campaign_id = %campaign_id, rid, kind = %kind, "Malformed rId on tracking callback");
            return Err(Error::NotFound(format!("Result {}", rid)));
        }

        let event = NewResultEvent {
            campaign_id,
            rid: rid.to_string(),
            kind,
            details,
            occurred_at,
        };

        let recorded = match self.results.record(event, self.clock.now()).await {
            Ok(recorded) => recorded,
            Err(Error::NotFound(what)) => {
                warn!(campaign_id = %campaign_id, rid, kind = %kind, "Tracking callback for unknown result");
                return Err(Error::NotFound(what));
            }
            Err(e) => return Err(e),
        };

        if recorded.advanced() {
            info!(
                campaign_id = %campaign_id,
                rid,
                from = %recorded.previous,
                to = %recorded.current,
                "Result advanced"
            );
            Ok(IngestOutcome::Advanced {
                from: recorded.previous,
                to: recorded.current,
            })
        } else {
            debug!(
                campaign_id = %campaign_id,
                rid,
                kind = %kind,
                current = %recorded.current,
                "Tracking event recorded without status change"
            );
            Ok(IngestOutcome::Unchanged {
                current: recorded.current,
            })
        }
    }
}
