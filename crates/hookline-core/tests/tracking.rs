mod common;

use chrono::Duration;
use common::{t0, Harness};
use hookline_common::Error;
use hookline_core::{Clock, IngestOutcome, TransportError};
use hookline_storage::{Campaign, CampaignResult, EventKind, ResultStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn only_result(h: &Harness, campaign: &Campaign) -> CampaignResult {
    let mut results = h.engine.results.list(campaign.id).await.unwrap();
    assert_eq!(results.len(), 1);
    results.remove(0)
}

async fn open(h: &Harness, campaign: &Campaign, rid: &str) -> IngestOutcome {
    h.engine
        .ingest
        .record_event(campaign.id, rid, EventKind::Opened, json!({}), h.clock.now())
        .await
        .unwrap()
}

async fn click(h: &Harness, campaign: &Campaign, rid: &str) -> IngestOutcome {
    h.engine
        .ingest
        .record_event(
            campaign.id,
            rid,
            EventKind::Clicked,
            json!({ "user_agent": "Mozilla/5.0" }),
            h.clock.now(),
        )
        .await
        .unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Sent,
    Opened,
    Clicked,
}

#[tokio::test]
async fn test_any_order_of_sent_opened_clicked_ends_clicked() {
    use Step::*;
    let orders = [
        [Sent, Opened, Clicked],
        [Sent, Clicked, Opened],
        [Opened, Sent, Clicked],
        [Opened, Clicked, Sent],
        [Clicked, Sent, Opened],
        [Clicked, Opened, Sent],
    ];

    let h = Harness::new();
    for order in orders {
        let campaign = h.launch(&["alice@example.com"]).await;
        let result = only_result(&h, &campaign).await;

        for step in order {
            match step {
                Sent => {
                    h.engine
                        .results
                        .mark_sent(campaign.id, result.target_id, h.clock.now())
                        .await
                        .unwrap();
                }
                Opened => {
                    open(&h, &campaign, &result.rid).await;
                }
                Clicked => {
                    click(&h, &campaign, &result.rid).await;
                }
            }
        }

        let result = only_result(&h, &campaign).await;
        assert_eq!(result.status, ResultStatus::Clicked, "order {:?}", order);
    }
}

#[tokio::test]
async fn test_duplicate_events_are_logged_but_advance_once() {
    let h = Harness::new();
    let campaign = h.launch(&["alice@example.com"]).await;
    h.tick().await;
    let result = only_result(&h, &campaign).await;

    assert_eq!(
        open(&h, &campaign, &result.rid).await,
        IngestOutcome::Advanced {
            from: ResultStatus::Sent,
            to: ResultStatus::Opened
        }
    );
    h.clock.advance(Duration::seconds(5));
    assert_eq!(
        open(&h, &campaign, &result.rid).await,
        IngestOutcome::Unchanged {
            current: ResultStatus::Opened
        }
    );

    let timeline = h
        .engine
        .campaigns
        .timeline(h.owner_id, campaign.id)
        .await
        .unwrap();
    assert_eq!(timeline.len(), 2);
    assert!(timeline.iter().all(|e| e.kind == EventKind::Opened));
    assert_eq!(timeline[1].recorded_at, t0() + Duration::seconds(5));
}

#[tokio::test]
async fn test_click_before_send_confirmation_is_kept() {
    let h = Harness::new();
    let campaign = h.launch(&["alice@example.com"]).await;
    let result = only_result(&h, &campaign).await;

    assert_eq!(
        click(&h, &campaign, &result.rid).await,
        IngestOutcome::Advanced {
            from: ResultStatus::Queued,
            to: ResultStatus::Clicked
        }
    );

    assert_eq!(h.tick().await.sent, 1);

    let result = only_result(&h, &campaign).await;
    assert_eq!(result.status, ResultStatus::Clicked);

    let stats = h.engine.campaigns.stats(h.owner_id, campaign.id).await.unwrap();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.clicked, 1);
    assert_eq!(stats.submitted_data, 0);
}

#[tokio::test]
async fn test_events_do_not_leave_error() {
    let h = Harness::new();
    let campaign = h.launch(&["alice@example.com"]).await;
    h.transport
        .push(Err(TransportError::permanent("550 no such user")));
    h.tick().await;
    let result = only_result(&h, &campaign).await;

    assert_eq!(
        open(&h, &campaign, &result.rid).await,
        IngestOutcome::Unchanged {
            current: ResultStatus::Error
        }
    );
}

#[tokio::test]
async fn test_report_after_submission() {
    let h = Harness::new();
    let campaign = h.launch(&["alice@example.com"]).await;
    h.tick().await;
    let result = only_result(&h, &campaign).await;

    let submitted = h
        .engine
        .ingest
        .record_event(
            campaign.id,
            &result.rid,
            EventKind::SubmittedData,
            json!({ "username": "alice" }),
            h.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(
        submitted,
        IngestOutcome::Advanced {
            from: ResultStatus::Sent,
            to: ResultStatus::SubmittedData
        }
    );

    let reported = h
        .engine
        .ingest
        .record_event(campaign.id, &result.rid, EventKind::Reported, json!({}), h.clock.now())
        .await
        .unwrap();
    assert_eq!(
        reported,
        IngestOutcome::Advanced {
            from: ResultStatus::SubmittedData,
            to: ResultStatus::Reported
        }
    );

    let timeline = h
        .engine
        .campaigns
        .timeline(h.owner_id, campaign.id)
        .await
        .unwrap();
    assert_eq!(timeline[0].details, json!({ "username": "alice" }));
}

#[tokio::test]
async fn test_unknown_rid_is_not_found() {
    let h = Harness::new();
    let campaign = h.launch(&["alice@example.com"]).await;
    let result = only_result(&h, &campaign).await;

    let unknown = h
        .engine
        .ingest
        .record_event(campaign.id, "zzzzzzz", EventKind::Opened, json!({}), t0())
        .await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));

    let malformed = h
        .engine
        .ingest
        .record_event(campaign.id, "../etc", EventKind::Opened, json!({}), t0())
        .await;
    assert!(matches!(malformed, Err(Error::NotFound(_))));

    // A valid rId under the wrong campaign
    let elsewhere = h
        .engine
        .ingest
        .record_event(uuid::Uuid::new_v4(), &result.rid, EventKind::Opened, json!({}), t0())
        .await;
    assert!(matches!(elsewhere, Err(Error::NotFound(_))));

    assert!(h
        .engine
        .campaigns
        .timeline(h.owner_id, campaign.id)
        .await
        .unwrap()
        .is_empty());
}
