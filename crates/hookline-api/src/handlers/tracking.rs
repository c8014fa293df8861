//! Tracking callback handlers
//!
//! Every callback carries the campaign id in the path and the target's rId
//! in the query string. Unknown campaigns and rIds answer 404.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use hookline_common::types::CampaignId;
use hookline_core::Clock;
use hookline_storage::{CampaignRepository, EventKind};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

type Params = HashMap<String, String>;

fn parse_campaign_id(raw: &str) -> ApiResult<CampaignId> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Unknown campaign"))
}

fn take_rid(params: &mut Params) -> ApiResult<String> {
    params
        .remove("rid")
        .ok_or_else(|| ApiError::not_found("Missing rid"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Opaque details stored with the event
fn event_details(headers: &HeaderMap, query: Params, form: Option<Params>) -> Value {
    let mut details = Map::new();
    if !query.is_empty() {
        details.insert("query".to_string(), json!(query));
    }
    if let Some(form) = form {
        details.insert("payload".to_string(), json!(form));
    }
    if let Some(agent) = header_str(headers, "user-agent") {
        details.insert("user_agent".to_string(), json!(agent));
    }
    let remote = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header_str(headers, "x-real-ip"));
    if let Some(address) = remote {
        details.insert("address".to_string(), json!(address));
    }
    Value::Object(details)
}

async fn record(
    state: &AppState,
    campaign_id: CampaignId,
    kind: EventKind,
    mut query: Params,
    headers: &HeaderMap,
    form: Option<Params>,
) -> ApiResult<()> {
    let rid = take_rid(&mut query)?;
    let details = event_details(headers, query, form);
    state
        .engine
        .ingest
        .record_event(campaign_id, &rid, kind, details, state.engine.clock.now())
        .await?;
    Ok(())
}

/// GET /t/:campaign_id/open
pub async fn open(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Query(query): Query<Params>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let campaign_id = parse_campaign_id(&campaign_id)?;
    record(&state, campaign_id, EventKind::Opened, query, &headers, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /t/:campaign_id/click
///
/// Redirects to the campaign's landing page once the click is recorded.
pub async fn click(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Query(query): Query<Params>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let campaign_id = parse_campaign_id(&campaign_id)?;
    record(&state, campaign_id, EventKind::Clicked, query, &headers, None).await?;

    let landing = state
        .engine
        .repos
        .campaigns
        .get(campaign_id)
        .await?
        .map(|c| c.url)
        .filter(|url| !url.is_empty());

    Ok(match landing {
        Some(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /t/:campaign_id/submit
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Query(query): Query<Params>,
    headers: HeaderMap,
    Form(form): Form<Params>,
) -> ApiResult<StatusCode> {
    let campaign_id = parse_campaign_id(&campaign_id)?;
    record(
        &state,
        campaign_id,
        EventKind::SubmittedData,
        query,
        &headers,
        Some(form),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /t/:campaign_id/report
pub async fn report(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Query(query): Query<Params>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let campaign_id = parse_campaign_id(&campaign_id)?;
    record(&state, campaign_id, EventKind::Reported, query, &headers, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_event_details() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let query = HashMap::from([("utm".to_string(), "mail".to_string())]);
        let form = HashMap::from([("username".to_string(), "jdoe".to_string())]);

        let details = event_details(&headers, query, Some(form));
        assert_eq!(
            details,
            json!({
                "query": { "utm": "mail" },
                "payload": { "username": "jdoe" },
                "user_agent": "Mozilla/5.0",
                "address": "203.0.113.9",
            })
        );
    }

    #[test]
    fn test_missing_rid() {
        let mut params = Params::new();
        assert_eq!(take_rid(&mut params).unwrap_err().status(), StatusCode::NOT_FOUND);
    }
}
