//! Campaign handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use hookline_core::{CampaignStats, CampaignSummary, CancelOutcome, NewCampaign};
use hookline_storage::{Campaign, CampaignResult, ResultEvent};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::ApiResult;

/// List campaigns for an owner
///
/// GET /api/v1/owners/:owner_id/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Campaign>>> {
    let campaigns = state.engine.campaigns.list(owner_id).await?;
    Ok(Json(campaigns))
}

/// Launch a campaign
///
/// POST /api/v1/owners/:owner_id/campaigns
pub async fn launch_campaign(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<Uuid>,
    Json(input): Json<NewCampaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.engine.campaigns.launch(owner_id, input).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// Campaign with its statistics
///
/// GET /api/v1/owners/:owner_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<CampaignSummary>> {
    let summary = state.engine.campaigns.summary(owner_id, campaign_id).await?;
    Ok(Json(summary))
}

/// Delete a campaign and everything it owns
///
/// DELETE /api/v1/owners/:owner_id/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.engine.campaigns.delete(owner_id, campaign_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/owners/:owner_id/campaigns/:campaign_id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<CampaignStats>> {
    let stats = state.engine.campaigns.stats(owner_id, campaign_id).await?;
    Ok(Json(stats))
}

/// GET /api/v1/owners/:owner_id/campaigns/:campaign_id/results
pub async fn get_campaign_results(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<CampaignResult>>> {
    let results = state.engine.campaigns.results(owner_id, campaign_id).await?;
    Ok(Json(results))
}

/// GET /api/v1/owners/:owner_id/campaigns/:campaign_id/timeline
pub async fn get_campaign_timeline(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<ResultEvent>>> {
    let events = state.engine.campaigns.timeline(owner_id, campaign_id).await?;
    Ok(Json(events))
}

/// Stop every pending send
///
/// POST /api/v1/owners/:owner_id/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path((owner_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<CancelOutcome>> {
    let outcome = state.engine.campaigns.cancel(owner_id, campaign_id).await?;
    info!(
        campaign_id = %campaign_id,
        cancelled = outcome.cancelled,
        "Campaign cancelled via API"
    );
    Ok(Json(outcome))
}
