//! Campaign repository

use crate::db::{map_sqlx_error, DatabasePool};
use crate::models::{Campaign, CampaignStatus, CreateCampaign, CreateTarget, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_common::types::{CampaignId, OwnerId, TargetId};
use hookline_common::Result;
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Persist a campaign with its targets, one `queued` result and one
    /// `pending` mail log entry per target, all or nothing.
    async fn create(
        &self,
        input: CreateCampaign,
        targets: Vec<CreateTarget>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_for_owner(&self, owner_id: OwnerId, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Campaign>>;
    async fn get_target(&self, id: TargetId) -> Result<Option<Target>>;
    async fn list_targets(&self, campaign_id: CampaignId) -> Result<Vec<Target>>;
    async fn set_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    /// Stamp `cancelled_at`; returns false if the campaign was already cancelled
    async fn mark_cancelled(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool>;
    async fn delete(&self, owner_id: OwnerId, id: CampaignId) -> Result<bool>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(
        &self,
        input: CreateCampaign,
        targets: Vec<CreateTarget>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx_error)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, owner_id, name, template_id, page_id, sending_profile_id, url,
                launch_date, send_by_date, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.owner_id)
        .bind(&input.name)
        .bind(input.template_id)
        .bind(input.page_id)
        .bind(input.sending_profile_id)
        .bind(&input.url)
        .bind(input.launch_date)
        .bind(input.send_by_date)
        .bind(CampaignStatus::Queued.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for target in &targets {
            let target_id = Uuid::now_v7();

            sqlx::query(
                r#"
                INSERT INTO targets (id, campaign_id, email, first_name, last_name, position, rid)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(target_id)
            .bind(campaign.id)
            .bind(&target.recipient.email)
            .bind(&target.recipient.first_name)
            .bind(&target.recipient.last_name)
            .bind(&target.recipient.position)
            .bind(&target.rid)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            sqlx::query(
                r#"
                INSERT INTO results (
                    id, campaign_id, target_id, rid, email, first_name, last_name,
                    position, status, last_transition_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'queued', $9)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign.id)
            .bind(target_id)
            .bind(&target.rid)
            .bind(&target.recipient.email)
            .bind(&target.recipient.first_name)
            .bind(&target.recipient.last_name)
            .bind(&target.recipient.position)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            sqlx::query(
                r#"
                INSERT INTO mail_logs (
                    id, campaign_id, target_id, send_at, state, retry_count,
                    max_retries, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $6)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign.id)
            .bind(target_id)
            .bind(target.send_at)
            .bind(max_retries)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn get_for_owner(&self, owner_id: OwnerId, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<Target>> {
        sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_targets(&self, campaign_id: CampaignId) -> Result<Vec<Target>> {
        sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE campaign_id = $1 ORDER BY id")
            .bind(campaign_id)
            .fetch_all(self.pool.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn set_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(completed_at)
            .execute(self.pool.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET cancelled_at = $2 WHERE id = $1 AND cancelled_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, owner_id: OwnerId, id: CampaignId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(self.pool.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
