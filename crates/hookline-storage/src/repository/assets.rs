//! Asset repository
//!
//! Templates and sending profiles are managed elsewhere; the engine only
//! reads them, always scoped to the campaign owner.

use crate::db::{map_sqlx_error, DatabasePool};
use crate::models::{MessageTemplate, SendingProfile};
use async_trait::async_trait;
use hookline_common::types::{OwnerId, SendingProfileId, TemplateId};
use hookline_common::Result;

/// Asset repository trait
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn get_template(
        &self,
        owner_id: OwnerId,
        id: TemplateId,
    ) -> Result<Option<MessageTemplate>>;
    async fn get_sending_profile(
        &self,
        owner_id: OwnerId,
        id: SendingProfileId,
    ) -> Result<Option<SendingProfile>>;
}

/// Database asset repository
pub struct DbAssetRepository {
    pool: DatabasePool,
}

impl DbAssetRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for DbAssetRepository {
    async fn get_template(
        &self,
        owner_id: OwnerId,
        id: TemplateId,
    ) -> Result<Option<MessageTemplate>> {
        sqlx::query_as::<_, MessageTemplate>(
            "SELECT id, owner_id, name, subject, text, html FROM templates WHERE id = $1 AND owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_sending_profile(
        &self,
        owner_id: OwnerId,
        id: SendingProfileId,
    ) -> Result<Option<SendingProfile>> {
        sqlx::query_as::<_, SendingProfile>(
            r#"
            SELECT id, owner_id, name, from_address, host, port, username, password,
                   use_tls, use_starttls
            FROM sending_profiles
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
