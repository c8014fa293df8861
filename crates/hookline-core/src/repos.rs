//! Repository bundle shared by the engine components

use hookline_storage::{
    AssetRepository, CampaignRepository, DatabasePool, DbAssetRepository, DbCampaignRepository,
    DbMailLogRepository, DbResultRepository, MailLogRepository, MemoryStore, ResultRepository,
};
use std::sync::Arc;

/// Handles to every repository the engine reads or writes
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub mail_logs: Arc<dyn MailLogRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub assets: Arc<dyn AssetRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            mail_logs: Arc::new(DbMailLogRepository::new(pool.clone())),
            results: Arc::new(DbResultRepository::new(pool.clone())),
            assets: Arc::new(DbAssetRepository::new(pool)),
        }
    }

    /// Every repository served by one in-memory store
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            campaigns: store.clone(),
            mail_logs: store.clone(),
            results: store.clone(),
            assets: store,
        }
    }
}
