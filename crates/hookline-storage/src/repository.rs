//! Repository layer for data access

pub mod assets;
pub mod campaigns;
pub mod mail_logs;
pub mod results;

// Re-export concrete repository implementations
pub use assets::DbAssetRepository;
pub use campaigns::DbCampaignRepository;
pub use mail_logs::DbMailLogRepository;
pub use results::DbResultRepository;

// Re-export repository traits
pub use assets::AssetRepository;
pub use campaigns::CampaignRepository;
pub use mail_logs::MailLogRepository;
pub use results::ResultRepository;

