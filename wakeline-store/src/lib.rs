pub mod app_config;
pub mod capacity_repo;
pub mod database;
pub mod journal_repo;
pub mod redis_repo;

pub use capacity_repo::PgCapacityStore;
pub use database::DbClient;
pub use journal_repo::PgSettlementJournal;
pub use redis_repo::RedisClient;
