use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub inventory: InventoryRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Tunables for the seat inventory core. The snapshot TTL must stay well
/// below the reservation TTL so a stale snapshot can never outlive the
/// hold it reflects.
#[derive(Debug, Deserialize, Clone)]
pub struct InventoryRules {
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_seconds: u64,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_seconds: u64,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_request: i32,
    #[serde(default = "default_dependency_timeout")]
    pub dependency_timeout_ms: u64,
}

fn default_key_prefix() -> String {
    "wakeline".to_string()
}
fn default_reservation_ttl() -> u64 {
    600
}
fn default_snapshot_ttl() -> u64 {
    20
}
fn default_lock_ttl() -> u64 {
    5
}
fn default_sweep_interval() -> u64 {
    180
}
fn default_max_seats() -> i32 {
    10
}
fn default_dependency_timeout() -> u64 {
    2000
}

impl Default for InventoryRules {
    fn default() -> Self {
        Self {
            reservation_ttl_seconds: default_reservation_ttl(),
            snapshot_ttl_seconds: default_snapshot_ttl(),
            lock_ttl_seconds: default_lock_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            max_seats_per_request: default_max_seats(),
            dependency_timeout_ms: default_dependency_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file (optional)
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file (not checked in)
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of WAKELINE)
            // Eg.. `WAKELINE__REDIS__URL=...` would set `redis.url`
            .add_source(config::Environment::with_prefix("WAKELINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
