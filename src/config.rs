//! Centralised environment-driven configuration: one struct loaded once at
//! startup from `DATABASE_PATH`, `CHECK_RETENTION_DAYS`,
//! `RETENTION_SWEEP_INTERVAL_SECS`, and `WORKER_POOL_SIZE`.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub worker_pool_size: usize,
    /// Checks older than this are pruned by the retention sweep. Default 90.
    pub check_retention_days: u32,
    /// How often the retention sweep runs.
    pub retention_sweep_interval_secs: u64,
    pub smtp_from_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_path: env_var("DATABASE_PATH", "pulseward.db"),
            worker_pool_size: env_parsed("WORKER_POOL_SIZE", 4),
            check_retention_days: env_parsed("CHECK_RETENTION_DAYS", 90),
            retention_sweep_interval_secs: env_parsed("RETENTION_SWEEP_INTERVAL_SECS", 3600),
            smtp_from_address: env_var("SMTP_FROM_ADDRESS", "alerts@pulseward.local"),
        }
    }
}

fn env_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
