//! Configuration management

use anyhow::{self, Context, Result};

use crate::db::queries::session::MAX_INSERT_ROWS;

/// Log files and job history default to a sibling of the worker directory
pub const DEFAULT_LOGS_DIR: &str = "../logs";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound for the PostgreSQL pool
    pub database_max_connections: u32,

    /// Prefix of minted external ids (`GC` → `GC-8001`)
    pub roster_id_prefix: String,

    /// Minted ids never go below `floor + 1`
    pub roster_id_floor: u64,

    /// Roster ids per delete / session rows per insert
    pub session_batch_size: usize,

    /// Log files and job history live here
    pub logs_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nats_url = get("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be a positive integer, got {:?}", v))?,
            None => 5,
        };

        let roster_id_prefix = get("ROSTER_ID_PREFIX")
            .map(|p| p.trim().to_string())
            .unwrap_or_else(|| "GC".to_string());
        if roster_id_prefix.is_empty() || !roster_id_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!(
                "ROSTER_ID_PREFIX must be non-empty and alphanumeric (got {:?})",
                roster_id_prefix
            );
        }

        let roster_id_floor = match get("ROSTER_ID_FLOOR") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("ROSTER_ID_FLOOR must be a non-negative integer, got {:?}", v))?,
            None => 8000,
        };

        let session_batch_size = match get("SESSION_BATCH_SIZE") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("SESSION_BATCH_SIZE must be an integer, got {:?}", v))?,
            None => 200,
        };
        if !(1..=MAX_INSERT_ROWS).contains(&session_batch_size) {
            anyhow::bail!(
                "SESSION_BATCH_SIZE must be between 1 and {} (got {})",
                MAX_INSERT_ROWS,
                session_batch_size
            );
        }

        let logs_dir = get("LOGS_DIR").unwrap_or_else(|| DEFAULT_LOGS_DIR.to_string());

        Ok(Self {
            nats_url,
            database_url,
            database_max_connections,
            roster_id_prefix,
            roster_id_floor,
            session_batch_size,
            logs_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://test")]).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.roster_id_prefix, "GC");
        assert_eq!(config.roster_id_floor, 8000);
        assert_eq!(config.session_batch_size, 200);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.logs_dir, "../logs");
    }

    #[test]
    fn test_config_requires_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://test"),
            ("NATS_URL", "nats://nats:4222"),
            ("ROSTER_ID_PREFIX", "ATH"),
            ("ROSTER_ID_FLOOR", "100"),
            ("SESSION_BATCH_SIZE", "50"),
        ])
        .unwrap();
        assert_eq!(config.nats_url, "nats://nats:4222");
        assert_eq!(config.roster_id_prefix, "ATH");
        assert_eq!(config.roster_id_floor, 100);
        assert_eq!(config.session_batch_size, 50);
    }

    #[test]
    fn test_config_rejects_bad_prefix() {
        assert!(load(&[("DATABASE_URL", "postgres://test"), ("ROSTER_ID_PREFIX", "G-C")]).is_err());
        assert!(load(&[("DATABASE_URL", "postgres://test"), ("ROSTER_ID_PREFIX", " ")]).is_err());
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let err = load(&[("DATABASE_URL", "postgres://test"), ("SESSION_BATCH_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("SESSION_BATCH_SIZE"));
    }

    #[test]
    fn test_config_batch_size_upper_bound() {
        let max = MAX_INSERT_ROWS.to_string();
        let config = load(&[("DATABASE_URL", "postgres://test"), ("SESSION_BATCH_SIZE", max.as_str())]).unwrap();
        assert_eq!(config.session_batch_size, 9362);

        let err = load(&[("DATABASE_URL", "postgres://test"), ("SESSION_BATCH_SIZE", "10000")]).unwrap_err();
        assert!(err.to_string().contains("SESSION_BATCH_SIZE"));
    }

    #[test]
    fn test_config_rejects_non_numeric_floor() {
        assert!(load(&[("DATABASE_URL", "postgres://test"), ("ROSTER_ID_FLOOR", "lots")]).is_err());
    }
}
