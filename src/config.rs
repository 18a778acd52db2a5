//! Configuration management for huddle.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `HUDDLE_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `HUDDLE_DATA_DIR` - Optional. Directory for the SQLite database. Defaults to `./data`.
//! - `HUDDLE_MAX_MEMBERS` - Optional. Member cap for new groups. Defaults to `20`.
//! - `HUDDLE_SEED_DEMO` - Optional. Load demo users and a demo group. Defaults to `false`.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreType;

pub const DEFAULT_MAX_MEMBERS: u32 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Storage backend
    pub store_type: StoreType,

    /// Where persistent stores keep their files
    pub data_dir: PathBuf,

    /// Member cap applied to newly created groups
    pub max_members: u32,

    /// Load demo data at startup
    pub seed_demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            store_type: StoreType::default(),
            data_dir: PathBuf::from("data"),
            max_members: DEFAULT_MAX_MEMBERS,
            seed_demo: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse
    /// or the member cap is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);

        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?,
            Err(_) => defaults.port,
        };

        let store_type = std::env::var("HUDDLE_STORE")
            .map(|v| StoreType::from_str(&v))
            .unwrap_or(defaults.store_type);

        let data_dir = std::env::var("HUDDLE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let max_members = match std::env::var("HUDDLE_MAX_MEMBERS") {
            Ok(v) => parse_max_members(&v)?,
            Err(_) => defaults.max_members,
        };

        let seed_demo = env_var_bool("HUDDLE_SEED_DEMO", defaults.seed_demo);

        Ok(Self {
            host,
            port,
            store_type,
            data_dir,
            max_members,
            seed_demo,
        })
    }

    /// Config backed by the in-memory store (useful for testing).
    pub fn in_memory() -> Self {
        Self {
            store_type: StoreType::Memory,
            ..Self::default()
        }
    }
}

fn parse_max_members(value: &str) -> Result<u32, ConfigError> {
    let invalid = |msg: String| ConfigError::InvalidValue("HUDDLE_MAX_MEMBERS".to_string(), msg);
    let parsed: u32 = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if parsed == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(parsed)
}

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_members, DEFAULT_MAX_MEMBERS);
        assert_eq!(config.store_type, StoreType::Sqlite);
        assert_eq!(Config::in_memory().store_type, StoreType::Memory);
    }

    #[test]
    fn test_max_members_validation() {
        assert_eq!(parse_max_members(" 8 ").unwrap(), 8);
        assert!(parse_max_members("0").is_err());
        assert!(parse_max_members("lots").is_err());
    }

    #[test]
    fn test_env_var_bool_unset_uses_default() {
        assert!(env_var_bool("HUDDLE_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_var_bool("HUDDLE_TEST_SURELY_UNSET_FLAG", false));
    }
}
