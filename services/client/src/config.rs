//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use reqwest::Url;
use secrecy::SecretString;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub supabase_url: Url,
    pub supabase_anon_key: SecretString,
    pub profiles_table: String,
    pub session_db_url: String,
    /// Upper bound on any single request to the hosted backend.
    pub request_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Hosted Backend ---
        let url_str = lookup("SUPABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("SUPABASE_URL".to_string()))?;
        let supabase_url = Url::parse(&url_str)
            .map_err(|e| ConfigError::InvalidValue("SUPABASE_URL".to_string(), e.to_string()))?;

        let supabase_anon_key = lookup("SUPABASE_ANON_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("SUPABASE_ANON_KEY".to_string()))?;

        let profiles_table =
            lookup("PROFILES_TABLE").unwrap_or_else(|| "user_profiles".to_string());

        let timeout_str = lookup("REQUEST_TIMEOUT_SECS").unwrap_or_else(|| "15".to_string());
        let timeout_secs = timeout_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "REQUEST_TIMEOUT_SECS".to_string(),
                format!("'{}' is not a whole number of seconds", timeout_str),
            )
        })?;

        // --- Local Storage ---
        let session_db_url = lookup("SESSION_DB_URL")
            .unwrap_or_else(|| "sqlite://elder_ally.db?mode=rwc".to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            profiles_table,
            session_db_url,
            request_timeout: Duration::from_secs(timeout_secs),
            log_level,
        })
    }
}
