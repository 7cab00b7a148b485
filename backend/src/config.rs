//! Configuration management for the studio operations backend
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with STUDIO_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Telegram bot configuration
    pub telegram: TelegramConfig,

    /// Workflow tuning
    pub workflow: WorkflowConfig,

    /// Background job intervals
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens
    pub secret: String,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot token; empty disables sending
    pub bot_token: String,

    /// Operations chat all notices go to
    pub chat_id: i64,

    /// Forum topic for defect notices
    pub defects_thread_id: Option<i32>,

    /// Forum topic for retouch notices
    pub retouch_thread_id: Option<i32>,

    /// Forum topic for order notices
    pub orders_thread_id: Option<i32>,

    /// Delivery attempts before a message is marked failed
    pub max_attempts: i32,

    /// Maximum age of a Login Widget payload in seconds
    pub login_max_age_secs: i64,
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.trim().is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Lines per auto-created retouch request
    pub retouch_batch_size: usize,

    /// Default products per request for bulk creation
    pub st_request_chunk_size: usize,

    /// Minutes after which an unfinished claim is released
    pub claim_timeout_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Disable all background jobs (e.g. on secondary replicas)
    pub enabled: bool,

    pub auto_retouch_interval_secs: u64,

    pub notification_interval_secs: u64,

    pub stale_claims_interval_secs: u64,

    pub stats_interval_secs: u64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STUDIO_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("jwt.access_token_expiry", 43200)?
            .set_default("telegram.bot_token", "")?
            .set_default("telegram.chat_id", 0)?
            .set_default("telegram.max_attempts", 5)?
            .set_default("telegram.login_max_age_secs", 86400)?
            .set_default("workflow.retouch_batch_size", 10)?
            .set_default("workflow.st_request_chunk_size", 20)?
            .set_default("workflow.claim_timeout_minutes", 60)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.auto_retouch_interval_secs", 600)?
            .set_default("scheduler.notification_interval_secs", 10)?
            .set_default("scheduler.stale_claims_interval_secs", 300)?
            .set_default("scheduler.stats_interval_secs", 3600)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STUDIO_ prefix)
            .add_source(
                Environment::with_prefix("STUDIO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_disabled_without_token() {
        let telegram = TelegramConfig {
            bot_token: "  ".to_string(),
            chat_id: -100123,
            defects_thread_id: None,
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts: 5,
            login_max_age_secs: 86400,
        };
        assert!(!telegram.is_enabled());
    }
}
