/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Storyletter.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file with default/override merging
- A helper to initialize an SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/storyletter.db")
    pub path: String,
}

/// HTTP server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Scheduler configuration: wall-clock UTC times in "HH:MM" 24h format.
///
/// `generate_at` is nominally late in the UTC day so the story targets the
/// following date; `distribute_at` runs on the story's own date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub generate_at: String,
    pub distribute_at: String,
}

/// Remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config grouping adapter specifics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
}

/// SMTP transport configuration. The password is read from the environment
/// variable named by `password_env`, never from the config file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password_env: Option<String>,
    /// Sender address, e.g. "Storyletter <stories@example.com>"
    pub from: String,
}

/// Operator / admin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Operator address for review links and out-of-band alerts
    pub email: String,
    /// Env var holding the shared secret expected in the `x-admin-key` header
    pub secret_env: Option<String>,
    /// Public base URL used to build review and unsubscribe links
    pub app_url: String,
}

/// Distribution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Delay between consecutive sends, sized to stay under the transport's
    /// rate limit (default 500ms, i.e. at most 2 messages/second).
    pub delay_ms: Option<u64>,
}

/// Generator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Thematic category pool the generator samples 2-3 tags from.
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: Option<ServerConfig>,
    pub scheduler: SchedulerConfig,
    pub llm: Option<LlmConfig>,
    pub smtp: Option<SmtpConfig>,
    pub admin: AdminConfig,
    pub distribution: Option<DistributionConfig>,
    pub generator: Option<GeneratorConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Resolve the admin shared secret from the environment.
    pub fn admin_secret(&self) -> Option<String> {
        let env_name = self
            .admin
            .secret_env
            .as_deref()
            .unwrap_or("STORYLETTER_ADMIN_SECRET");
        std::env::var(env_name).ok()
    }

    /// Delay between consecutive distribution sends.
    pub fn send_delay_ms(&self) -> u64 {
        self.distribution
            .as_ref()
            .and_then(|d| d.delay_ms)
            .unwrap_or(500)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary, ensure the DB file exists
/// (attempting to create it if missing), and return a configured `SqlitePool`. Defaults are
/// conservative for resource-constrained platforms:
/// - max_connections: 5
/// - connection timeout default provided by `sqlx`
///
/// Example:
///   let pool = init_db_pool("data/storyletter.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    // Try to create the DB file if it does not already exist. This gives a clearer error
    // earlier (filesystem permission or path issues) instead of only surfacing it via the
    // SQLite connection attempt.
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    // Schema creation is executed explicitly by the caller (for example, from `main`)
    // using `server::ensure_schema(pool)` once a `SqlitePool` is available.

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Convenience: sleep helper used by implementations (kept public for tests)
pub async fn sleep_millis(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
