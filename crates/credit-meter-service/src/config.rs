//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. When set, PostgreSQL is the store.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL connections.
    pub database_max_connections: u32,

    /// Path to `RocksDB` data directory, used without `DATABASE_URL` when the
    /// `rocksdb-backend` feature is enabled (default: "/data/credit-meter").
    pub data_dir: String,

    /// API key for service-to-service requests (`x-api-key`).
    pub service_api_key: Option<String>,

    /// API key for admin requests (`x-admin-key`).
    pub admin_api_key: Option<String>,

    /// Webhook receiving charge and refund events (optional).
    pub notify_webhook_url: Option<String>,

    /// Secret signing webhook payloads (optional).
    pub notify_webhook_secret: Option<String>,

    /// Bound on one paid action, in seconds.
    pub action_timeout_seconds: u64,

    /// Interval of the background reconciliation pass. `None` disables it.
    pub reconcile_interval_seconds: Option<u64>,

    /// Minimum age of an unresolved invocation before reconciliation touches it.
    pub reconcile_stale_after_seconds: u64,

    /// How long catalog prices are cached.
    pub catalog_cache_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Configuration that cannot work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reconciliation would settle invocations whose action may still be running.
    #[error(
        "RECONCILE_STALE_AFTER_SECONDS ({stale_after}) must exceed ACTION_TIMEOUT_SECONDS ({action_timeout})"
    )]
    StaleWindowTooShort {
        /// Configured stale window.
        stale_after: u64,
        /// Configured action timeout.
        action_timeout: u64,
    },

    /// Every paid action would time out immediately.
    #[error("ACTION_TIMEOUT_SECONDS must be positive")]
    ZeroActionTimeout,
}

/// Notification secrets file structure.
#[derive(Debug, Deserialize)]
struct NotifySecrets {
    #[serde(default)]
    webhook_url: Option<String>,
    webhook_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (notify_webhook_url, notify_webhook_secret) = load_notify_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            notify_webhook_url,
            notify_webhook_secret,
            action_timeout_seconds: env_parse("ACTION_TIMEOUT_SECONDS")
                .unwrap_or(defaults.action_timeout_seconds),
            reconcile_interval_seconds: match env_parse::<u64>("RECONCILE_INTERVAL_SECONDS") {
                Some(0) => None,
                Some(seconds) => Some(seconds),
                None => defaults.reconcile_interval_seconds,
            },
            reconcile_stale_after_seconds: env_parse("RECONCILE_STALE_AFTER_SECONDS")
                .unwrap_or(defaults.reconcile_stale_after_seconds),
            catalog_cache_seconds: env_parse("CATALOG_CACHE_SECONDS")
                .unwrap_or(defaults.catalog_cache_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }

    /// Check settings that depend on each other.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` describing the first inconsistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_timeout_seconds == 0 {
            return Err(ConfigError::ZeroActionTimeout);
        }
        if self.reconcile_stale_after_seconds <= self.action_timeout_seconds {
            return Err(ConfigError::StaleWindowTooShort {
                stale_after: self.reconcile_stale_after_seconds,
                action_timeout: self.action_timeout_seconds,
            });
        }
        Ok(())
    }

    /// Action timeout as a `Duration`.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    /// Reconciliation stale window as a `Duration`.
    #[must_use]
    pub const fn reconcile_stale_after(&self) -> Duration {
        Duration::from_secs(self.reconcile_stale_after_seconds)
    }

    /// Catalog cache TTL as a `Duration`.
    #[must_use]
    pub const fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_seconds)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load the webhook URL and secret from file or environment.
fn load_notify_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/notify.json", "../.secrets/notify.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<NotifySecrets>(path) {
            tracing::info!(path = %path, "Loaded notification secrets from file");
            return (
                secrets
                    .webhook_url
                    .or_else(|| std::env::var("NOTIFY_WEBHOOK_URL").ok()),
                Some(secrets.webhook_secret),
            );
        }
    }

    tracing::debug!("Notification secrets file not found, using environment variables");
    (
        std::env::var("NOTIFY_WEBHOOK_URL").ok(),
        std::env::var("NOTIFY_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/credit-meter".into(),
            service_api_key: None,
            admin_api_key: None,
            notify_webhook_url: None,
            notify_webhook_secret: None,
            action_timeout_seconds: 30,
            reconcile_interval_seconds: Some(60),
            reconcile_stale_after_seconds: 300,
            catalog_cache_seconds: 300,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 60,
        }
    }
}
