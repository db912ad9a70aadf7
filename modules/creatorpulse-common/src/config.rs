use std::collections::HashMap;
use std::env;

use thiserror::Error;

use crate::types::Platform;

/// Secret value shipped in .env.example; refused outside development.
const DEFAULT_SECRET: &str = "change-me-before-deploying-0000000000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn from_env() -> Self {
        match lookup("ENVIRONMENT").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Per-platform admission and outbound settings.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Fixed-window length for the platform limiter.
    pub rate_window_ms: u64,
    /// Admissions per window.
    pub rate_max_requests: u32,
    /// Platform API credential passed through to the actor input.
    pub api_key: String,
    /// Outbound deadline for this platform's downstream calls.
    pub timeout_ms: u64,
    /// Actor executing this platform's scrapes; the deployment default
    /// applies when unset.
    pub actor_id: Option<String>,
}

/// Retry executor tuning shared by the gateway and the queue.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

/// Per-queue worker tuning.
#[derive(Debug, Clone)]
pub struct QueueTuning {
    pub concurrency: usize,
    pub max_retries: u32,
    pub delay_on_failure_ms: u64,
}

/// Application configuration loaded from environment variables.
///
/// Every variable is looked up as `API_GATEWAY_<NAME>` first, then as the
/// bare `<NAME>`.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,

    // Inbound HTTP
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,

    // Admission
    pub platforms: HashMap<Platform, PlatformConfig>,

    // Secrets
    pub secret_key: String,
    pub algorithm: String,
    pub webhook_secret: String,

    // Retry
    pub retry: RetrySettings,

    // Datastore
    pub database_url: String,
    pub db_pool_max: u32,

    // Queue
    pub queue: QueueTuning,

    // Actor service
    pub apify_token: String,
    /// Public URL the actor service posts webhooks back to, when reachable.
    pub public_webhook_url: Option<String>,
    pub gateway_timeout_ms: u64,
    pub actor_timeout_ms: u64,
}

impl Config {
    /// Load and validate the full server configuration.
    pub fn server_from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();

        let mut platforms = HashMap::new();
        for platform in Platform::ALL {
            platforms.insert(platform, platform_config(platform)?);
        }

        let retry = RetrySettings {
            max_attempts: parse_or("MAX_ATTEMPTS", 3)?,
            initial_delay_ms: parse_or("INITIAL_DELAY_MS", 1000)?,
            max_delay_ms: parse_or("MAX_DELAY_MS", 30_000)?,
            backoff_multiplier: parse_or("BACKOFF_MULTIPLIER", 2.0)?,
        };

        let queue = QueueTuning {
            concurrency: parse_or("CONCURRENCY", 5)?,
            max_retries: parse_or("MAX_RETRIES", 3)?,
            delay_on_failure_ms: parse_or("DELAY_ON_FAILURE", 5000)?,
        };

        let config = Self {
            environment,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", 8080)?,
            cors_enabled: lookup("CORS_ENABLED").as_deref() == Some("true"),
            platforms,
            secret_key: lookup("SECRET_KEY").unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            algorithm: lookup("ALGORITHM").unwrap_or_else(|| "aes-256-gcm".to_string()),
            webhook_secret: lookup("WEBHOOK_SECRET").unwrap_or_default(),
            retry,
            database_url: required("DATABASE_URL")?,
            db_pool_max: parse_or("DB_POOL_MAX", 10)?,
            queue,
            apify_token: required("APIFY_TOKEN")?,
            public_webhook_url: lookup("PUBLIC_WEBHOOK_URL"),
            gateway_timeout_ms: parse_or("GATEWAY_TIMEOUT_MS", 30_000)?,
            actor_timeout_ms: parse_or("ACTOR_TIMEOUT_MS", 120_000)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validation fails fast; a process with an invalid config never serves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.backoff_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "BACKOFF_MULTIPLIER must be > 1, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.max_delay_ms <= self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "MAX_DELAY_MS ({}) must exceed INITIAL_DELAY_MS ({})",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            )));
        }
        if self.secret_key.len() < 32 {
            return Err(ConfigError::Invalid(
                "SECRET_KEY must be at least 32 characters".to_string(),
            ));
        }
        if !self.environment.is_development() {
            if self.secret_key == DEFAULT_SECRET {
                return Err(ConfigError::Invalid(
                    "SECRET_KEY must be changed from the default outside development".to_string(),
                ));
            }
            if self.webhook_secret.is_empty() {
                return Err(ConfigError::Invalid(
                    "WEBHOOK_SECRET is required outside development".to_string(),
                ));
            }
        }
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "CONCURRENCY must be at least 1".to_string(),
            ));
        }
        for (platform, pc) in &self.platforms {
            if pc.rate_window_ms == 0 || pc.rate_max_requests == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{platform} rate window and max requests must be non-zero"
                )));
            }
        }
        Ok(())
    }

    /// Log what is set without logging any values.
    pub fn log_redacted(&self) {
        let vars = [
            ("SECRET_KEY", &self.secret_key),
            ("WEBHOOK_SECRET", &self.webhook_secret),
            ("DATABASE_URL", &self.database_url),
            ("APIFY_TOKEN", &self.apify_token),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        for (platform, pc) in &self.platforms {
            tracing::info!(
                %platform,
                window_ms = pc.rate_window_ms,
                max_requests = pc.rate_max_requests,
                timeout_ms = pc.timeout_ms,
                api_key_chars = pc.api_key.len(),
                "platform config"
            );
        }
    }
}

fn platform_config(platform: Platform) -> Result<PlatformConfig, ConfigError> {
    let prefix = platform.env_prefix();
    Ok(PlatformConfig {
        rate_window_ms: parse_prefixed(prefix, "RATE_WINDOW_MS", 60_000)?,
        rate_max_requests: parse_prefixed(prefix, "RATE_MAX_REQUESTS", 30)?,
        api_key: lookup(&format!("{prefix}_API_KEY")).unwrap_or_default(),
        timeout_ms: parse_prefixed(prefix, "TIMEOUT_MS", 30_000)?,
        actor_id: lookup(&format!("{prefix}_ACTOR_ID")),
    })
}

/// Look up `API_GATEWAY_<name>` first, then bare `<name>`.
fn lookup(name: &str) -> Option<String> {
    env::var(format!("API_GATEWAY_{name}"))
        .or_else(|_| env::var(name))
        .ok()
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    lookup(name).ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::NotANumber { name, value: raw }),
    }
}

fn parse_prefixed<T: std::str::FromStr>(
    prefix: &str,
    suffix: &str,
    default: T,
) -> Result<T, ConfigError> {
    let name = format!("{prefix}_{suffix}");
    match lookup(&name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(format!(
            "{name} must be a number, got {raw:?}"
        ))),
    }
}
