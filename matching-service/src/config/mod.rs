//! Configuration module for matching-service.

use crate::matching::MatchSettings;
use service_core::config::{self as core_config, env_or, get_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub collaborators: CollaboratorConfig,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Mongo,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

/// Empty URLs fall back to mock collaborators.
#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub genai_url: Option<String>,
    pub vat_registry_url: Option<String>,
    pub notification_url: Option<String>,
}

/// Tunables for scoring, the pipeline runtime and the recovery sweep.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub matching: MatchSettings,
    pub staleness: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
    pub worker_count: usize,
    pub queue_size: usize,
    pub collaborator_timeout: Duration,
    pub collaborator_min_confidence: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            matching: MatchSettings::default(),
            staleness: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            sweep_batch_size: 100,
            worker_count: 4,
            queue_size: 1024,
            collaborator_timeout: Duration::from_secs(5),
            collaborator_min_confidence: 70,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let m = d.matching.clone();
        Self {
            matching: MatchSettings {
                partner_auto_threshold: env_or("PARTNER_AUTO_THRESHOLD", m.partner_auto_threshold),
                transaction_auto_threshold: env_or(
                    "TRANSACTION_AUTO_THRESHOLD",
                    m.transaction_auto_threshold,
                ),
                suggestion_threshold: env_or("SUGGESTION_THRESHOLD", m.suggestion_threshold),
                partner_suggestion_limit: env_or(
                    "PARTNER_SUGGESTION_LIMIT",
                    m.partner_suggestion_limit,
                ),
                transaction_suggestion_limit: env_or(
                    "TRANSACTION_SUGGESTION_LIMIT",
                    m.transaction_suggestion_limit,
                ),
                window_days_before: env_or("WINDOW_DAYS_BEFORE", m.window_days_before),
                window_days_after: env_or("WINDOW_DAYS_AFTER", m.window_days_after),
                recent_transaction_limit: env_or(
                    "RECENT_TRANSACTION_LIMIT",
                    m.recent_transaction_limit,
                ),
                coverage_tolerance: env_or("COVERAGE_TOLERANCE", m.coverage_tolerance),
            },
            staleness: Duration::from_secs(env_or("STALENESS_SECS", d.staleness.as_secs())),
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )),
            sweep_batch_size: env_or("SWEEP_BATCH_SIZE", d.sweep_batch_size),
            worker_count: env_or("WORKER_COUNT", d.worker_count).max(1),
            queue_size: env_or("QUEUE_SIZE", d.queue_size).max(1),
            collaborator_timeout: Duration::from_millis(env_or(
                "COLLABORATOR_TIMEOUT_MS",
                d.collaborator_timeout.as_millis() as u64,
            )),
            collaborator_min_confidence: env_or(
                "COLLABORATOR_MIN_CONFIDENCE",
                d.collaborator_min_confidence,
            ),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl MatchingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let backend: StoreBackend = get_env("STORE_BACKEND", Some("memory"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let mongodb_uri = non_empty("MONGODB_URI");
        if backend == StoreBackend::Mongo && mongodb_uri.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MONGODB_URI is required when STORE_BACKEND=mongo"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "matching-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: non_empty("OTLP_ENDPOINT"),
            store: StoreConfig {
                backend,
                mongodb_uri,
                mongodb_database: get_env("MONGODB_DATABASE", Some("matching_db"), is_prod)?,
            },
            collaborators: CollaboratorConfig {
                genai_url: non_empty("GENAI_SERVICE_URL"),
                vat_registry_url: non_empty("VAT_REGISTRY_URL"),
                notification_url: non_empty("NOTIFICATION_SERVICE_URL"),
            },
            engine: EngineSettings::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("MongoDB".parse::<StoreBackend>().unwrap(), StoreBackend::Mongo);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_engine_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.matching.partner_auto_threshold, 89);
        assert_eq!(settings.matching.transaction_auto_threshold, 85);
        assert_eq!(settings.staleness, Duration::from_secs(600));
        assert_eq!(settings.sweep_batch_size, 100);
    }
}
