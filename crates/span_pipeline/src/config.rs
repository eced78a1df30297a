//! Pipeline configuration.
//!
//! [`PipelineConfig`] is owned by the application entry point and handed to
//! [`PipelineCoordinator::init`](crate::PipelineCoordinator::init). It can
//! be deserialized (missing fields take their defaults) or read from the
//! environment. The sampling rule table is compiled in and is not part of
//! this configuration.

use crate::batch_processor::BatchConfig;
use crate::duration::DurationThresholds;
use crate::error::PipelineError;
use crate::sampler::SamplerMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const ENV_ENABLED: &str = "TELEMETRY_ENABLED";
pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "OTEL_SERVICE_VERSION";
pub const ENV_ENVIRONMENT: &str = "DEPLOYMENT_ENVIRONMENT";
pub const ENV_SAMPLER: &str = "TELEMETRY_SAMPLER";
pub const ENV_TEST_MODE: &str = "TELEMETRY_TEST_MODE";
pub const ENV_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

/// Resource labels stamped on every exported span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLabels {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl Default for ServiceLabels {
    fn default() -> Self {
        Self {
            name: "unknown_service".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            environment: "production".to_owned(),
        }
    }
}

/// Top-level telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch. A disabled pipeline drops every span without sampling.
    pub enabled: bool,
    /// Collector endpoint handed to the exporter factory.
    pub endpoint: Option<String>,
    pub service: ServiceLabels,
    pub sampler_mode: SamplerMode,
    pub duration: DurationThresholds,
    /// Silences slow-request warnings, for test suites.
    pub test_mode: bool,
    pub batch: BatchConfig,
    /// Upper bound on exporter draining during shutdown.
    pub shutdown_timeout_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service: ServiceLabels::default(),
            sampler_mode: SamplerMode::Auto,
            duration: DurationThresholds::default(),
            test_mode: false,
            batch: BatchConfig::default(),
            shutdown_timeout_millis: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults. Unparseable values are logged and
    /// ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        if let Some(enabled) = get(ENV_ENABLED).and_then(|v| parse_or_warn(ENV_ENABLED, &v, parse_bool)) {
            config.enabled = enabled;
        }
        config.endpoint = get(ENV_ENDPOINT);
        if let Some(name) = get(ENV_SERVICE_NAME) {
            config.service.name = name;
        }
        if let Some(version) = get(ENV_SERVICE_VERSION) {
            config.service.version = version;
        }
        if let Some(environment) = get(ENV_ENVIRONMENT) {
            config.service.environment = environment;
        }
        if let Some(mode) = get(ENV_SAMPLER).and_then(|v| parse_or_warn(ENV_SAMPLER, &v, SamplerMode::parse)) {
            config.sampler_mode = mode;
        }
        if let Some(test_mode) = get(ENV_TEST_MODE).and_then(|v| parse_or_warn(ENV_TEST_MODE, &v, parse_bool)) {
            config.test_mode = test_mode;
        }

        let batch = &mut config.batch;
        let number = |key: &str| get(key).and_then(|v| parse_or_warn(key, &v, |s| s.parse::<u64>().ok()));
        if let Some(size) = number(ENV_MAX_QUEUE_SIZE) {
            batch.max_queue_size = size as usize;
        }
        if let Some(size) = number(ENV_MAX_EXPORT_BATCH_SIZE) {
            batch.max_export_batch_size = size as usize;
        }
        if let Some(delay) = number(ENV_SCHEDULE_DELAY) {
            batch.scheduled_delay_millis = delay;
        }
        if let Some(timeout) = number(ENV_EXPORT_TIMEOUT) {
            batch.export_timeout_millis = timeout;
        }

        config
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_millis)
    }

    /// Parses and checks the collector endpoint.
    pub fn collector_endpoint(&self) -> Result<Url, PipelineError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(PipelineError::MissingEndpoint)?;
        let url = Url::parse(endpoint).map_err(|e| PipelineError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::InvalidEndpoint {
                endpoint: endpoint.to_owned(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        Ok(url)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or_warn<T>(key: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let parsed = parse(value);
    if parsed.is_none() {
        tracing::warn!(key, value, "ignoring unparseable configuration value");
    }
    parsed
}
