//! Error types for pipeline construction.
//!
//! Every variant here is raised while the pipeline is being built. Once a
//! pipeline exists, sampling and enrichment never fail and export failures
//! are reported through [`ExportError`](crate::exporter::ExportError).

use thiserror::Error;

/// Errors raised while building samplers, processors or the pipeline itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A sampling rule rate was outside `[0, 1]` or not a number.
    #[error("sampling rate {rate} for rule `{tag}` is outside [0, 1]")]
    InvalidRate { tag: String, rate: f64 },

    /// A sampling rule pattern failed to compile.
    #[error("invalid path pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Duration thresholds are inverted or not positive.
    #[error("warning threshold {warning_ms}ms must be positive and not exceed slow threshold {slow_ms}ms")]
    InvalidThresholds { warning_ms: u64, slow_ms: u64 },

    /// Batch exporter limits are inconsistent.
    #[error("invalid batch configuration: {0}")]
    InvalidBatchConfig(String),

    /// Telemetry is enabled but no collector endpoint was configured.
    #[error("telemetry is enabled but no collector endpoint is configured")]
    MissingEndpoint,

    /// The collector endpoint could not be parsed.
    #[error("invalid collector endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The exporter could not be started.
    #[error("exporter initialization failed: {0}")]
    ExporterInit(String),
}

impl PipelineError {
    /// Returns `true` for errors that come from the exporter side.
    ///
    /// These degrade the pipeline to disabled instead of aborting startup.
    #[inline]
    pub fn is_exporter_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingEndpoint | Self::InvalidEndpoint { .. } | Self::ExporterInit(_)
        )
    }
}

/// Failure reported by a tail processor while flushing or shutting down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("processor `{processor}` failed: {reason}")]
pub struct ProcessorError {
    pub processor: String,
    pub reason: String,
}
