//! Pipeline coordinator: head decision, tail enrichment, reconciliation and
//! hand-off to the exporter.
//!
//! # Span lifecycle
//!
//! 1. [`on_start`](PipelineCoordinator::on_start) runs the head sampler once
//!    and records the decision on the span.
//! 2. The request layer fills in attributes while the request runs.
//! 3. [`on_end`](PipelineCoordinator::on_end) runs the tail processors in
//!    registration order (duration classifier, error capture, then any
//!    custom processors), then reconciles:
//!
//!    ```text
//!    export = decision == RecordAndSample || slow_request || error_captured
//!    ```
//!
//!    and moves eligible spans into the sink without blocking.
//!
//! A span that never reaches `on_end` is never exported and holds nothing
//! inside the pipeline.

use crate::batch_exporter::BatchSpanExporter;
use crate::config::{PipelineConfig, ServiceLabels};
use crate::duration::{DurationClassifier, SLOW_REQUEST};
use crate::error::PipelineError;
use crate::error_capture::{ErrorCapturingProcessor, ERROR_CAPTURED};
use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::processor::SpanProcessor;
use crate::rules::RuleTable;
use crate::sampler::{SamplerKind, SamplingDecision};
use crate::sink::{EnqueueError, ExportSinkBoxed, NoopSink};
use crate::span::Span;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// What the exporter factory receives when the pipeline is enabled.
#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub endpoint: Url,
    pub service: ServiceLabels,
}

/// Returns `true` if a finished span must be exported.
///
/// Head-sampled spans are always exported; dropped spans are rescued when a
/// tail processor flagged them as slow or failed.
pub fn is_export_eligible(decision: SamplingDecision, span: &Span) -> bool {
    decision.is_sampled() || span.flag(SLOW_REQUEST) || span.flag(ERROR_CAPTURED)
}

/// What happened to a span handed to [`PipelineCoordinator::on_end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Queued for export. `rescued` is set when the head sampler had not
    /// selected the span.
    Exported { rescued: bool },
    /// Not eligible, or the pipeline is disabled or shut down.
    Discarded,
    /// Eligible, but the sink refused it.
    Rejected(EnqueueError),
}

/// Result of [`PipelineCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Processors and exporter drained within the deadline.
    Completed,
    /// The exporter did not drain in time; remaining work was abandoned.
    TimedOut,
    /// Shutdown had already been started by an earlier call.
    AlreadyShutDown,
}

/// Builds a [`PipelineCoordinator`] from parts.
pub struct PipelineBuilder {
    config: PipelineConfig,
    rules: RuleTable,
    sampler: Option<SamplerKind>,
    extra_processors: Vec<Box<dyn SpanProcessor>>,
    sink: Option<Arc<dyn ExportSinkBoxed>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            rules: RuleTable::builtin(),
            sampler: None,
            extra_processors: Vec::new(),
            sink: None,
        }
    }

    /// Replaces the compiled-in rule table.
    pub fn rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Uses this sampler instead of deriving one from the configured mode.
    pub fn sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Appends a processor after the built-in ones.
    pub fn processor(mut self, processor: impl SpanProcessor + 'static) -> Self {
        self.extra_processors.push(Box::new(processor));
        self
    }

    /// Sets the sink eligible spans are handed to.
    pub fn sink(mut self, sink: Arc<dyn ExportSinkBoxed>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds an enabled pipeline. Without a sink, spans go to [`NoopSink`].
    pub fn build(self) -> Result<PipelineCoordinator, PipelineError> {
        self.build_with_state(true)
    }

    fn build_with_state(self, enabled: bool) -> Result<PipelineCoordinator, PipelineError> {
        let config = self.config;
        let duration = DurationClassifier::new(config.duration, config.test_mode)?;

        let mut processors: Vec<Box<dyn SpanProcessor>> =
            vec![Box::new(duration), Box::new(ErrorCapturingProcessor::new())];
        processors.extend(self.extra_processors);

        let sampler = self.sampler.unwrap_or_else(|| {
            SamplerKind::from_config(config.sampler_mode, &config.service.environment, self.rules)
        });

        Ok(PipelineCoordinator {
            sampler,
            processors,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            service: config.service.clone(),
            enabled,
            shutdown_timeout: config.shutdown_timeout(),
            shutdown_started: AtomicBool::new(false),
        })
    }
}

/// Owns the sampler, the tail processors and the sink.
pub struct PipelineCoordinator {
    sampler: SamplerKind,
    processors: Vec<Box<dyn SpanProcessor>>,
    sink: Arc<dyn ExportSinkBoxed>,
    service: ServiceLabels,
    enabled: bool,
    shutdown_timeout: Duration,
    shutdown_started: AtomicBool,
}

impl PipelineCoordinator {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Starts the pipeline described by `config`.
    ///
    /// `make_exporter` is only called when telemetry is enabled and the
    /// endpoint is valid. If the endpoint is missing or invalid, the factory
    /// fails, or no tokio runtime is available, the failure is logged once
    /// and a disabled pipeline is returned. Only invalid processor settings
    /// are reported as errors.
    pub fn init<F>(config: PipelineConfig, make_exporter: F) -> Result<Self, PipelineError>
    where
        F: FnOnce(&ExporterSettings) -> Result<Arc<dyn SpanExporterBoxed>, ExportError>,
    {
        if !config.enabled {
            tracing::info!("telemetry disabled by configuration");
            return Self::disabled(config);
        }

        match Self::start_exporter(&config, make_exporter) {
            Ok(sink) => {
                tracing::info!(
                    service = %config.service.name,
                    environment = %config.service.environment,
                    sink = sink.name(),
                    "telemetry pipeline started"
                );
                PipelineBuilder::new(config).sink(sink).build()
            }
            Err(e) if e.is_exporter_failure() => {
                tracing::warn!(error = %e, "telemetry exporter unavailable, pipeline disabled");
                Self::disabled(config)
            }
            Err(e) => Err(e),
        }
    }

    fn start_exporter<F>(config: &PipelineConfig, make_exporter: F) -> Result<Arc<dyn ExportSinkBoxed>, PipelineError>
    where
        F: FnOnce(&ExporterSettings) -> Result<Arc<dyn SpanExporterBoxed>, ExportError>,
    {
        // Threshold errors reach the caller instead of disabling the pipeline.
        config.duration.validate()?;
        let settings = ExporterSettings {
            endpoint: config.collector_endpoint()?,
            service: config.service.clone(),
        };
        let exporter = make_exporter(&settings).map_err(|e| PipelineError::ExporterInit(e.to_string()))?;
        let batch = BatchSpanExporter::new(config.batch, exporter).map_err(|e| match e {
            PipelineError::InvalidBatchConfig(reason) => PipelineError::ExporterInit(reason),
            other => other,
        })?;
        Ok(Arc::new(batch))
    }

    /// A pipeline that samples nothing and exports nothing.
    pub fn disabled(config: PipelineConfig) -> Result<Self, PipelineError> {
        PipelineBuilder::new(config).build_with_state(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sampler(&self) -> &SamplerKind {
        &self.sampler
    }

    /// Processor names in the order they run.
    pub fn processor_names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Makes the head decision for a starting span and records it on the span.
    pub fn on_start(&self, span: &mut Span) -> SamplingDecision {
        if !self.enabled {
            span.sampling_decision = Some(SamplingDecision::Drop);
            return SamplingDecision::Drop;
        }

        let result = self
            .sampler
            .should_sample(&span.trace_id, span.path(), &span.attributes);
        span.sampling_decision = Some(result.decision);
        if let Some(attributes) = result.attributes {
            span.attributes.extend(attributes);
        }
        result.decision
    }

    /// Enriches a finished span and hands it to the sink if it is eligible.
    ///
    /// Spans that skipped [`on_start`](Self::on_start) are sampled here.
    pub fn on_end(&self, mut span: Span) -> Disposition {
        if !self.enabled {
            return Disposition::Discarded;
        }
        if self.shutdown_started.load(Ordering::Acquire) {
            tracing::debug!(trace_id = %span.trace_id, "span ended after shutdown, discarding");
            return Disposition::Discarded;
        }

        for processor in &self.processors {
            let outcome = catch_unwind(AssertUnwindSafe(|| processor.on_end(&mut span)));
            if outcome.is_err() {
                tracing::error!(
                    processor = processor.name(),
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "span processor panicked"
                );
            }
        }

        let decision = match span.sampling_decision {
            Some(decision) => decision,
            None => self.on_start(&mut span),
        };
        if !is_export_eligible(decision, &span) {
            return Disposition::Discarded;
        }

        let rescued = !decision.is_sampled();
        self.stamp_service_labels(&mut span);
        match self.sink.enqueue(span) {
            Ok(()) => Disposition::Exported { rescued },
            Err(e) => {
                tracing::debug!(error = %e, sink = self.sink.name(), "span rejected by sink");
                Disposition::Rejected(e)
            }
        }
    }

    fn stamp_service_labels(&self, span: &mut Span) {
        let labels = [
            (SERVICE_NAME, &self.service.name),
            (SERVICE_VERSION, &self.service.version),
            (DEPLOYMENT_ENVIRONMENT, &self.service.environment),
        ];
        for (key, value) in labels {
            span.attributes
                .entry(key.to_owned())
                .or_insert_with(|| value.as_str().into());
        }
    }

    /// Tears the pipeline down once.
    ///
    /// Runs `force_flush` then `shutdown` on each processor, then `flush`
    /// then `shutdown` on the sink. The sink steps share one deadline; on
    /// expiry the sink is aborted. Later calls return
    /// [`ShutdownOutcome::AlreadyShutDown`] without doing anything, so
    /// several signal handlers may call this concurrently.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            tracing::debug!("telemetry shutdown already in progress");
            return ShutdownOutcome::AlreadyShutDown;
        }

        for processor in &self.processors {
            if let Err(e) = processor.force_flush() {
                tracing::warn!(error = %e, "processor flush failed");
            }
            if let Err(e) = processor.shutdown() {
                tracing::warn!(error = %e, "processor shutdown failed");
            }
        }

        let sink = Arc::clone(&self.sink);
        let drain = async move {
            if let Err(e) = sink.flush_boxed().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink flush failed");
            }
            if let Err(e) = sink.shutdown_boxed().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink shutdown failed");
            }
        };

        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(()) => {
                tracing::info!("telemetry pipeline shut down");
                ShutdownOutcome::Completed
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "telemetry shutdown timed out, abandoning export"
                );
                self.sink.abort();
                ShutdownOutcome::TimedOut
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_started.load(Ordering::Acquire)
    }
}

/// Waits for SIGINT or SIGTERM, then shuts the pipeline down.
///
/// Safe to run alongside other shutdown paths; only the first caller tears
/// the pipeline down.
pub async fn shutdown_on_signal(pipeline: &PipelineCoordinator) -> ShutdownOutcome {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM, waiting for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
