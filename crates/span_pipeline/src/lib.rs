//! Adaptive Trace Sampling Pipeline
//!
//! Decides which request spans leave the process. A cheap head decision is
//! made when a span starts: an ordered table of path rules with
//! deterministic trace-ID hashing, plus a forced sample for error
//! responses. When the span ends, tail processors classify its duration and
//! capture failures, so slow or failed requests are exported even when the
//! head sampler dropped them. Eligible spans go through a bounded,
//! non-blocking queue to a background batching exporter.
//!
//! ```no_run
//! use span_pipeline::{
//!     PipelineConfig, PipelineCoordinator, Span, SpanExporterBoxed, SpanStatus, StdoutExporter,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), span_pipeline::PipelineError> {
//! let pipeline = PipelineCoordinator::init(PipelineConfig::from_env(), |_settings| {
//!     Ok(Arc::new(StdoutExporter::new(false)) as Arc<dyn SpanExporterBoxed>)
//! })?;
//!
//! let mut span = Span::new("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7", "GET /api/orders");
//! pipeline.on_start(&mut span);
//! span.finish(SpanStatus::Ok);
//! pipeline.on_end(span);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Exporters use native async traits (no `#[async_trait]` macro); the
//! `*Boxed` twins provide dynamic dispatch.

pub mod batch_exporter;
pub mod batch_processor;
pub mod config;
pub mod duration;
pub mod error;
pub mod error_capture;
pub mod exporter;
pub mod pipeline;
pub mod processor;
pub mod rules;
pub mod sampler;
pub mod sink;
pub mod span;

// Re-export main types
pub use batch_exporter::{BatchSpanExporter, ExportMetrics};
pub use batch_processor::{BatchConfig, BatchProcessor};
pub use config::{PipelineConfig, ServiceLabels};
pub use duration::{DurationClassifier, DurationThresholds, PerformanceClass};
pub use error::{PipelineError, ProcessorError};
pub use error_capture::{ErrorCapturingProcessor, ErrorClass};
pub use exporter::{ExportError, JsonFileExporter, NullExporter, SpanExporter, SpanExporterBoxed, StdoutExporter};
pub use pipeline::{
    is_export_eligible, shutdown_on_signal, Disposition, ExporterSettings, PipelineBuilder, PipelineCoordinator,
    ShutdownOutcome,
};
pub use processor::SpanProcessor;
pub use rules::{RuleTable, SamplingRule};
pub use sampler::{
    trace_id_ratio, AlwaysSample, Sampler, SamplerKind, SamplerMode, SamplingDecision, SamplingReason,
    SamplingResult,
};
pub use sink::{EnqueueError, ExportSink, ExportSinkBoxed, NoopSink};
pub use span::{AttributeValue, Attributes, Span, SpanBatch, SpanKind, SpanStatus, Timestamp};
