//! The hand-off point between the pipeline and the batching exporter.
//!
//! [`ExportSink::enqueue`] runs on the request path and must return
//! immediately. Flushing and shutdown are async and run at teardown.

use crate::exporter::ExportError;
use crate::span::Span;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Why a span could not be queued for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The export queue is at `max_queue_size`; the span was dropped.
    #[error("export queue is full")]
    Full,
    /// The sink has been shut down.
    #[error("export sink is closed")]
    Closed,
}

/// Downstream consumer of finalized spans.
///
/// Uses native async fn in traits; see [`ExportSinkBoxed`] for dynamic dispatch.
pub trait ExportSink: Send + Sync {
    /// Queues a span without blocking.
    fn enqueue(&self, span: Span) -> Result<(), EnqueueError>;

    /// Exports everything queued so far.
    fn flush(&self) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Drains the queue and stops accepting spans.
    fn shutdown(&self) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Abandons in-flight work after a shutdown deadline has passed.
    fn abort(&self) {}

    /// Returns the sink name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`ExportSink`].
pub trait ExportSinkBoxed: Send + Sync {
    fn enqueue(&self, span: Span) -> Result<(), EnqueueError>;

    fn flush_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn shutdown_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn abort(&self);

    fn name(&self) -> &str;
}

/// Blanket implementation: any ExportSink can be used as ExportSinkBoxed
impl<T: ExportSink> ExportSinkBoxed for T {
    fn enqueue(&self, span: Span) -> Result<(), EnqueueError> {
        ExportSink::enqueue(self, span)
    }

    fn flush_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.flush())
    }

    fn shutdown_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.shutdown())
    }

    fn abort(&self) {
        ExportSink::abort(self);
    }

    fn name(&self) -> &str {
        ExportSink::name(self)
    }
}

/// Sink used while telemetry is disabled. Accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ExportSink for NoopSink {
    fn enqueue(&self, _span: Span) -> Result<(), EnqueueError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), ExportError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
