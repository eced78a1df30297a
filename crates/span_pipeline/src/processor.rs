//! Tail processors run once per span when it ends.
//!
//! Processors only enrich attributes. They have no say in whether a span is
//! exported; the coordinator reads the flags they leave behind.

use crate::error::ProcessorError;
use crate::span::Span;

/// Enrichment hook invoked synchronously on span end.
///
/// Implementations must not fail on malformed spans: anything unexpected is
/// logged and the span is left as it was.
pub trait SpanProcessor: Send + Sync {
    /// Returns the processor name for diagnostics.
    fn name(&self) -> &str;

    /// Enriches a finished span in place.
    fn on_end(&self, span: &mut Span);

    /// Flushes buffered state. Stateless processors keep the default.
    fn force_flush(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Releases resources. Stateless processors keep the default.
    fn shutdown(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

impl<T: SpanProcessor + ?Sized> SpanProcessor for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_end(&self, span: &mut Span) {
        (**self).on_end(span);
    }

    fn force_flush(&self) -> Result<(), ProcessorError> {
        (**self).force_flush()
    }

    fn shutdown(&self) -> Result<(), ProcessorError> {
        (**self).shutdown()
    }
}
