//! Backends that receive finished batches.
//!
//! [`SpanExporter`] is what a backend implements. The batching task holds
//! backends as `Arc<dyn SpanExporterBoxed>`, which every [`SpanExporter`]
//! gets through a blanket impl.

use crate::span::SpanBatch;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Why a batch did not reach its backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The backend could not be reached or written to.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The export exceeded `export_timeout`.
    #[error("export operation timed out")]
    Timeout,
    /// The exporter no longer accepts work.
    #[error("exporter is shut down")]
    Closed,
}

/// A destination for batches of finished spans.
///
/// Written with `impl Future` returns; implementors can use `async fn`.
pub trait SpanExporter: Send + Sync {
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    fn name(&self) -> &str;
}

/// Dyn-compatible form of [`SpanExporter`].
pub trait SpanExporterBoxed: Send + Sync {
    fn export_boxed(&self, batch: SpanBatch) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(&self, batch: SpanBatch) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Prints a line per exported span when `verbose` is set, for local runs.
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        if !self.verbose {
            return Ok(());
        }
        println!("=== {} spans ===", batch.len());
        for span in &batch.spans {
            println!(
                "{} {} path={} duration_ms={:?} class={:?} decision={:?}",
                span.trace_id,
                span.span_id,
                span.path(),
                span.attribute(crate::duration::DURATION_MS).and_then(|v| v.as_f64()),
                span.attribute(crate::duration::PERFORMANCE_CLASS).and_then(|v| v.as_str()),
                span.sampling_decision,
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Appends each span as one JSON object per line.
pub struct JsonFileExporter {
    file_path: PathBuf,
}

impl JsonFileExporter {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl SpanExporter for JsonFileExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let mut lines = Vec::new();
        for span in &batch.spans {
            serde_json::to_writer(&mut lines, span).map_err(|e| ExportError::Serialization(e.to_string()))?;
            lines.push(b'\n');
        }

        let transport = |e: std::io::Error| ExportError::Transport(e.to_string());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .map_err(transport)?;
        file.write_all(&lines).await.map_err(transport)?;
        file.flush().await.map_err(transport)
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Accepts and discards every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Keeps every exported span in memory, optionally after a delay.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingExporter {
    spans: std::sync::Mutex<Vec<crate::span::Span>>,
    batches: std::sync::atomic::AtomicUsize,
    delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` before recording each batch.
    pub fn delayed(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn all_spans(&self) -> Vec<crate::span::Span> {
        self.spans.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpanExporter for RecordingExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
