//! Background batching exporter.
//!
//! Spans enter a bounded tokio channel through a non-blocking `try_send`.
//! A single worker task drains the channel into a [`BatchProcessor`] and
//! ships batches on the scheduled delay, when a batch fills up, on
//! [`flush`](ExportSink::flush) and at [`shutdown`](ExportSink::shutdown).
//! Every export is bounded by `export_timeout`.

use crate::batch_processor::{BatchConfig, BatchProcessor};
use crate::error::PipelineError;
use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::sink::{EnqueueError, ExportSink};
use crate::span::{Span, SpanBatch};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Thread-safe counters shared between callers and the export task.
///
/// All counters use `Ordering::Relaxed`; they are statistics and guard no
/// other data.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    spans_enqueued: AtomicU64,
    spans_dropped: AtomicU64,
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_errors: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_enqueued(&self) -> u64 {
        self.spans_enqueued.load(Ordering::Relaxed)
    }

    /// Spans rejected because the queue was full.
    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

enum Control {
    Flush(oneshot::Sender<Result<(), ExportError>>),
    Shutdown(oneshot::Sender<Result<(), ExportError>>),
}

/// [`ExportSink`] that batches spans for a [`SpanExporterBoxed`] backend.
pub struct BatchSpanExporter {
    span_tx: mpsc::Sender<Span>,
    control_tx: mpsc::UnboundedSender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<ExportMetrics>,
    closed: AtomicBool,
    name: String,
}

impl BatchSpanExporter {
    /// Validates `config` and spawns the export task on the current tokio runtime.
    ///
    /// Fails with [`PipelineError::ExporterInit`] outside a runtime.
    pub fn new(config: BatchConfig, exporter: Arc<dyn SpanExporterBoxed>) -> Result<Self, PipelineError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::ExporterInit(format!("no tokio runtime: {}", e)))?;

        let (span_tx, span_rx) = mpsc::channel(config.max_queue_size);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(ExportMetrics::default());
        let name = format!("batch({})", exporter.name());

        let worker = Worker {
            processor: BatchProcessor::new(&config),
            exporter,
            metrics: Arc::clone(&metrics),
            export_timeout: config.export_timeout(),
        };
        let handle = runtime.spawn(worker.run(span_rx, control_rx, config.scheduled_delay()));

        Ok(Self {
            span_tx,
            control_tx,
            worker: Mutex::new(Some(handle)),
            metrics,
            closed: AtomicBool::new(false),
            name,
        })
    }

    pub fn metrics(&self) -> &Arc<ExportMetrics> {
        &self.metrics
    }

    async fn request(&self, make: fn(oneshot::Sender<Result<(), ExportError>>) -> Control) -> Result<(), ExportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control_tx.send(make(ack_tx)).map_err(|_| ExportError::Closed)?;
        ack_rx.await.map_err(|_| ExportError::Closed)?
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl ExportSink for BatchSpanExporter {
    fn enqueue(&self, span: Span) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        match self.span_tx.try_send(span) {
            Ok(()) => {
                self.metrics.spans_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.spans_dropped.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    async fn flush(&self) -> Result<(), ExportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExportError::Closed);
        }
        self.request(Control::Flush).await
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.request(Control::Shutdown).await;
        if let Some(handle) = self.take_worker() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "export task panicked during shutdown");
            }
        }
        result
    }

    fn abort(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.take_worker() {
            handle.abort();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct Worker {
    processor: BatchProcessor,
    exporter: Arc<dyn SpanExporterBoxed>,
    metrics: Arc<ExportMetrics>,
    export_timeout: Duration,
}

impl Worker {
    async fn run(
        mut self,
        mut span_rx: mpsc::Receiver<Span>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        scheduled_delay: Duration,
    ) {
        let mut ticker = tokio::time::interval(scheduled_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                control = control_rx.recv() => match control {
                    Some(Control::Flush(ack)) => {
                        while let Ok(span) = span_rx.try_recv() {
                            self.processor.add(span);
                        }
                        let _ = ack.send(self.export_all().await);
                    }
                    Some(Control::Shutdown(ack)) => {
                        self.drain_closed(&mut span_rx).await;
                        let _ = ack.send(self.export_all().await);
                        break;
                    }
                    None => {
                        // Every handle is gone; drain what is left and stop.
                        self.drain_closed(&mut span_rx).await;
                        if let Err(e) = self.export_all().await {
                            tracing::error!(error = %e, "final export failed");
                        }
                        break;
                    }
                },

                Some(span) = span_rx.recv() => {
                    self.processor.add(span);
                    if self.processor.is_batch_full() {
                        self.export_due().await;
                    }
                }

                _ = ticker.tick() => {
                    if self.processor.should_flush() {
                        self.export_due().await;
                    }
                }
            }
        }
    }

    /// Closes the queue and moves everything still buffered into the processor.
    async fn drain_closed(&mut self, span_rx: &mut mpsc::Receiver<Span>) {
        span_rx.close();
        while let Some(span) = span_rx.recv().await {
            self.processor.add(span);
        }
    }

    /// Exports batches while one is due; failures are logged and the batch is dropped.
    async fn export_due(&mut self) {
        while self.processor.should_flush() {
            let Some(batch) = self.processor.take_batch() else {
                break;
            };
            if let Err(e) = self.export(batch).await {
                tracing::error!(exporter = self.exporter.name(), error = %e, "export error");
            }
        }
    }

    /// Exports everything pending, reporting the first failure.
    async fn export_all(&mut self) -> Result<(), ExportError> {
        let mut result = Ok(());
        while let Some(batch) = self.processor.take_batch() {
            if let Err(e) = self.export(batch).await {
                tracing::error!(exporter = self.exporter.name(), error = %e, "export error");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn export(&mut self, batch: SpanBatch) -> Result<(), ExportError> {
        let span_count = batch.len() as u64;
        let outcome = tokio::time::timeout(self.export_timeout, self.exporter.export_boxed(batch))
            .await
            .unwrap_or(Err(ExportError::Timeout));
        match outcome {
            Ok(()) => {
                self.metrics.record_success(span_count);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::RecordingExporter;

    fn span(i: usize) -> Span {
        Span::new(format!("{:032x}", i), format!("{:016x}", i), "/api/orders")
    }

    fn config() -> BatchConfig {
        BatchConfig {
            max_queue_size: 64,
            max_export_batch_size: 16,
            scheduled_delay_millis: 50,
            export_timeout_millis: 1_000,
        }
    }

    #[tokio::test]
    async fn test_flush_exports_queued_spans() {
        let backend = Arc::new(RecordingExporter::new());
        let exporter = BatchSpanExporter::new(config(), backend.clone()).unwrap();

        for i in 0..40 {
            exporter.enqueue(span(i)).unwrap();
        }
        exporter.flush().await.unwrap();

        assert_eq!(backend.exported_count(), 40);
        assert_eq!(exporter.metrics().spans_enqueued(), 40);
        assert_eq!(exporter.metrics().spans_exported(), 40);
        exporter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_delay_exports_without_flush() {
        let backend = Arc::new(RecordingExporter::new());
        let exporter = BatchSpanExporter::new(config(), backend.clone()).unwrap();

        exporter.enqueue(span(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(backend.exported_count(), 1);
        exporter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_closes() {
        let backend = Arc::new(RecordingExporter::new());
        let exporter = BatchSpanExporter::new(config(), backend.clone()).unwrap();

        for i in 0..10 {
            exporter.enqueue(span(i)).unwrap();
        }
        exporter.shutdown().await.unwrap();
        assert_eq!(backend.exported_count(), 10);

        assert_eq!(exporter.enqueue(span(99)), Err(EnqueueError::Closed));
        assert_eq!(exporter.flush().await, Err(ExportError::Closed));
        // Second shutdown is a no-op.
        assert!(exporter.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let backend = Arc::new(RecordingExporter::delayed(Duration::from_secs(60)));
        let small = BatchConfig {
            max_queue_size: 4,
            max_export_batch_size: 1,
            scheduled_delay_millis: 10_000,
            export_timeout_millis: 60_000,
        };
        let exporter = BatchSpanExporter::new(small, backend).unwrap();

        let mut dropped = 0;
        for i in 0..100 {
            if exporter.enqueue(span(i)) == Err(EnqueueError::Full) {
                dropped += 1;
            }
        }

        assert!(dropped > 0);
        assert_eq!(exporter.metrics().spans_dropped(), dropped);
        exporter.abort();
    }

    #[tokio::test]
    async fn test_export_timeout_is_reported() {
        let backend = Arc::new(RecordingExporter::delayed(Duration::from_secs(5)));
        let short = BatchConfig {
            export_timeout_millis: 20,
            ..config()
        };
        let exporter = BatchSpanExporter::new(short, backend).unwrap();

        exporter.enqueue(span(1)).unwrap();
        assert_eq!(exporter.flush().await, Err(ExportError::Timeout));
        assert_eq!(exporter.metrics().export_errors(), 1);
        exporter.shutdown().await.unwrap();
    }

    #[test]
    fn test_requires_runtime() {
        let result = BatchSpanExporter::new(config(), Arc::new(RecordingExporter::new()));
        assert!(matches!(result, Err(PipelineError::ExporterInit(_))));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = BatchConfig {
            max_export_batch_size: 0,
            ..config()
        };
        assert!(matches!(
            BatchSpanExporter::new(bad, Arc::new(RecordingExporter::new())),
            Err(PipelineError::InvalidBatchConfig(_))
        ));
    }
}
