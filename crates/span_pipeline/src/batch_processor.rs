//! Batch Processor - Pure Batching Abstraction
//!
//! Buffers finalized spans and decides when a batch is due, based on the
//! batch size limit and the scheduled delay. It holds no exporter, keeps no
//! counters and uses no atomics; the background task in
//! [`batch_exporter`](crate::batch_exporter) owns it and handles exporting,
//! metrics and timeouts.

use crate::error::PipelineError;
use crate::span::{Span, SpanBatch};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Limits passed through to the batching exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Spans buffered between the pipeline and the export task; newer spans
    /// are dropped once it is full
    pub max_queue_size: usize,
    /// Maximum number of spans per exported batch
    pub max_export_batch_size: usize,
    /// Maximum time a span waits before its batch is exported
    pub scheduled_delay_millis: u64,
    /// Maximum time a single export may take
    pub export_timeout_millis: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay_millis: 5_000,
            export_timeout_millis: 30_000,
        }
    }
}

impl BatchConfig {
    pub fn scheduled_delay(&self) -> Duration {
        Duration::from_millis(self.scheduled_delay_millis)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_millis)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_queue_size == 0 {
            return Err(PipelineError::InvalidBatchConfig("max_queue_size must be positive".to_owned()));
        }
        if self.max_export_batch_size == 0 || self.max_export_batch_size > self.max_queue_size {
            return Err(PipelineError::InvalidBatchConfig(format!(
                "max_export_batch_size {} must be in 1..={}",
                self.max_export_batch_size, self.max_queue_size
            )));
        }
        if self.scheduled_delay_millis == 0 || self.export_timeout_millis == 0 {
            return Err(PipelineError::InvalidBatchConfig(
                "scheduled delay and export timeout must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Buffers spans in arrival order and cuts them into batches.
pub struct BatchProcessor {
    pending: Vec<Span>,
    max_batch_size: usize,
    scheduled_delay: Duration,
    last_flush: Instant,
}

impl BatchProcessor {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            pending: Vec::new(),
            max_batch_size: config.max_export_batch_size.max(1),
            scheduled_delay: config.scheduled_delay(),
            last_flush: Instant::now(),
        }
    }

    /// Adds a span to the batch
    pub fn add(&mut self, span: Span) {
        self.pending.push(span);
    }

    /// Returns the total number of pending spans
    pub fn total_pending(&self) -> usize {
        self.pending.len()
    }

    /// A full batch is waiting
    pub fn is_batch_full(&self) -> bool {
        self.pending.len() >= self.max_batch_size
    }

    /// Checks if a batch is due, either because it is full or because the
    /// scheduled delay has passed since the last flush
    pub fn should_flush(&self) -> bool {
        !self.pending.is_empty()
            && (self.is_batch_full() || self.last_flush.elapsed() >= self.scheduled_delay)
    }

    /// Takes up to one batch worth of spans, oldest first.
    ///
    /// Returns `None` if no spans are pending.
    pub fn take_batch(&mut self) -> Option<SpanBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = if self.pending.len() > self.max_batch_size {
            self.pending.split_off(self.max_batch_size)
        } else {
            Vec::new()
        };
        let spans = std::mem::replace(&mut self.pending, rest);
        self.last_flush = Instant::now();
        Some(SpanBatch::with_spans(spans))
    }
}
