//! Latency enrichment for finished spans.
//!
//! Every timed span gets a `duration_ms` and a `performance_class`. Spans
//! over the slow threshold are flagged `slow_request`, which is what lets
//! the coordinator export them even when the head sampler dropped them.

use crate::error::PipelineError;
use crate::processor::SpanProcessor;
use crate::span::Span;
use serde::{Deserialize, Serialize};

pub const DURATION_MS: &str = "duration_ms";
pub const PERFORMANCE_CLASS: &str = "performance_class";
pub const SLOW_REQUEST: &str = "slow_request";
pub const SLOW_REQUEST_THRESHOLD_MS: &str = "slow_request.threshold_ms";
pub const SLOW_REQUEST_EXCEEDED_BY_MS: &str = "slow_request.exceeded_by_ms";
pub const SLOW_REQUEST_WARNING: &str = "slow_request_warning";

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Latency thresholds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationThresholds {
    /// Spans strictly above this are slow and always exported.
    pub slow_threshold_ms: u64,
    /// Spans strictly above this (and not slow) get a warning flag.
    pub warning_threshold_ms: u64,
}

impl Default for DurationThresholds {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 2000,
            warning_threshold_ms: 1000,
        }
    }
}

impl DurationThresholds {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.warning_threshold_ms == 0 || self.warning_threshold_ms > self.slow_threshold_ms {
            return Err(PipelineError::InvalidThresholds {
                warning_ms: self.warning_threshold_ms,
                slow_ms: self.slow_threshold_ms,
            });
        }
        Ok(())
    }
}

/// Latency bucket. Upper bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceClass {
    /// ≤ 100ms
    Fast,
    /// ≤ 500ms
    Normal,
    /// ≤ 1000ms
    Slow,
    /// ≤ 2000ms
    VerySlow,
    /// > 2000ms
    Critical,
}

impl PerformanceClass {
    pub fn from_duration_ms(duration_ms: f64) -> Self {
        match duration_ms {
            d if d <= 100.0 => Self::Fast,
            d if d <= 500.0 => Self::Normal,
            d if d <= 1000.0 => Self::Slow,
            d if d <= 2000.0 => Self::VerySlow,
            _ => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
            Self::Slow => "slow",
            Self::VerySlow => "very_slow",
            Self::Critical => "critical",
        }
    }
}

/// Tail processor that measures spans and flags slow ones.
///
/// Every span with both timestamps gets `duration_ms` and a
/// `performance_class`, except one whose end precedes its start: that span
/// is logged at debug level and left without any duration attributes.
#[derive(Debug, Clone)]
pub struct DurationClassifier {
    thresholds: DurationThresholds,
    /// Suppresses the slow-request warning log.
    test_mode: bool,
}

impl DurationClassifier {
    pub fn new(thresholds: DurationThresholds, test_mode: bool) -> Result<Self, PipelineError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            test_mode,
        })
    }

    pub fn thresholds(&self) -> DurationThresholds {
        self.thresholds
    }
}

impl Default for DurationClassifier {
    fn default() -> Self {
        Self {
            thresholds: DurationThresholds::default(),
            test_mode: false,
        }
    }
}

impl SpanProcessor for DurationClassifier {
    fn name(&self) -> &str {
        "duration_classifier"
    }

    fn on_end(&self, span: &mut Span) {
        let Some(nanos) = span.duration_nanos() else {
            return;
        };
        if nanos < 0 {
            tracing::debug!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                "span ends before it starts, skipping duration enrichment"
            );
            return;
        }

        let duration_ms = nanos as f64 / NANOS_PER_MILLI;
        span.set_attribute(DURATION_MS, duration_ms);

        let slow_ms = self.thresholds.slow_threshold_ms as f64;
        if duration_ms > slow_ms {
            let exceeded_by_ms = duration_ms - slow_ms;
            span.set_attribute(SLOW_REQUEST, true);
            span.set_attribute(SLOW_REQUEST_THRESHOLD_MS, self.thresholds.slow_threshold_ms);
            span.set_attribute(SLOW_REQUEST_EXCEEDED_BY_MS, exceeded_by_ms);
            if !self.test_mode {
                tracing::warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    path = span.path(),
                    duration_ms,
                    threshold_ms = self.thresholds.slow_threshold_ms,
                    exceeded_by_ms,
                    "slow request detected"
                );
            }
        } else if duration_ms > self.thresholds.warning_threshold_ms as f64 {
            span.set_attribute(SLOW_REQUEST_WARNING, true);
        }

        span.set_attribute(
            PERFORMANCE_CLASS,
            PerformanceClass::from_duration_ms(duration_ms).as_str(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{AttributeValue, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events emitted while it is the active subscriber.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn warnings_logged(test_mode: bool, duration_ms: u64) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
        let classifier = DurationClassifier::new(DurationThresholds::default(), test_mode).unwrap();
        let mut span = timed(Timestamp::new(0, 0), Timestamp::from_millis(duration_ms));

        tracing::subscriber::with_default(subscriber, || classifier.on_end(&mut span));
        assert_eq!(span.flag(SLOW_REQUEST), duration_ms > 2000);
        count.load(Ordering::Relaxed)
    }

    fn timed(start: Timestamp, end: Timestamp) -> Span {
        Span::new("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7", "/api/orders").with_times(start, end)
    }

    fn classify(duration_nanos: u64) -> Span {
        let classifier = DurationClassifier::new(DurationThresholds::default(), true).unwrap();
        let end = Timestamp::new(duration_nanos / 1_000_000_000, (duration_nanos % 1_000_000_000) as u32);
        let mut span = timed(Timestamp::new(0, 0), end);
        classifier.on_end(&mut span);
        span
    }

    fn class_of(span: &Span) -> Option<&str> {
        span.attribute(PERFORMANCE_CLASS).and_then(AttributeValue::as_str)
    }

    #[test]
    fn test_bucket_boundaries_are_inclusive() {
        assert_eq!(class_of(&classify(100_000_000)), Some("fast"));
        assert_eq!(class_of(&classify(100_001_000)), Some("normal"));
        assert_eq!(class_of(&classify(500_000_000)), Some("normal"));
        assert_eq!(class_of(&classify(1_000_000_000)), Some("slow"));
        assert_eq!(class_of(&classify(2_000_000_000)), Some("very_slow"));
        assert_eq!(class_of(&classify(2_000_001_000)), Some("critical"));
    }

    #[test]
    fn test_slow_request_flags() {
        let span = classify(2_001_000_000);
        assert!(span.flag(SLOW_REQUEST));
        assert_eq!(span.attribute(SLOW_REQUEST_THRESHOLD_MS), Some(&AttributeValue::Int(2000)));
        assert_eq!(span.attribute(SLOW_REQUEST_EXCEEDED_BY_MS), Some(&AttributeValue::Float(1.0)));
        assert!(span.attribute(SLOW_REQUEST_WARNING).is_none());
    }

    #[test]
    fn test_slow_request_warning_log_respects_test_mode() {
        assert_eq!(warnings_logged(false, 2_500), 1);
        assert_eq!(warnings_logged(true, 2_500), 0);
        assert_eq!(warnings_logged(false, 1_500), 0);
    }

    #[test]
    fn test_exactly_at_slow_threshold_is_only_a_warning() {
        let span = classify(2_000_000_000);
        assert!(!span.flag(SLOW_REQUEST));
        assert!(span.flag(SLOW_REQUEST_WARNING));
    }

    #[test]
    fn test_warning_band() {
        let span = classify(1_500_000_000);
        assert!(span.flag(SLOW_REQUEST_WARNING));
        assert!(span.attribute(SLOW_REQUEST).is_none());

        let span = classify(1_000_000_000);
        assert!(span.attribute(SLOW_REQUEST_WARNING).is_none());
    }

    #[test]
    fn test_duration_across_second_boundary() {
        let classifier = DurationClassifier::default();
        let mut span = timed(Timestamp::new(1_700_000_000, 950_000_000), Timestamp::new(1_700_000_001, 50_000_000));
        classifier.on_end(&mut span);
        assert_eq!(span.attribute(DURATION_MS), Some(&AttributeValue::Float(100.0)));
        assert_eq!(class_of(&span), Some("fast"));
    }

    #[test]
    fn test_missing_timestamps_leave_span_untouched() {
        let classifier = DurationClassifier::default();

        let mut no_start = Span::new("a", "b", "/x");
        no_start.end_time = Some(Timestamp::new(5, 0));
        classifier.on_end(&mut no_start);
        assert!(no_start.attributes.is_empty());

        let mut no_end = Span::new("a", "b", "/x");
        no_end.start_time = Some(Timestamp::new(5, 0));
        classifier.on_end(&mut no_end);
        assert!(no_end.attributes.is_empty());
    }

    #[test]
    fn test_inverted_timestamps_are_ignored() {
        let classifier = DurationClassifier::default();
        let mut span = timed(Timestamp::new(10, 0), Timestamp::new(9, 0));
        classifier.on_end(&mut span);
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = DurationThresholds {
            slow_threshold_ms: 300,
            warning_threshold_ms: 200,
        };
        let classifier = DurationClassifier::new(thresholds, true).unwrap();
        let mut span = timed(Timestamp::new(0, 0), Timestamp::from_millis(350));
        classifier.on_end(&mut span);
        assert!(span.flag(SLOW_REQUEST));
        assert_eq!(span.attribute(SLOW_REQUEST_EXCEEDED_BY_MS), Some(&AttributeValue::Float(50.0)));
        assert_eq!(class_of(&span), Some("normal"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let thresholds = DurationThresholds {
            slow_threshold_ms: 1000,
            warning_threshold_ms: 2000,
        };
        assert!(matches!(
            DurationClassifier::new(thresholds, false),
            Err(PipelineError::InvalidThresholds { .. })
        ));
    }
}
