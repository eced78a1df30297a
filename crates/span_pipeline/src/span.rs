use crate::sampler::SamplingDecision;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute key the HTTP layer populates with the response status.
pub const HTTP_STATUS_CODE: &str = "http.status_code";
/// Attribute key holding the matched route template.
pub const HTTP_ROUTE: &str = "http.route";
/// Attribute key holding the raw request target.
pub const HTTP_TARGET: &str = "http.target";

/// String-keyed span metadata. Insertion order is irrelevant.
pub type Attributes = HashMap<String, AttributeValue>;

/// A wall-clock instant split into whole seconds and a nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: u64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Builds a timestamp from a millisecond offset since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            secs: millis / 1000,
            nanos: ((millis % 1000) * 1_000_000) as u32,
        }
    }

    /// Current wall-clock time. Clocks set before the epoch read as zero.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: elapsed.as_secs(),
            nanos: elapsed.subsec_nanos(),
        }
    }

    /// Total nanoseconds since the epoch, widened so subtraction cannot overflow.
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.secs) * 1_000_000_000 + i128::from(self.nanos)
    }
}

/// Represents a single unit of work handed to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Hex trace identifier shared by every span of one request chain
    pub trace_id: String,
    /// Hex span identifier
    pub span_id: String,
    /// Parent span identifier (`None` for a root span)
    pub parent_span_id: Option<String>,
    /// Operation name, usually the request path
    pub name: String,
    /// Span attributes, mutable until export
    pub attributes: Attributes,
    /// Span start time
    pub start_time: Option<Timestamp>,
    /// Span end time
    pub end_time: Option<Timestamp>,
    /// Span status
    pub status: SpanStatus,
    /// Span kind
    pub kind: SpanKind,
    /// Head sampling decision recorded when the span started
    pub sampling_decision: Option<SamplingDecision>,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

impl AttributeValue {
    /// Reads the value as an integer.
    ///
    /// Integral floats and numeric strings are accepted since HTTP layers
    /// disagree on how they encode status codes.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanStatus {
    /// Span status unknown
    #[default]
    Unset,
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error,
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    #[default]
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

/// Batch of spans for export
#[derive(Debug)]
pub struct SpanBatch {
    /// All spans in this batch
    pub spans: Vec<Span>,
    /// Batch creation timestamp
    pub timestamp: SystemTime,
}

impl Span {
    /// Creates a span that has not started yet.
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            attributes: Attributes::new(),
            start_time: None,
            end_time: None,
            status: SpanStatus::Unset,
            kind: SpanKind::Server,
            sampling_decision: None,
        }
    }

    /// Sets the parent span identifier.
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets both timestamps at once.
    pub fn with_times(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Adds an attribute while building the span.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Stamps the start time with the current clock.
    pub fn start(&mut self) {
        self.start_time = Some(Timestamp::now());
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = Some(Timestamp::now());
        self.status = status;
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Returns `true` only when the attribute is present and set to boolean `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.attribute(key).and_then(AttributeValue::as_bool).unwrap_or(false)
    }

    /// HTTP status code set by the request layer, if any.
    pub fn http_status_code(&self) -> Option<i64> {
        self.attribute(HTTP_STATUS_CODE).and_then(AttributeValue::as_i64)
    }

    /// Path used for rule matching: route, then target, then the span name.
    pub fn path(&self) -> &str {
        [HTTP_ROUTE, HTTP_TARGET]
            .iter()
            .find_map(|key| self.attribute(key).and_then(AttributeValue::as_str))
            .unwrap_or(&self.name)
    }

    /// Duration in nanoseconds, or `None` if a timestamp is missing.
    ///
    /// Negative when the end time precedes the start time.
    pub fn duration_nanos(&self) -> Option<i128> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.as_nanos() - start.as_nanos()),
            _ => None,
        }
    }
}

impl SpanBatch {
    /// Creates a new empty span batch
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Creates a batch with the given spans
    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            timestamp: SystemTime::now(),
        }
    }

    /// Adds a span to the batch
    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Returns the number of spans in the batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}
