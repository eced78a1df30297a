//! Head sampling.
//!
//! The [`Sampler`] is a pure function of `(trace_id, path, attributes)`.
//! Probabilistic decisions hash the trace ID rather than drawing a random
//! number, so every span of one trace gets the same answer in every service
//! that shares the rule table.

use crate::rules::{RuleTable, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::span::{AttributeValue, Attributes, HTTP_STATUS_CODE};
use serde::{Deserialize, Serialize};

/// Rate applied to paths no rule matches.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.01;
/// Tag recorded for decisions taken on the default rate.
pub const DEFAULT_RULE_TAG: &str = "default";

/// Derived attribute carrying the tag of the deciding rule.
pub const SAMPLING_RULE_KEY: &str = "sampling.rule";
/// Derived attribute carrying why the span was kept.
pub const SAMPLING_REASON_KEY: &str = "sampling.reason";
/// Derived attribute carrying the effective rate.
pub const SAMPLING_RATE_KEY: &str = "sampling.rate";

/// Number of trailing hex digits of the trace ID fed to the hash.
const TRACE_ID_HASH_DIGITS: usize = 8;

/// Why a span was kept by the head sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingReason {
    /// Response status was already known to be an error.
    ErrorResponse,
    /// The matched rule has rate 1.
    AlwaysSample,
    /// The trace ID hashed under the matched rule's rate.
    Probabilistic,
    /// No rule matched and the default rate kept the trace.
    Default,
}

impl SamplingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorResponse => "error_response",
            Self::AlwaysSample => "always_sample",
            Self::Probabilistic => "probabilistic",
            Self::Default => "default",
        }
    }
}

/// Outcome of a head sampling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingDecision {
    /// Not recorded and not exported unless rescued at the tail.
    Drop,
    /// Recorded locally but not marked for export. No current rule produces it.
    RecordOnly,
    /// Recorded and exported.
    RecordAndSample,
}

impl SamplingDecision {
    #[inline]
    pub fn is_recording(&self) -> bool {
        !matches!(self, Self::Drop)
    }

    #[inline]
    pub fn is_sampled(&self) -> bool {
        matches!(self, Self::RecordAndSample)
    }
}

/// A decision plus the attributes the sampler wants stamped on the span.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingResult {
    pub decision: SamplingDecision,
    pub attributes: Option<Attributes>,
}

impl SamplingResult {
    pub fn drop() -> Self {
        Self {
            decision: SamplingDecision::Drop,
            attributes: None,
        }
    }

    fn sampled(tag: &str, reason: SamplingReason, rate: f64) -> Self {
        let attributes = Attributes::from([
            (SAMPLING_RULE_KEY.to_owned(), AttributeValue::from(tag)),
            (SAMPLING_REASON_KEY.to_owned(), AttributeValue::from(reason.as_str())),
            (SAMPLING_RATE_KEY.to_owned(), AttributeValue::Float(rate)),
        ]);
        Self {
            decision: SamplingDecision::RecordAndSample,
            attributes: Some(attributes),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.attribute(SAMPLING_RULE_KEY)
    }

    pub fn reason(&self) -> Option<&str> {
        self.attribute(SAMPLING_REASON_KEY)
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|attrs| attrs.get(key))
            .and_then(AttributeValue::as_str)
    }
}

/// Maps the last 8 hex digits of `trace_id` onto `[0, 1]`.
///
/// Returns `None` for IDs shorter than 8 characters or whose tail is not
/// plain hex.
pub fn trace_id_ratio(trace_id: &str) -> Option<f64> {
    let start = trace_id.len().checked_sub(TRACE_ID_HASH_DIGITS)?;
    let tail = trace_id.get(start..)?;
    if !tail.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(tail, 16).ok()?;
    Some(f64::from(value) / f64::from(u32::MAX))
}

/// Rule-driven head sampler.
#[derive(Debug, Clone)]
pub struct Sampler {
    rules: RuleTable,
    default_rate: f64,
}

impl Sampler {
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            default_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Sampler over the compiled-in rule table.
    pub fn builtin() -> Self {
        Self::new(RuleTable::builtin())
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Decides whether a span should be recorded and exported.
    ///
    /// Never fails and never blocks: the work is one attribute lookup, a
    /// scan over the rule table and at most one hash.
    pub fn should_sample(&self, trace_id: &str, path: &str, attributes: &Attributes) -> SamplingResult {
        let error_status = attributes
            .get(HTTP_STATUS_CODE)
            .and_then(AttributeValue::as_i64)
            .is_some_and(|code| code >= 400);
        if error_status {
            return SamplingResult::sampled(
                SamplingReason::ErrorResponse.as_str(),
                SamplingReason::ErrorResponse,
                MAX_SAMPLE_RATE,
            );
        }

        let Some(rule) = self.rules.find(path) else {
            return self.sample_default(trace_id_ratio(trace_id));
        };

        if rule.rate() <= MIN_SAMPLE_RATE {
            return SamplingResult::drop();
        }
        if rule.rate() >= MAX_SAMPLE_RATE {
            return SamplingResult::sampled(rule.tag(), SamplingReason::AlwaysSample, MAX_SAMPLE_RATE);
        }

        match trace_id_ratio(trace_id) {
            Some(ratio) if ratio < rule.rate() => {
                SamplingResult::sampled(rule.tag(), SamplingReason::Probabilistic, rule.rate())
            }
            Some(_) => SamplingResult::drop(),
            // Unhashable IDs cannot honour the rule's rate.
            None => self.sample_default(None),
        }
    }

    /// Applies the default rate, treating an unhashable trace ID as zero.
    fn sample_default(&self, ratio: Option<f64>) -> SamplingResult {
        if ratio.unwrap_or(0.0) < self.default_rate {
            SamplingResult::sampled(DEFAULT_RULE_TAG, SamplingReason::Default, self.default_rate)
        } else {
            SamplingResult::drop()
        }
    }
}

/// Sampler that keeps every span, for local and debug environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSample;

impl AlwaysSample {
    pub fn should_sample(&self) -> SamplingResult {
        SamplingResult::sampled(
            SamplingReason::AlwaysSample.as_str(),
            SamplingReason::AlwaysSample,
            MAX_SAMPLE_RATE,
        )
    }
}

/// How the head sampler is chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerMode {
    /// Always sample in development-like environments, rules elsewhere.
    #[default]
    Auto,
    RuleBased,
    AlwaysSample,
}

impl SamplerMode {
    /// Parses the names accepted in configuration, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "rule_based" | "rules" => Some(Self::RuleBased),
            "always_sample" | "always_on" => Some(Self::AlwaysSample),
            _ => None,
        }
    }
}

/// Environments where `SamplerMode::Auto` keeps every span.
const ALWAYS_SAMPLE_ENVIRONMENTS: [&str; 3] = ["development", "local", "test"];

/// The head sampler in use, fixed for the lifetime of the pipeline.
#[derive(Debug, Clone)]
pub enum SamplerKind {
    Static(AlwaysSample),
    RuleBased(Sampler),
}

impl SamplerKind {
    /// Picks the sampler variant once, from the configured mode and environment.
    pub fn from_config(mode: SamplerMode, environment: &str, rules: RuleTable) -> Self {
        let always = match mode {
            SamplerMode::AlwaysSample => true,
            SamplerMode::RuleBased => false,
            SamplerMode::Auto => ALWAYS_SAMPLE_ENVIRONMENTS
                .iter()
                .any(|env| env.eq_ignore_ascii_case(environment.trim())),
        };
        if always {
            Self::Static(AlwaysSample)
        } else {
            Self::RuleBased(Sampler::new(rules))
        }
    }

    pub fn should_sample(&self, trace_id: &str, path: &str, attributes: &Attributes) -> SamplingResult {
        match self {
            Self::Static(sampler) => sampler.should_sample(),
            Self::RuleBased(sampler) => sampler.should_sample(trace_id, path, attributes),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl Default for SamplerKind {
    fn default() -> Self {
        Self::RuleBased(Sampler::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, f64, &str)]) -> RuleTable {
        RuleTable::from_entries(entries.iter().copied()).unwrap()
    }

    #[test]
    fn test_trace_id_ratio() {
        assert_eq!(trace_id_ratio("0000000000000000000000000000000000"), Some(0.0));
        assert_eq!(trace_id_ratio("4bf92f3577b34da6a3ce929dffffffff"), Some(1.0));
        assert_eq!(trace_id_ratio("7FFFFFFF"), Some(f64::from(0x7FFF_FFFFu32) / f64::from(u32::MAX)));
        assert_eq!(trace_id_ratio("abc"), None);
        assert_eq!(trace_id_ratio("trace-id-not-hex"), None);
        assert_eq!(trace_id_ratio("0000000+1234567"), None);
        assert_eq!(trace_id_ratio("000000000000000é"), None);
    }

    #[test]
    fn test_boundary_rates() {
        let sampler = Sampler::new(table(&[(r"^/never", 0.0, "never"), (r"^/always", 1.0, "always")]));
        let attrs = Attributes::new();

        for trace_id in ["00000000", "ffffffff", "4bf92f3577b34da6a3ce929d0e0e4736"] {
            assert_eq!(sampler.should_sample(trace_id, "/never", &attrs).decision, SamplingDecision::Drop);
            let kept = sampler.should_sample(trace_id, "/always", &attrs);
            assert_eq!(kept.decision, SamplingDecision::RecordAndSample);
            assert_eq!(kept.tag(), Some("always"));
            assert_eq!(kept.reason(), Some("always_sample"));
        }
    }

    #[test]
    fn test_earlier_rule_wins() {
        let sampler = Sampler::new(table(&[(r"^/health.*", 0.0, "health"), (r"^/health/live$", 1.0, "live")]));
        let result = sampler.should_sample("ffffffffffffffff", "/health/live", &Attributes::new());
        assert_eq!(result.decision, SamplingDecision::Drop);
    }

    #[test]
    fn test_error_status_overrides_drop_rule() {
        let sampler = Sampler::new(table(&[(r"^/health", 0.0, "health")]));
        let attrs = Attributes::from([(HTTP_STATUS_CODE.to_owned(), AttributeValue::Int(503))]);
        let result = sampler.should_sample("ffffffff", "/health", &attrs);
        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
        assert_eq!(result.reason(), Some("error_response"));

        let ok = Attributes::from([(HTTP_STATUS_CODE.to_owned(), AttributeValue::Int(399))]);
        assert_eq!(sampler.should_sample("ffffffff", "/health", &ok).decision, SamplingDecision::Drop);
    }

    #[test]
    fn test_probabilistic_threshold() {
        let sampler = Sampler::new(table(&[(r"^/api/", 0.5, "api")]));
        let attrs = Attributes::new();

        let low = sampler.should_sample("abcdef0000000010", "/api/orders", &attrs);
        assert_eq!(low.decision, SamplingDecision::RecordAndSample);
        assert_eq!(low.reason(), Some("probabilistic"));
        assert_eq!(low.tag(), Some("api"));

        let high = sampler.should_sample("abcdef00f0000000", "/api/orders", &attrs);
        assert_eq!(high.decision, SamplingDecision::Drop);
        assert!(high.attributes.is_none());
    }

    #[test]
    fn test_default_rate_for_unmatched_paths() {
        let sampler = Sampler::new(RuleTable::default());
        let attrs = Attributes::new();

        // 0x00000001 / 0xFFFFFFFF is well under 1%
        let kept = sampler.should_sample("0000000000000001", "/anything", &attrs);
        assert_eq!(kept.decision, SamplingDecision::RecordAndSample);
        assert_eq!(kept.tag(), Some(DEFAULT_RULE_TAG));

        let dropped = sampler.should_sample("0000000080000000", "/anything", &attrs);
        assert_eq!(dropped.decision, SamplingDecision::Drop);
    }

    #[test]
    fn test_malformed_trace_id_takes_default_path() {
        let sampler = Sampler::new(table(&[(r"^/api/", 0.5, "api"), (r"^/off", 0.0, "off")]));
        let attrs = Attributes::new();

        for trace_id in ["", "xyz", "not-a-hex-trace-id"] {
            let result = sampler.should_sample(trace_id, "/api/orders", &attrs);
            assert_eq!(result.tag(), Some(DEFAULT_RULE_TAG), "trace_id {trace_id:?}");
            assert_eq!(sampler.should_sample(trace_id, "/off", &attrs).decision, SamplingDecision::Drop);
        }
    }

    #[test]
    fn test_repeated_decisions_are_identical() {
        let sampler = Sampler::builtin();
        let attrs = Attributes::new();
        let first = sampler.should_sample("4bf92f3577b34da6a3ce929d0e0e4736", "/api/orders", &attrs);
        for _ in 0..100 {
            assert_eq!(
                sampler.should_sample("4bf92f3577b34da6a3ce929d0e0e4736", "/api/orders", &attrs),
                first
            );
        }
    }

    #[test]
    fn test_sampler_kind_factory() {
        let rules = RuleTable::builtin();
        assert!(SamplerKind::from_config(SamplerMode::Auto, "development", rules.clone()).is_static());
        assert!(SamplerKind::from_config(SamplerMode::Auto, " Local ", rules.clone()).is_static());
        assert!(!SamplerKind::from_config(SamplerMode::Auto, "production", rules.clone()).is_static());
        assert!(SamplerKind::from_config(SamplerMode::AlwaysSample, "production", rules.clone()).is_static());
        assert!(!SamplerKind::from_config(SamplerMode::RuleBased, "development", rules).is_static());
    }

    #[test]
    fn test_static_sampler_ignores_rules() {
        let kind = SamplerKind::Static(AlwaysSample);
        let result = kind.should_sample("", "/health", &Attributes::new());
        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
    }

    #[test]
    fn test_decision_helpers() {
        assert!(!SamplingDecision::Drop.is_recording());
        assert!(SamplingDecision::RecordOnly.is_recording());
        assert!(!SamplingDecision::RecordOnly.is_sampled());
        assert!(SamplingDecision::RecordAndSample.is_sampled());
    }

    #[test]
    fn test_sampler_mode_parse() {
        assert_eq!(SamplerMode::parse("Always_Sample"), Some(SamplerMode::AlwaysSample));
        assert_eq!(SamplerMode::parse("rules"), Some(SamplerMode::RuleBased));
        assert_eq!(SamplerMode::parse("sometimes"), None);
    }
}
