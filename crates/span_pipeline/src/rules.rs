//! Ordered path rules for head sampling.
//!
//! A [`RuleTable`] is evaluated top to bottom and the first rule whose
//! pattern matches the request path decides the sampling rate. The table
//! keeps the order it was built with; it is never sorted by specificity, so
//! a broad rule placed early shadows narrower rules placed later.

use crate::error::PipelineError;
use regex::Regex;
use std::fmt;

/// Inclusive lower bound for sampling rates.
pub const MIN_SAMPLE_RATE: f64 = 0.0;
/// Inclusive upper bound for sampling rates.
pub const MAX_SAMPLE_RATE: f64 = 1.0;

/// A single `(pattern, rate, tag)` entry.
#[derive(Clone)]
pub struct SamplingRule {
    pattern: Regex,
    rate: f64,
    tag: String,
}

impl fmt::Debug for SamplingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingRule")
            .field("pattern", &self.pattern.as_str())
            .field("rate", &self.rate)
            .field("tag", &self.tag)
            .finish()
    }
}

impl SamplingRule {
    /// Compiles `pattern` and validates `rate`.
    ///
    /// Rates outside `[0, 1]` (including NaN) are rejected here so that
    /// sampling itself can never fail.
    pub fn new(pattern: &str, rate: f64, tag: impl Into<String>) -> Result<Self, PipelineError> {
        let tag = tag.into();
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            return Err(PipelineError::InvalidRate { tag, rate });
        }
        let pattern = Regex::new(pattern).map_err(|e| PipelineError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, rate, tag })
    }

    #[inline]
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Ordered sequence of sampling rules; first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<SamplingRule>,
}

impl RuleTable {
    /// Creates a table from already-validated rules, preserving their order.
    pub fn new(rules: Vec<SamplingRule>) -> Self {
        Self { rules }
    }

    /// Builds a table from `(pattern, rate, tag)` triples.
    ///
    /// Fails on the first invalid entry.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (&'a str, f64, &'a str)>,
    {
        entries
            .into_iter()
            .map(|(pattern, rate, tag)| SamplingRule::new(pattern, rate, tag))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// The compiled-in production table.
    ///
    /// Probes and scrape endpoints are dropped outright, auth flows are
    /// always kept, and the remaining API surface is sampled by rate.
    pub fn builtin() -> Self {
        const BUILTIN: [(&str, f64, &str); 5] = [
            (r"^/health", 0.0, "health_check"),
            (r"^/metrics$", 0.0, "metrics"),
            (r"^/api/auth/", 1.0, "auth"),
            (r"^/api/admin/", 0.5, "admin"),
            (r"^/api/", 0.1, "api"),
        ];
        // The builtin entries are constants covered by tests; a failure here
        // falls back to an empty table so every path takes the default rate.
        Self::from_entries(BUILTIN).unwrap_or_default()
    }

    /// Returns the first rule matching `path`.
    pub fn find(&self, path: &str) -> Option<&SamplingRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[SamplingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_rates() {
        for rate in [-0.1, 1.01, f64::NAN, f64::INFINITY] {
            let err = SamplingRule::new("^/", rate, "bad").unwrap_err();
            assert!(matches!(err, PipelineError::InvalidRate { .. }), "rate {rate}");
        }
        assert!(SamplingRule::new("^/", 0.0, "zero").is_ok());
        assert!(SamplingRule::new("^/", 1.0, "one").is_ok());
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let err = SamplingRule::new("^/api/(", 0.5, "broken").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern { .. }));
    }

    #[test]
    fn test_first_match_wins() {
        let table = RuleTable::from_entries([
            (r"^/health.*", 0.0, "health"),
            (r"^/health/live$", 1.0, "live"),
        ])
        .unwrap();

        assert_eq!(table.find("/health/live").map(SamplingRule::tag), Some("health"));
        assert!(table.find("/users").is_none());
    }

    #[test]
    fn test_builtin_table_compiles_in_order() {
        let table = RuleTable::builtin();
        assert_eq!(table.len(), 5);
        let tags: Vec<_> = table.rules().iter().map(SamplingRule::tag).collect();
        assert_eq!(tags, ["health_check", "metrics", "auth", "admin", "api"]);
        assert_eq!(table.find("/api/auth/login").map(SamplingRule::rate), Some(1.0));
        assert_eq!(table.find("/api/orders").map(SamplingRule::rate), Some(0.1));
    }

    #[test]
    fn test_debug_shows_pattern_source() {
        let rule = SamplingRule::new(r"^/api/", 0.25, "api").unwrap();
        let debug = format!("{:?}", rule);
        assert!(debug.contains("^/api/"));
        assert!(debug.contains("0.25"));
    }
}
