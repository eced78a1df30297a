//! Error enrichment for finished spans.

use crate::processor::SpanProcessor;
use crate::span::{Span, SpanStatus};

pub const ERROR_CAPTURED: &str = "error_captured";
pub const ERROR_STATUS_CODE: &str = "error_status_code";
pub const ERROR_CLASS: &str = "error_class";

/// Lowest HTTP status treated as a failure.
const MIN_ERROR_STATUS: i64 = 400;
/// Lowest HTTP status attributed to the server.
const MIN_SERVER_ERROR_STATUS: i64 = 500;

/// Which side of the request a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientError,
    ServerError,
}

impl ErrorClass {
    /// 5xx codes are server errors. Anything else, including a missing
    /// code, is a client error.
    pub fn from_status_code(code: Option<i64>) -> Self {
        match code {
            Some(code) if code >= MIN_SERVER_ERROR_STATUS => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
        }
    }
}

/// Tail processor that flags failed spans with `error_captured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorCapturingProcessor;

impl ErrorCapturingProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl SpanProcessor for ErrorCapturingProcessor {
    fn name(&self) -> &str {
        "error_capturing"
    }

    fn on_end(&self, span: &mut Span) {
        let code = span.http_status_code();
        let failed_http = code.is_some_and(|c| c >= MIN_ERROR_STATUS);
        if !failed_http && span.status != SpanStatus::Error {
            return;
        }

        span.set_attribute(ERROR_CAPTURED, true);
        if let Some(code) = code {
            span.set_attribute(ERROR_STATUS_CODE, code);
        }
        span.set_attribute(ERROR_CLASS, ErrorClass::from_status_code(code).as_str());
    }
}
