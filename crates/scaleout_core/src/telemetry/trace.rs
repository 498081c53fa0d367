//! Trace span helpers.
//!
//! Gateways, shards and downstream workers share one trace per client
//! request by passing the caller's trace id along in every envelope. Spans
//! opened here carry that id as a field; when the caller's id is not a
//! well-formed W3C trace id a fresh one is generated and the original is
//! kept as `correlation.trace_id` so it can still be searched for.

use tracing::{field, info_span, Span};
use uuid::Uuid;

/// Role of the span in the request flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Handling an inbound client handshake.
    Server,
    /// Processing a message taken from a queue.
    Consumer,
    /// Work with no remote counterpart.
    Internal,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Consumer => "consumer",
            Self::Internal => "internal",
        }
    }
}

/// A span together with the trace id it was opened under.
#[derive(Debug, Clone)]
pub struct OperationSpan {
    pub span: Span,
    pub trace_id: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceSupport;

impl TraceSupport {
    pub fn new() -> Self {
        Self
    }

    /// Whether `trace_id` is 32 lowercase hex digits and not all zero.
    pub fn is_valid_trace_id(trace_id: &str) -> bool {
        trace_id.len() == 32
            && trace_id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            && trace_id.bytes().any(|b| b != b'0')
    }

    /// Generates a new random trace id.
    pub fn generate_trace_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Returns `trace_id` when well formed, otherwise a fresh id.
    pub fn normalize_trace_id(&self, trace_id: &str) -> String {
        if Self::is_valid_trace_id(trace_id) {
            trace_id.to_string()
        } else {
            self.generate_trace_id()
        }
    }

    /// Opens a span for `operation` parented by the caller's trace id.
    pub fn start_span(
        &self,
        operation: &'static str,
        trace_id: &str,
        kind: SpanKind,
    ) -> OperationSpan {
        let normalized = self.normalize_trace_id(trace_id);
        let span = info_span!(
            "scaleout",
            operation,
            otel.kind = kind.as_str(),
            trace_id = %normalized,
            correlation.trace_id = field::Empty,
        );
        if normalized != trace_id && !trace_id.trim().is_empty() {
            span.record("correlation.trace_id", trace_id);
        }
        OperationSpan {
            span,
            trace_id: normalized,
        }
    }
}
