//! W3C trace context on outbound collaborator calls, so lookups and registry checks show up
//! under the stage span that issued them.

use opentelemetry::trace::{SpanContext, TraceContextExt};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// `00-{trace_id}-{span_id}-{flags}`, or `None` for an invalid context.
pub fn traceparent(context: &SpanContext) -> Option<String> {
    context.is_valid().then(|| {
        format!(
            "00-{}-{}-{:02x}",
            context.trace_id(),
            context.span_id(),
            context.trace_flags().to_u8()
        )
    })
}

/// Propagation headers for the current span. Empty when no exporter is installed.
pub fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();

    let Some(parent) = traceparent(span_context) else {
        return headers;
    };
    if let Ok(value) = HeaderValue::from_str(&parent) {
        headers.insert(TRACEPARENT_HEADER, value);
    }
    let state = span_context.trace_state().header();
    if !state.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&state) {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
    headers
}

/// Request builder that attaches the trace headers at send time.
pub struct TracedRequest(reqwest::RequestBuilder);

impl TracedRequest {
    pub fn json<T: serde::Serialize + ?Sized>(self, body: &T) -> Self {
        Self(self.0.json(body))
    }

    pub async fn send(self) -> Result<reqwest::Response, reqwest::Error> {
        self.0.headers(trace_headers()).send().await
    }
}

pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> TracedRequest;
    fn traced_post(&self, url: &str) -> TracedRequest;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> TracedRequest {
        TracedRequest(self.get(url))
    }

    fn traced_post(&self, url: &str) -> TracedRequest {
        TracedRequest(self.post(url))
    }
}
