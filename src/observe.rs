use std::{borrow::Cow, error::Error, future::Future};

use opentelemetry::{
    trace::{SpanRef, Status, TraceContextExt, Tracer},
    Context,
};

use crate::context::{self, ScopeExt};

/// Runs `work` inside a span named `name`, parented to the ambient span.
///
/// The ambient context is captured up front and stays installed for the whole
/// of `work`, across every suspension point. The result is handed back to the
/// caller untouched; this function only observes outcomes, it never swallows
/// or remaps them. On error the span is tagged with the error before it is
/// ended; the end itself happens exactly once on a single path shared by both
/// outcomes. If the returned future is dropped mid-flight the span is ended
/// by the SDK when the scoped context goes away with it.
pub async fn run_observed<T, E, W, Trc>(
    tracer: &Trc,
    name: impl Into<Cow<'static, str>>,
    work: W,
) -> Result<T, E>
where
    W: Future<Output = Result<T, E>>,
    E: Error,
    Trc: Tracer,
    Trc::Span: Send + Sync + 'static,
{
    let parent = context::snapshot();
    let span = tracer
        .span_builder(name)
        .start_with_context(tracer, &parent);
    let cx = parent.with_span(span);

    let result = work.in_scope(cx.clone()).await;

    let span = cx.span();
    if let Err(err) = &result {
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }
    span.end();
    result
}

/// Hands the ambient span to `f`, if there is one.
///
/// Call sites use this to attach request-scoped key values before emitting a
/// log line. Without an ambient span this is a no-op rather than an error, so
/// the log line itself is never lost.
pub fn with_active_span(f: impl FnOnce(&SpanRef<'_>)) {
    let cx = Context::current();
    let span = cx.span();
    if span.span_context().is_valid() {
        f(&span);
    }
}
