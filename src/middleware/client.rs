use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use http::{Request, Response, StatusCode};
use opentelemetry::{
    global::BoxedTracer,
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_semantic_conventions::trace::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_FULL,
};
use tower::Service;
use tower_layer::Layer;

use crate::http_injector;

/// Aggregation-safe classification of an HTTP response status.
///
/// 4xx and 5xx responses are still responses, not transport errors, so they
/// flow back to the caller unchanged and only differ in how the call span is
/// tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    ServerError,
    Other,
}

impl Outcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            Outcome::Success
        } else if status.is_client_error() {
            Outcome::ClientError
        } else if status.is_server_error() {
            Outcome::ServerError
        } else {
            // 1xx and 3xx land here.
            Outcome::Other
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::ClientError => "CLIENT_ERROR",
            Outcome::ServerError => "SERVER_ERROR",
            Outcome::Other => "OTHER",
        }
    }
}

/// Wraps an HTTP client service so every outbound call runs under its own
/// client span.
///
/// The span is a child of whatever span is ambient when the call is made. It
/// is tagged with the request method and URI up front, the trace context is
/// injected into the outgoing headers, and on completion the response status
/// is classified into an [`Outcome`] tag plus the literal status code.
/// Transport errors are recorded on the span and propagated unchanged. The
/// span ends exactly once on every path, including when the in-flight call is
/// dropped.
pub struct TraceLayer {
    name: &'static str,
    tracer: Arc<BoxedTracer>,
}

impl TraceLayer {
    pub fn new(name: &'static str, tracer: Arc<BoxedTracer>) -> Self {
        TraceLayer { name, tracer }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, service: S) -> Self::Service {
        TraceService {
            service,
            name: self.name,
            tracer: self.tracer.clone(),
        }
    }
}

/// This service implements the outbound call instrumentation.
#[derive(Clone)]
pub struct TraceService<S> {
    service: S,
    name: &'static str,
    tracer: Arc<BoxedTracer>,
}

impl<S, Body, ResBody> Service<Request<Body>> for TraceService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>>,
    S::Error: Display,
{
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let parent = crate::context::snapshot();
        let span = self
            .tracer
            .span_builder(self.name)
            .with_kind(SpanKind::Client)
            .start_with_context(&*self.tracer, &parent);
        let cx = parent.with_span(span);

        {
            let span = cx.span();
            span.set_attribute(KeyValue::new(
                HTTP_REQUEST_METHOD,
                request.method().to_string(),
            ));
            span.set_attribute(KeyValue::new(URL_FULL, request.uri().to_string()));
        }
        http_injector::inject_context_into_request(&cx, &mut request);

        ResponseFuture {
            future: self.service.call(request),
            cx,
        }
    }
}

pin_project_lite::pin_project! {
    /// Completes the call span when the response (or error) arrives.
    ///
    /// Holds the span inside its scoped context, so dropping the future
    /// mid-flight still ends the span through the SDK.
    pub struct ResponseFuture<F> {
        #[pin]
        future: F,
        cx: Context,
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Display,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = {
            let _guard = this.cx.clone().attach();
            match this.future.poll(task_cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result,
            }
        };

        let span = this.cx.span();
        match &result {
            Ok(response) => {
                let status = response.status();
                span.set_attribute(KeyValue::new(
                    "outcome",
                    Outcome::from_status(status).as_str(),
                ));
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(status.as_u16()),
                ));
            }
            Err(err) => {
                span.set_status(Status::error(err.to_string()));
                span.add_event(
                    "exception",
                    vec![KeyValue::new("exception.message", err.to_string())],
                );
            }
        }
        span.end();
        Poll::Ready(result)
    }
}
