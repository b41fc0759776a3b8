use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use http::{Request, Response};
use opentelemetry::{
    global::BoxedTracer,
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    KeyValue,
};
use opentelemetry_semantic_conventions::trace::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_PATH,
};
use tower::Service;
use tower_layer::Layer;

use crate::http_injector;

/// Opens a server span per inbound request and keeps it ambient for the
/// route handlers.
///
/// Remote context is extracted from the request headers, so requests arriving
/// with a `traceparent` header continue the caller's trace. The span stays
/// installed across every suspension point of the handler and ends exactly
/// once when the response is produced.
///
/// Generally, the middleware should be used on every http route, this usually
/// means that it can be registered globally and in the last position, to be
/// the first to run.
///
/// ```ignore
/// let app = Router::new()
///     .route("/test", get(handler))
///     .layer(TraceLayer::new(tracer));
/// ```
#[derive(Clone)]
pub struct TraceLayer {
    tracer: Arc<BoxedTracer>,
}

impl TraceLayer {
    pub fn new(tracer: Arc<BoxedTracer>) -> Self {
        TraceLayer { tracer }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, service: S) -> Self::Service {
        TraceService {
            service,
            tracer: self.tracer.clone(),
        }
    }
}

/// This service implements the inbound trace behavior.
#[derive(Clone)]
pub struct TraceService<S> {
    service: S,
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

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let remote = http_injector::extract_context_from_request(&request);
        let span = self
            .tracer
            .span_builder("request")
            .with_kind(SpanKind::Server)
            .start_with_context(&*self.tracer, &remote);
        let cx = remote.with_span(span);

        {
            let span = cx.span();
            span.set_attribute(KeyValue::new(
                HTTP_REQUEST_METHOD,
                request.method().to_string(),
            ));
            span.set_attribute(KeyValue::new(URL_PATH, request.uri().path().to_string()));
        }

        ResponseFuture {
            future: self.service.call(request),
            cx,
        }
    }
}

pin_project_lite::pin_project! {
    /// Drives the handler inside the request scope and ends the server span
    /// when the response is ready.
    pub struct ResponseFuture<F> {
        #[pin]
        future: F,
        cx: opentelemetry::Context,
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
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(response.status().as_u16()),
                ));
            }
            Err(err) => {
                span.set_status(Status::error(err.to_string()));
            }
        }
        span.end();
        Poll::Ready(result)
    }
}
