use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use opentelemetry::{global::BoxedTracer, KeyValue};
use tower::{service_fn, util::BoxCloneSyncService, BoxError, ServiceExt};
use tower_layer::Layer;

use crate::{
    middleware,
    observe::{run_observed, with_active_span},
};

/// Upstream the demo endpoint calls out to.
pub const DEFAULT_BASE_URL: &str = "https://jsonplaceholder.typicode.com";
pub const UPSTREAM_PATH: &str = "/todos/1";
/// Stand-in for a complex calculation; suspends the handler without blocking
/// the worker.
pub const COMPUTE_DELAY: Duration = Duration::from_secs(1);
const OUTBOUND_SPAN_NAME: &str = "todo.api";

/// Boxed HTTP client with the response body already collected, so tests can
/// swap in a `service_fn` mock for the real reqwest-backed client.
pub type HttpClient = BoxCloneSyncService<Request<Bytes>, Response<Bytes>, BoxError>;

#[derive(Clone)]
pub struct AppState {
    pub tracer: Arc<BoxedTracer>,
    pub client: HttpClient,
    pub base_url: String,
    #[cfg(feature = "db")]
    pub repo: crate::repo::TodoRepository,
}

/// Builds the application router, with every route behind the inbound trace
/// middleware so handlers always run under an ambient request span.
pub fn router(state: AppState) -> Router {
    let tracer = state.tracer.clone();
    Router::new()
        .route("/test", get(test))
        .layer(middleware::server::TraceLayer::new(tracer))
        .with_state(state)
}

/// The production outbound client: reqwest behind the call instrumentation
/// layer, boxed down to [`HttpClient`].
pub fn http_client(tracer: Arc<BoxedTracer>) -> HttpClient {
    let client = reqwest::Client::new();
    let send = service_fn(move |request: Request<Bytes>| {
        let client = client.clone();
        async move {
            let (parts, body) = request.into_parts();
            let response = client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers)
                .body(body)
                .send()
                .await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, BoxError>(Response::builder().status(status).body(bytes)?)
        }
    });
    let svc = middleware::client::TraceLayer::new(OUTBOUND_SPAN_NAME, tracer).layer(send);
    BoxCloneSyncService::new(svc)
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid outbound request: {0}")]
    Request(#[from] http::Error),
    #[error("outbound request failed: {0}")]
    Upstream(BoxError),
    #[cfg(feature = "db")]
    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<Infallible> for AppError {
    fn from(err: Infallible) -> Self {
        match err {}
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// `GET /test`: a traced delay, a traced log line, optionally a traced
/// read of the `todo` table, and a traced outbound call, in that order.
/// Errors from the database or the upstream are not caught here; they
/// surface as the default error response while the spans on the way out are
/// still closed by the instrumentation.
async fn test(State(state): State<AppState>) -> Result<String, AppError> {
    run_observed(state.tracer.as_ref(), "delay", async {
        tokio::time::sleep(COMPUTE_DELAY).await;
        Ok::<_, Infallible>(())
    })
    .await?;

    with_active_span(|span| {
        span.set_attribute(KeyValue::new("test_key", "test sample value"));
    });
    tracing::info!("test log with tracing info");

    #[cfg(feature = "db")]
    let count = run_observed(
        state.tracer.as_ref(),
        "todo.find-all",
        state.repo.find_all(),
    )
    .await?
    .len();

    let uri = format!("{}{}", state.base_url, UPSTREAM_PATH);
    let request = Request::get(uri.as_str()).body(Bytes::new())?;
    let response = state
        .client
        .clone()
        .oneshot(request)
        .await
        .map_err(AppError::Upstream)?;
    let body = String::from_utf8_lossy(response.body()).into_owned();

    #[cfg(feature = "db")]
    return Ok(format!("{count} {body}"));
    #[cfg(not(feature = "db"))]
    Ok(body)
}
