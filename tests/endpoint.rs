use std::{sync::Arc, time::Duration};

use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use opentelemetry::{global::BoxedTracer, trace::TracerProvider as _};
use opentelemetry_sdk::{testing::trace::InMemorySpanExporter, trace::TracerProvider};
use tower::{service_fn, util::BoxCloneSyncService, BoxError, Layer, ServiceExt};
use traceflow::{
    app::{router, AppState, HttpClient},
    middleware,
};

fn test_tracer() -> (InMemorySpanExporter, TracerProvider, Arc<BoxedTracer>) {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = Arc::new(BoxedTracer::new(Box::new(provider.tracer("test"))));
    (exporter, provider, tracer)
}

/// Upstream double returning a fixed body, behind the same instrumentation
/// layer the production client uses.
fn mock_client(tracer: Arc<BoxedTracer>, body: &'static str) -> HttpClient {
    let upstream = service_fn(move |_req: Request<Bytes>| async move {
        Ok::<_, BoxError>(Response::new(Bytes::from_static(body.as_bytes())))
    });
    let svc = middleware::client::TraceLayer::new("todo.api", tracer).layer(upstream);
    BoxCloneSyncService::new(svc)
}

async fn state(tracer: Arc<BoxedTracer>, body: &'static str) -> AppState {
    AppState {
        client: mock_client(tracer.clone(), body),
        base_url: "http://upstream.test".to_string(),
        #[cfg(feature = "db")]
        repo: seeded_repo(3).await,
        tracer,
    }
}

#[cfg(feature = "db")]
async fn seeded_repo(rows: usize) -> traceflow::repo::TodoRepository {
    use sqlx::sqlite::SqlitePoolOptions;
    use traceflow::repo;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    repo::init_schema(&pool).await.unwrap();
    for i in 0..rows {
        sqlx::query("INSERT INTO todo (title) VALUES (?)")
            .bind(format!("todo {i}"))
            .execute(&pool)
            .await
            .unwrap();
    }
    repo::TodoRepository::new(pool)
}

async fn get_test(app: axum::Router) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::get("/test").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[cfg(not(feature = "db"))]
#[tokio::test(start_paused = true)]
async fn returns_the_upstream_body() {
    let (_exporter, _provider, tracer) = test_tracer();
    let app = router(state(tracer, "hello").await);

    let (status, body) = get_test(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
}

#[cfg(feature = "db")]
#[tokio::test(start_paused = true)]
async fn returns_row_count_and_upstream_body() {
    let (_exporter, _provider, tracer) = test_tracer();
    let app = router(state(tracer, "hello").await);

    let (status, body) = get_test(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "3 hello");
}

#[tokio::test(start_paused = true)]
async fn records_request_delay_and_outbound_spans() {
    let (exporter, provider, tracer) = test_tracer();
    let app = router(state(tracer, "hello").await);

    get_test(app).await;

    provider.force_flush();
    let spans = exporter.get_finished_spans().unwrap();
    let request = spans.iter().find(|s| s.name == "request").unwrap();
    let delay = spans.iter().find(|s| s.name == "delay").unwrap();
    let outbound = spans.iter().find(|s| s.name == "todo.api").unwrap();
    // Both steps are children of the inbound request span.
    assert_eq!(delay.parent_span_id, request.span_context.span_id());
    assert_eq!(outbound.parent_span_id, request.span_context.span_id());
    assert!(outbound
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "outcome" && kv.value.as_str() == "SUCCESS"));
    // The log step tags the ambient request span.
    assert!(request
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "test_key"));
}

#[tokio::test(start_paused = true)]
async fn waits_out_the_delay_without_blocking_other_requests() {
    let (_exporter, _provider, tracer) = test_tracer();
    let app = router(state(tracer, "hello").await);

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(get_test(app.clone()), get_test(app));
    let elapsed = started.elapsed();

    assert_eq!(a.1, b.1);
    // Each request waits at least the simulated-delay duration...
    assert!(elapsed >= Duration::from_secs(1));
    // ...but two concurrent requests wait it out together, not back to back.
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn upstream_transport_failure_maps_to_an_error_response() {
    let (exporter, provider, tracer) = test_tracer();
    let failing = service_fn(|_req: Request<Bytes>| async {
        Err::<Response<Bytes>, BoxError>("connection refused".into())
    });
    let client = BoxCloneSyncService::new(
        middleware::client::TraceLayer::new("todo.api", tracer.clone()).layer(failing),
    );
    let app = router(AppState {
        client,
        base_url: "http://upstream.test".to_string(),
        #[cfg(feature = "db")]
        repo: seeded_repo(3).await,
        tracer,
    });

    let (status, _body) = get_test(app).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The failed call still produced a closed, error-tagged span.
    provider.force_flush();
    let spans = exporter.get_finished_spans().unwrap();
    let outbound = spans.iter().find(|s| s.name == "todo.api").unwrap();
    assert!(matches!(
        outbound.status,
        opentelemetry::trace::Status::Error { .. }
    ));
}
