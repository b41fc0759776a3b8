use std::{env, error::Error};

use opentelemetry::{global, trace::TraceError, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, runtime, Resource};
use tracing_core::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Sets up tracing and logging via otlp exporter.
/// The service name can be configured using the env var `SERVICE_NAME`,
/// otherwise the cargo name will be used. By default, everything is exported to `http://localhost:4317`.
/// This can be changed via env var `OTEL_EXPORTER_OTLP_ENDPOINT`.
///
/// This should generally be the first statement of any server binary's main
/// function.
pub fn setup() -> Result<(), Box<dyn Error>> {
    let service = env::var("SERVICE_NAME").unwrap_or(env!("CARGO_PKG_NAME").to_string());
    let service: &'static str = service.leak();
    let endpoint =
        env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or("http://localhost:4317".to_string());
    let endpoint: &'static str = endpoint.leak();

    init_tracer(service, endpoint)?;

    tracing::info!("starting server");
    Ok(())
}

fn init_tracer(service: &'static str, endpoint: &'static str) -> Result<(), TraceError> {
    // W3C traceparent/tracestate headers, matched by the http_injector.
    global::set_text_map_propagator(TraceContextPropagator::new());
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::config().with_resource(Resource::new(vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                service,
            )])),
        )
        .install_batch(runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    Ok(())
}

pub fn teardown() {
    global::shutdown_tracer_provider();
}
