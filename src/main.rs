use std::{error::Error, sync::Arc};

use opentelemetry::global;
use tokio::net::TcpListener;
use traceflow::app::{self, AppState, DEFAULT_BASE_URL};
use traceflow::setup;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup::setup()?;

    let tracer = Arc::new(global::tracer("traceflow"));
    let state = AppState {
        client: app::http_client(tracer.clone()),
        base_url: DEFAULT_BASE_URL.to_string(),
        #[cfg(feature = "db")]
        repo: seed_todos().await?,
        tracer,
    };

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app::router(state)).await?;

    setup::teardown();
    Ok(())
}

/// The demo has no external database; an in-memory sqlite instance seeded at
/// startup plays the part.
#[cfg(feature = "db")]
async fn seed_todos() -> Result<traceflow::repo::TodoRepository, Box<dyn Error>> {
    use sqlx::sqlite::SqlitePoolOptions;
    use traceflow::repo;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    repo::init_schema(&pool).await?;
    for title in ["buy milk", "write spec", "close spans"] {
        sqlx::query("INSERT INTO todo (title) VALUES (?)")
            .bind(title)
            .execute(&pool)
            .await?;
    }
    Ok(repo::TodoRepository::new(pool))
}
