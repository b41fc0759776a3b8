use sqlx::SqlitePool;

/// A row of the `todo` table. The endpoint only ever consumes the row count,
/// the fields exist so the table has a realistic shape.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Todo {
    pub id: i64,
    pub title: String,
}

/// Read access to the `todo` table.
#[derive(Clone)]
pub struct TodoRepository {
    pool: SqlitePool,
}

impl TodoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TodoRepository { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<Todo>, sqlx::Error> {
        sqlx::query_as::<_, Todo>("SELECT id, title FROM todo ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }
}

/// Creates the `todo` table. The demo runs against an in-memory database, so
/// the schema is applied at startup rather than through migrations.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS todo (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)")
        .execute(pool)
        .await?;
    Ok(())
}
