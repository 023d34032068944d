use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::model::{Cursor, UpdatedAt};
use crate::state::{CursorStore, LastSeenRecord, StoreError};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // The cursor must survive power loss once save() returns.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create the parent
/// directory. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| StoreError::Sqlx(sqlx::Error::Migrate(Box::new(err))))
}

/// Cursor kept as the single row of the `cursor` table.
#[derive(Debug, Clone)]
pub struct SqliteCursorStore {
    pool: Pool,
}

impl SqliteCursorStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    #[instrument(skip_all)]
    async fn load(&self) -> Result<Cursor, StoreError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT article_id, updated_at FROM cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((article_id, updated_at)) => LastSeenRecord {
                article_id: Some(article_id),
                updated_at: Some(updated_at),
            }
            .into_cursor(),
            None => Ok(Cursor::default()),
        }
    }

    #[instrument(skip_all)]
    async fn save(&self, article_id: i64, updated_at: &UpdatedAt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cursor (id, article_id, updated_at, saved_at) \
             VALUES (1, ?, ?, CURRENT_TIMESTAMP) \
             ON CONFLICT(id) DO UPDATE SET \
               article_id = excluded.article_id, \
               updated_at = excluded.updated_at, \
               saved_at = excluded.saved_at",
        )
        .bind(article_id)
        .bind(updated_at.as_str())
        .execute(&self.pool)
        .await?;
        debug!(article_id, updated_at = %updated_at, "cursor saved");
        Ok(())
    }
}
