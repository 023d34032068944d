use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::model::{Cursor, UpdatedAt};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored cursor is corrupt: {0}")]
    Corrupt(String),
}

/// Durable home of the single global cursor. `save` must replace the record
/// atomically: a concurrent `load` sees either the old or the new value.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<Cursor, StoreError>;
    async fn save(&self, article_id: i64, updated_at: &UpdatedAt) -> Result<(), StoreError>;
}

/// On-disk shape, shared by every backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSeenRecord {
    pub article_id: Option<i64>,
    pub updated_at: Option<String>,
}

impl LastSeenRecord {
    pub fn into_cursor(self) -> Result<Cursor, StoreError> {
        let last_updated_at = self
            .updated_at
            .as_deref()
            .map(UpdatedAt::parse)
            .transpose()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(Cursor {
            last_article_id: self.article_id,
            last_updated_at,
        })
    }
}

/// Cursor kept in a small JSON file, replaced via write-temp-then-rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join("last_seen.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("last_seen.json"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CursorStore for JsonFileStore {
    #[instrument(skip_all)]
    async fn load(&self) -> Result<Cursor, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Cursor::default()),
            Err(err) => return Err(err.into()),
        };
        let record: LastSeenRecord = serde_json::from_slice(&bytes)?;
        record.into_cursor()
    }

    #[instrument(skip_all)]
    async fn save(&self, article_id: i64, updated_at: &UpdatedAt) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let record = LastSeenRecord {
            article_id: Some(article_id),
            updated_at: Some(updated_at.as_str().to_string()),
        };
        let body = serde_json::to_vec_pretty(&record)?;

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &self.path).await?;

        debug!(article_id, updated_at = %updated_at, path = %self.path.display(), "cursor saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_timestamp_is_empty_cursor() {
        let cursor = LastSeenRecord::default().into_cursor().unwrap();
        assert!(cursor.is_empty());
    }

    #[test]
    fn record_with_bad_timestamp_is_corrupt() {
        let record = LastSeenRecord {
            article_id: Some(1),
            updated_at: Some("garbage".into()),
        };
        assert!(matches!(record.into_cursor(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn temp_path_sits_next_to_target() {
        let store = JsonFileStore::new("/var/lib/bot/last_seen.json");
        assert_eq!(
            store.temp_path(),
            PathBuf::from("/var/lib/bot/last_seen.json.tmp")
        );
    }
}
