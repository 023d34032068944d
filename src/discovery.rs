use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::helpcenter::{FetchError, Fetcher};
use crate::model::{self, Article, Cursor};
use crate::publisher::Publisher;
use crate::shutdown::Shutdown;
use crate::state::{CursorStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// No cursor yet: everything updated inside the window counts as new.
    ColdStart,
    Cursor,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to load cursor: {0}")]
    StoreRead(#[source] StoreError),
    #[error("failed to publish article {article_id} after {published} successful publishes: {source:#}")]
    Publish {
        article_id: i64,
        published: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("article {article_id} was published but the cursor could not be saved: {source}")]
    StoreWrite {
        article_id: i64,
        published: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: DiscoveryMode,
    pub fetched: usize,
    pub discovered: usize,
    /// Ids in the order they were published.
    pub published: Vec<i64>,
    /// Stopped early because shutdown was requested.
    pub interrupted: bool,
}

/// Pick the articles that still need publishing, newest first.
pub fn select_new_articles(
    articles: Vec<Article>,
    cursor: &Cursor,
    now: DateTime<Utc>,
    recent_window: Duration,
) -> (DiscoveryMode, Vec<Article>) {
    let (mode, mut fresh): (_, Vec<Article>) = if cursor.is_empty() {
        let cutoff = now
            .checked_sub_signed(recent_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = articles
            .into_iter()
            .filter(|a| a.updated_at.instant() >= cutoff)
            .collect();
        (DiscoveryMode::ColdStart, recent)
    } else {
        let newer = articles
            .into_iter()
            .filter(|a| model::is_newer_than(a, cursor))
            .collect();
        (DiscoveryMode::Cursor, newer)
    };
    model::sort_descending(&mut fresh);
    (mode, fresh)
}

pub struct DiscoveryEngine {
    fetcher: Fetcher,
    store: Arc<dyn CursorStore>,
    publisher: Arc<dyn Publisher>,
    recent_window: Duration,
    shutdown: Arc<Shutdown>,
    cycle_lock: Mutex<()>,
}

impl DiscoveryEngine {
    pub fn new(
        fetcher: Fetcher,
        store: Arc<dyn CursorStore>,
        publisher: Arc<dyn Publisher>,
        recent_window: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            publisher,
            recent_window,
            shutdown: Arc::new(Shutdown::default()),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn load_cursor(&self) -> Result<Cursor, StoreError> {
        self.store.load().await
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One fetch-diff-publish-persist round. Articles go out oldest first and
    /// the cursor is saved after each one, so a failure leaves the cursor on
    /// the last article that was actually delivered.
    #[instrument(skip_all)]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let _cycle = self.cycle_lock.lock().await;

        let articles = self.fetcher.fetch_all().await?;
        let fetched = articles.len();
        let cursor = self.store.load().await.map_err(CycleError::StoreRead)?;
        info!(fetched, cursor = %cursor, "starting discovery");

        let (mode, fresh) = select_new_articles(articles, &cursor, now, self.recent_window);
        if mode == DiscoveryMode::ColdStart {
            info!(
                window_minutes = self.recent_window.num_minutes(),
                found = fresh.len(),
                "no stored cursor; using recent window"
            );
        }

        let mut report = CycleReport {
            mode,
            fetched,
            discovered: fresh.len(),
            published: Vec::new(),
            interrupted: false,
        };
        if fresh.is_empty() {
            info!("no new articles");
            return Ok(report);
        }
        info!(count = fresh.len(), "new articles found");

        for article in fresh.iter().rev() {
            if self.shutdown.is_requested() {
                warn!(
                    remaining = fresh.len() - report.published.len(),
                    "shutdown requested; leaving remaining articles for the next run"
                );
                report.interrupted = true;
                break;
            }
            self.deliver(article, report.published.len()).await?;
            report.published.push(article.id);
        }

        Ok(report)
    }

    /// Publish the single newest article regardless of the cursor. The
    /// cursor only moves forward.
    #[instrument(skip_all)]
    pub async fn publish_latest(&self) -> Result<Option<Article>, CycleError> {
        let _cycle = self.cycle_lock.lock().await;

        let articles = self.fetcher.fetch_all().await?;
        let Some(latest) = model::newest(&articles).cloned() else {
            info!("no articles available");
            return Ok(None);
        };
        let cursor = self.store.load().await.map_err(CycleError::StoreRead)?;

        self.publisher
            .publish(&latest.title, &latest.url)
            .await
            .map_err(|source| CycleError::Publish {
                article_id: latest.id,
                published: 0,
                source,
            })?;

        if cursor.is_empty() || model::is_newer_than(&latest, &cursor) {
            self.save_cursor(&latest, 0).await?;
        } else {
            debug!(article_id = latest.id, cursor = %cursor, "cursor already at or past latest article");
        }
        Ok(Some(latest))
    }

    async fn deliver(&self, article: &Article, published: usize) -> Result<(), CycleError> {
        self.publisher
            .publish(&article.title, &article.url)
            .await
            .map_err(|source| CycleError::Publish {
                article_id: article.id,
                published,
                source,
            })?;
        self.save_cursor(article, published).await?;
        info!(article_id = article.id, updated_at = %article.updated_at, "article delivered");
        Ok(())
    }

    async fn save_cursor(&self, article: &Article, published: usize) -> Result<(), CycleError> {
        self.store
            .save(article.id, &article.updated_at)
            .await
            .map_err(|source| CycleError::StoreWrite {
                article_id: article.id,
                published,
                source,
            })
    }
}
