use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid timestamp {raw:?}: {source}")]
pub struct TimestampError {
    pub raw: String,
    #[source]
    pub source: chrono::ParseError,
}

/// An RFC 3339 timestamp that remembers the exact string it was parsed from.
///
/// Comparisons use the instant only; the raw text is kept so a cursor
/// can be written back byte-for-byte as the API reported it.
#[derive(Debug, Clone)]
pub struct UpdatedAt {
    at: DateTime<Utc>,
    raw: String,
}

impl UpdatedAt {
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        let at = DateTime::parse_from_rfc3339(raw.trim()).map_err(|source| TimestampError {
            raw: raw.to_string(),
            source,
        })?;
        Ok(Self {
            at: at.with_timezone(&Utc),
            raw: raw.to_string(),
        })
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<DateTime<Utc>> for UpdatedAt {
    fn from(at: DateTime<Utc>) -> Self {
        Self {
            at,
            raw: at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

impl PartialEq for UpdatedAt {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for UpdatedAt {}

impl PartialOrd for UpdatedAt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdatedAt {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at)
    }
}

impl fmt::Display for UpdatedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A help center article as reported by one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub updated_at: UpdatedAt,
}

impl Article {
    /// Ordering key: timestamp first, id breaks ties.
    pub fn key(&self) -> (DateTime<Utc>, i64) {
        (self.updated_at.instant(), self.id)
    }
}

/// The newest article already delivered. Both fields are `None` before the
/// first successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub last_article_id: Option<i64>,
    pub last_updated_at: Option<UpdatedAt>,
}

impl Cursor {
    pub fn new(article_id: i64, updated_at: UpdatedAt) -> Self {
        Self {
            last_article_id: Some(article_id),
            last_updated_at: Some(updated_at),
        }
    }

    pub fn at(article: &Article) -> Self {
        Self::new(article.id, article.updated_at.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.last_updated_at.is_none()
    }

    /// Position comparable with [`Article::key`]. A stored timestamp without
    /// an id sorts before every article sharing that timestamp.
    pub fn position(&self) -> Option<(DateTime<Utc>, i64)> {
        self.last_updated_at
            .as_ref()
            .map(|ts| (ts.instant(), self.last_article_id.unwrap_or(0)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.last_article_id, &self.last_updated_at) {
            (_, None) => f.write_str("<empty>"),
            (Some(id), Some(ts)) => write!(f, "article {} at {}", id, ts),
            (None, Some(ts)) => write!(f, "<no id> at {}", ts),
        }
    }
}

pub fn compare(a: &Article, b: &Article) -> Ordering {
    a.key().cmp(&b.key())
}

/// Sort newest-first. Stable, so duplicate keys keep their fetch order.
pub fn sort_descending(articles: &mut [Article]) {
    articles.sort_by(|a, b| compare(b, a));
}

/// Strictly newer than the cursor. Always false for an empty cursor; cold
/// start goes through the time window instead.
pub fn is_newer_than(article: &Article, cursor: &Cursor) -> bool {
    match cursor.position() {
        Some(pos) => article.key() > pos,
        None => false,
    }
}

pub fn newest(articles: &[Article]) -> Option<&Article> {
    articles.iter().max_by(|a, b| compare(a, b))
}
