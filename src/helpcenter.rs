//! Help center article listing: wire types, the HTTP page source and the
//! paginating fetcher with its retry policy.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::{Article, UpdatedAt};

pub const HELP_CENTER_API: &str =
    "https://support.discord.com/api/v2/help_center/en-us/articles.json";
pub const DEFAULT_PER_PAGE: u32 = 100;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// One page of the article listing as the API returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticlesPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
}

fn default_page_count() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub title: String,
    pub html_url: String,
    pub updated_at: String,
}

impl ArticleRecord {
    fn into_article(self) -> Result<Article, crate::model::TimestampError> {
        Ok(Article {
            id: self.id,
            title: self.title,
            url: self.html_url,
            updated_at: UpdatedAt::parse(&self.updated_at)?,
        })
    }
}

/// Result of a single request for a page. The fetcher's retry loop
/// dispatches on this tag.
#[derive(Debug)]
pub enum PageAttempt {
    Success(ArticlesPage),
    /// Server asked us to slow down; wait this long and ask again.
    RateLimited(Duration),
    /// Network fault, timeout or 5xx.
    Transient(String),
    /// Client-side fault; retrying will not help.
    Rejected(String),
    /// Response arrived but could not be decoded.
    Malformed(String),
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> PageAttempt;
}

#[derive(Clone)]
pub struct HelpCenterClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HelpCenterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelpCenterClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HelpCenterClient {
    pub fn new() -> Result<Self> {
        let base_url = Url::parse(HELP_CENTER_API).context("invalid default help center URL")?;
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("helpcenter-watchbot/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(&self, page: u32, per_page: u32) -> Result<reqwest::Request> {
        self.http
            .get(self.base_url.clone())
            .query(&[("page", page), ("per_page", per_page)])
            .header("Accept", "application/json")
            .build()
            .context("failed to build articles request")
    }
}

#[async_trait]
impl PageSource for HelpCenterClient {
    async fn fetch_page(&self, page: u32, per_page: u32) -> PageAttempt {
        let request = match self.build_request(page, per_page) {
            Ok(request) => request,
            Err(err) => return PageAttempt::Rejected(format!("{:#}", err)),
        };
        debug!(url = %request.url(), "requesting articles page");

        let res = match self.http.execute(request).await {
            Ok(res) => res,
            Err(err) if err.is_builder() => return PageAttempt::Rejected(err.to_string()),
            Err(err) => return PageAttempt::Transient(err.to_string()),
        };

        if let Some(attempt) = classify(res.status(), res.headers(), Utc::now()) {
            return match attempt {
                PageAttempt::Rejected(reason) => {
                    let body = res.text().await.unwrap_or_default();
                    PageAttempt::Rejected(format!("{}: {}", reason, body))
                }
                other => other,
            };
        }

        let body = match res.text().await {
            Ok(body) => body,
            Err(err) => return PageAttempt::Transient(format!("failed to read body: {}", err)),
        };
        decode_page(&body)
    }
}

pub fn decode_page(body: &str) -> PageAttempt {
    match serde_json::from_str::<ArticlesPage>(body) {
        Ok(payload) => PageAttempt::Success(payload),
        Err(err) => PageAttempt::Malformed(err.to_string()),
    }
}

/// Map a response status to its retry tag. `None` means the body should be
/// decoded.
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Option<PageAttempt> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(PageAttempt::RateLimited(retry_after(headers, now)));
    }
    if status.is_server_error() {
        return Some(PageAttempt::Transient(format!("server error {}", status)));
    }
    if !status.is_success() {
        return Some(PageAttempt::Rejected(format!("status {}", status)));
    }
    None
}

/// Interpret a `Retry-After` header: delta seconds (fractions allowed) or an
/// HTTP date. Anything unusable, including a zero wait, becomes one second.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
    let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) else {
        return DEFAULT_RETRY_AFTER;
    };
    let value = value.trim();
    let wait = if let Ok(secs) = value.parse::<f64>() {
        if secs < 0.0 {
            None
        } else {
            Duration::try_from_secs_f64(secs).ok()
        }
    } else {
        DateTime::parse_from_rfc2822(value)
            .ok()
            .and_then(|at| (at.with_timezone(&Utc) - now).to_std().ok())
    };
    match wait {
        Some(wait) if !wait.is_zero() => wait,
        _ => DEFAULT_RETRY_AFTER,
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch page {page} after {attempts} attempts: {reason}")]
    Failed {
        page: u32,
        attempts: u32,
        reason: String,
    },
    #[error("page {page} rejected: {reason}")]
    Rejected { page: u32, reason: String },
    #[error("malformed payload on page {page}: {reason}")]
    Malformed { page: u32, reason: String },
}

impl FetchError {
    pub fn page(&self) -> u32 {
        match self {
            FetchError::Failed { page, .. }
            | FetchError::Rejected { page, .. }
            | FetchError::Malformed { page, .. } => *page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per page for transient failures. Rate-limit waits are free.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Collects the whole article listing, one page at a time.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
    per_page: u32,
}

impl Fetcher {
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy, per_page: u32) -> Self {
        Self {
            source,
            policy,
            per_page,
        }
    }

    #[instrument(skip_all)]
    pub async fn fetch_all(&self) -> Result<Vec<Article>, FetchError> {
        let first = self.fetch_page(1).await?;
        let page_count = first.page_count.max(1);
        info!(
            count = first.count,
            page_count,
            next_page = ?first.next_page,
            articles = first.articles.len(),
            "page 1 read"
        );
        let mut articles = into_articles(1, first.articles)?;

        for page in 2..=page_count {
            let payload = self.fetch_page(page).await?;
            let received = payload.articles.len();
            articles.extend(into_articles(page, payload.articles)?);
            info!(page, next_page = ?payload.next_page, articles = received, "page read");
        }

        Ok(articles)
    }

    async fn fetch_page(&self, page: u32) -> Result<ArticlesPage, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        let mut backoff = self.policy.backoff_base;

        loop {
            let outcome = match tokio::time::timeout(
                self.policy.request_timeout,
                self.source.fetch_page(page, self.per_page),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => PageAttempt::Transient(format!(
                    "timed out after {:?}",
                    self.policy.request_timeout
                )),
            };

            match outcome {
                PageAttempt::Success(payload) => return Ok(payload),
                PageAttempt::RateLimited(wait) => {
                    warn!(page, wait_secs = wait.as_secs_f64(), "rate limited; waiting");
                    tokio::time::sleep(wait).await;
                }
                PageAttempt::Rejected(reason) => {
                    return Err(FetchError::Rejected { page, reason });
                }
                PageAttempt::Malformed(reason) => {
                    return Err(FetchError::Malformed { page, reason });
                }
                PageAttempt::Transient(reason) => {
                    if attempt >= max_attempts {
                        return Err(FetchError::Failed {
                            page,
                            attempts: attempt,
                            reason,
                        });
                    }
                    warn!(
                        page,
                        attempt,
                        max_attempts,
                        %reason,
                        retry_in_secs = backoff.as_secs_f64(),
                        "page fetch failed; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

fn into_articles(page: u32, records: Vec<ArticleRecord>) -> Result<Vec<Article>, FetchError> {
    records
        .into_iter()
        .map(|record| {
            let id = record.id;
            record
                .into_article()
                .map_err(|err| FetchError::Malformed {
                    page,
                    reason: format!("article {}: {}", id, err),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn build_request_sets_paging_query() {
        let client =
            HelpCenterClient::with_base_url(Url::parse("http://localhost:9/articles.json").unwrap())
                .unwrap();
        let request = client.build_request(3, 50).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/articles.json");
        assert_eq!(request.url().query(), Some("page=3&per_page=50"));
        assert_eq!(
            request
                .headers()
                .get("Accept")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn default_client_targets_help_center() {
        let client = HelpCenterClient::new().unwrap();
        let request = client.build_request(1, DEFAULT_PER_PAGE).unwrap();
        assert_eq!(request.url().host_str(), Some("support.discord.com"));
        assert_eq!(request.url().query(), Some("page=1&per_page=100"));
    }

    #[test]
    fn retry_after_parses_seconds() {
        let now = Utc::now();
        assert_eq!(retry_after(&headers_with("3"), now), Duration::from_secs(3));
        assert_eq!(
            retry_after(&headers_with("0.5"), now),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn retry_after_parses_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 50).unwrap();
        let wait = retry_after(&headers_with("Wed, 21 Oct 2015 07:28:00 GMT"), now);
        assert_eq!(wait, Duration::from_secs(10));

        let later = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        let wait = retry_after(&headers_with("Wed, 21 Oct 2015 07:28:00 GMT"), later);
        assert_eq!(wait, DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn retry_after_falls_back_to_one_second() {
        let now = Utc::now();
        assert_eq!(retry_after(&HeaderMap::new(), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("soon"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("-4"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("1e20"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("NaN"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("inf"), now), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn zero_retry_after_still_waits() {
        let now = Utc::now();
        assert_eq!(retry_after(&headers_with("0"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers_with("0.0"), now), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn classify_maps_statuses_to_retry_tags() {
        let now = Utc::now();
        let empty = HeaderMap::new();

        match classify(StatusCode::TOO_MANY_REQUESTS, &headers_with("7"), now) {
            Some(PageAttempt::RateLimited(wait)) => assert_eq!(wait, Duration::from_secs(7)),
            other => panic!("unexpected {:?}", other),
        }
        match classify(StatusCode::TOO_MANY_REQUESTS, &empty, now) {
            Some(PageAttempt::RateLimited(wait)) => assert_eq!(wait, DEFAULT_RETRY_AFTER),
            other => panic!("unexpected {:?}", other),
        }
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                classify(status, &empty, now),
                Some(PageAttempt::Transient(_))
            ));
        }
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            match classify(status, &empty, now) {
                Some(PageAttempt::Rejected(reason)) => {
                    assert!(reason.contains(status.as_str()))
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(classify(StatusCode::OK, &empty, now).is_none());
    }

    #[test]
    fn decode_page_applies_defaults() {
        match decode_page("{}") {
            PageAttempt::Success(page) => {
                assert_eq!(page.count, 0);
                assert_eq!(page.page_count, 1);
                assert!(page.next_page.is_none());
                assert!(page.articles.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_page_reads_articles() {
        let body = r#"{
            "count": 2,
            "page_count": 1,
            "next_page": null,
            "articles": [
                {"id": 10, "title": "A", "html_url": "https://h/10", "updated_at": "2024-01-01T00:00:00Z", "draft": false},
                {"id": 11, "title": "B", "html_url": "https://h/11", "updated_at": "2024-01-02T00:00:00Z"}
            ]
        }"#;
        let PageAttempt::Success(page) = decode_page(body) else {
            panic!("expected success");
        };
        let articles = into_articles(1, page.articles).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].url, "https://h/11");
        assert_eq!(articles[1].updated_at.as_str(), "2024-01-02T00:00:00Z");
    }

    #[test]
    fn decode_page_flags_missing_fields() {
        let body = r#"{"articles": [{"id": 10, "title": "A", "updated_at": "2024-01-01T00:00:00Z"}]}"#;
        match decode_page(body) {
            PageAttempt::Malformed(reason) => assert!(reason.contains("html_url")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let records = vec![ArticleRecord {
            id: 4,
            title: "t".into(),
            html_url: "u".into(),
            updated_at: "not a time".into(),
        }];
        let err = into_articles(2, records).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { page: 2, .. }));
        assert!(err.to_string().contains("article 4"));
    }
}
