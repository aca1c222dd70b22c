//! The extraction service: polite fetch, retry, and article mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::ExtractionConfig;
use crate::extract::limiter::DomainLimiter;
use crate::extract::readability::{
    extract_content, extract_fallback, ExtractedContent, MIN_TEXT_LEN,
};
use crate::extract::robots::RobotsCache;
use crate::model::{Article, ExtractionAttempt, ExtractionStatus};

/// Hard cap on a page body; bigger responses abort the read.
const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024;

/// Connect timeout, independent of the configured read timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Errors
// ============================================================================

/// Failure taxonomy for a page fetch. `is_retryable` is the single source
/// of truth for what the retry loop may attempt again.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Blocked by robots.txt")]
    RobotsBlocked,
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Response too large (exceeds {MAX_PAGE_SIZE} bytes)")]
    TooLarge,
    #[error("Invalid article URL")]
    InvalidUrl,
    #[error("Extracted text below minimum length")]
    InsufficientContent,
}

impl ExtractError {
    /// Transient failures retry; permanent ones never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::Timeout | ExtractError::Network(_) => true,
            ExtractError::HttpStatus(status) => *status >= 500,
            // Parse insufficiency is treated as transient: partial renders
            // and flaky CDNs produce thin pages that succeed on retry.
            ExtractError::InsufficientContent => true,
            ExtractError::RobotsBlocked
            | ExtractError::UnsupportedContentType(_)
            | ExtractError::TooLarge
            | ExtractError::InvalidUrl => false,
        }
    }
}

// ============================================================================
// Run statistics
// ============================================================================

/// Per-run counters, shared across concurrent extraction tasks.
#[derive(Debug, Default)]
pub struct RunStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    robots_skipped: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub robots_skipped: u64,
    pub retries: u64,
}

impl RunStats {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            robots_skipped: self.robots_skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Extractor
// ============================================================================

struct PageFetch {
    content: ExtractedContent,
    http_status: u16,
}

/// Fetches article pages and fills in full content, under a global
/// concurrency bound, per-domain rate limits, and robots.txt compliance.
pub struct Extractor {
    client: reqwest::Client,
    cfg: ExtractionConfig,
    semaphore: Arc<Semaphore>,
    limiter: DomainLimiter,
    robots: RobotsCache,
    stats: RunStats,
}

impl Extractor {
    pub fn new(cfg: ExtractionConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrent.max(1))),
            limiter: DomainLimiter::new(cfg.per_domain_rate_limit),
            robots: RobotsCache::new(
                client.clone(),
                cfg.user_agent.clone(),
                Duration::from_secs(cfg.robots_ttl_hours * 3600),
            ),
            client,
            cfg,
            stats: RunStats::default(),
        })
    }

    /// The HTTP client, shared with collaborators that fetch under the same
    /// identity (image pipeline, og:image lookup).
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Counters for the current run.
    pub fn stats(&self) -> RunSummary {
        self.stats.summary()
    }

    /// Fetch and extract full content for an article, mutating it in place.
    ///
    /// Returns the append-only attempt log for the sink. Re-invoking on an
    /// already-successful article is a no-op unless `force` is set.
    /// Robots-blocked URLs are never fetched and never retried.
    pub async fn extract_article(&self, article: &mut Article, force: bool) -> Vec<ExtractionAttempt> {
        if article.extraction_status == ExtractionStatus::Success && !force {
            tracing::debug!(article = %article.id, "Already extracted, skipping");
            return Vec::new();
        }

        let mut attempts = Vec::new();
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let url = match Url::parse(&article.canonical_url) {
            Ok(u) => u,
            Err(_) => {
                article.extraction_status = ExtractionStatus::Failed;
                article.extraction_error = Some(ExtractError::InvalidUrl.to_string());
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return attempts;
            }
        };
        let domain = url.host_str().unwrap_or_default().to_string();

        if !self.robots.is_allowed(&url).await {
            tracing::info!(article = %article.id, domain = %domain, "Blocked by robots.txt");
            article.extraction_status = ExtractionStatus::RobotsBlocked;
            article.extraction_error = Some(ExtractError::RobotsBlocked.to_string());
            self.stats.robots_skipped.fetch_add(1, Ordering::Relaxed);
            attempts.push(ExtractionAttempt {
                article_id: article.id,
                attempted_at: Utc::now(),
                success: false,
                failure_reason: Some(ExtractError::RobotsBlocked.to_string()),
                latency_ms: 0,
                http_status: None,
            });
            return attempts;
        }

        for attempt in 0..=self.cfg.max_retries {
            let started = Instant::now();
            let outcome = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .expect("semaphore never closed");
                self.limiter.acquire(&domain).await;
                self.fetch_page(&url).await
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(page) => {
                    attempts.push(ExtractionAttempt {
                        article_id: article.id,
                        attempted_at: Utc::now(),
                        success: true,
                        failure_reason: None,
                        latency_ms,
                        http_status: Some(page.http_status),
                    });
                    apply_content(article, page.content);
                    self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    return attempts;
                }
                Err(e) => {
                    let http_status = match &e {
                        ExtractError::HttpStatus(s) => Some(*s),
                        _ => None,
                    };
                    attempts.push(ExtractionAttempt {
                        article_id: article.id,
                        attempted_at: Utc::now(),
                        success: false,
                        failure_reason: Some(e.to_string()),
                        latency_ms,
                        http_status,
                    });

                    if !e.is_retryable() || attempt == self.cfg.max_retries {
                        tracing::warn!(
                            article = %article.id,
                            url = %url,
                            error = %e,
                            attempts = attempt + 1,
                            "Extraction failed"
                        );
                        article.extraction_status = ExtractionStatus::Failed;
                        article.extraction_error = Some(e.to_string());
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                        return attempts;
                    }

                    let delay = Duration::from_millis(
                        self.cfg.backoff_base_ms.saturating_mul(1 << attempt),
                    );
                    tracing::debug!(
                        article = %article.id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("loop always returns on final attempt");
    }

    async fn fetch_page(&self, url: &Url) -> Result<PageFetch, ExtractError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus(status.as_u16()));
        }

        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let essence = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();
            let supported = matches!(
                essence.as_str(),
                "text/html" | "application/xhtml+xml" | "text/plain" | ""
            );
            if !supported {
                return Err(ExtractError::UnsupportedContentType(essence));
            }
        }

        let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
        let html = String::from_utf8_lossy(&bytes);

        let content = match extract_content(&html) {
            Some(c) => c,
            None => {
                let fallback = extract_fallback(&html);
                if fallback.text.len() < MIN_TEXT_LEN {
                    return Err(ExtractError::InsufficientContent);
                }
                fallback
            }
        };

        Ok(PageFetch {
            content,
            http_status: status.as_u16(),
        })
    }
}

fn map_reqwest(e: reqwest::Error) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout
    } else {
        ExtractError::Network(e)
    }
}

/// Stamp extracted content onto the article record.
fn apply_content(article: &mut Article, content: ExtractedContent) {
    article.full_text = Some(content.text);
    article.full_html = Some(content.html);
    article.language = content.language;
    if !content.authors.is_empty() {
        article.authors = content.authors;
    }
    for keyword in content.keywords {
        if !article.topics.contains(&keyword) {
            article.topics.push(keyword);
        }
    }
    article.extraction_status = ExtractionStatus::Success;
    article.extraction_error = None;
    article.extracted_at = Some(Utc::now());
    tracing::debug!(
        article = %article.id,
        method = content.method.as_str(),
        "Extraction succeeded"
    );
}

/// Stream the body with a hard size cap, as the feed fetcher does for XML.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ExtractError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ExtractError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ExtractError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
