//! Polite, rate-limited full-content extraction.
//!
//! One global concurrency bound (semaphore) plus an independent per-domain
//! rate limiter keeps a slow or blocked publisher from starving the rest.
//! robots.txt is checked (and cached with a TTL) before any page GET.
//! Transient failures retry with exponential backoff; permanent ones do not.

mod limiter;
mod readability;
mod robots;
mod service;

pub use limiter::DomainLimiter;
pub use readability::{extract_content, extract_fallback, ExtractedContent, ExtractionMethod};
pub use robots::{RobotsCache, RobotsTxt};
pub use service::{ExtractError, Extractor, RunStats, RunSummary};
