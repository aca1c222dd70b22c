//! Core pipeline records: feed items in, enriched articles out.
//!
//! `FeedItem` is the immutable input produced by the ingestion adapter.
//! `Article` is created on first sight of an item and mutated in place by
//! each pipeline stage. `Story` clusters articles that report the same
//! real-world event. The remaining types are diagnostic/audit records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Input
// ============================================================================

/// Where a media candidate was declared in the feed entry.
///
/// Ordering matters: enclosures outrank media:content, which outranks
/// media:thumbnail when picking the primary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    Enclosure,
    MediaContent,
    MediaThumbnail,
}

/// An image (or other media) URL advertised by the feed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCandidate {
    pub url: String,
    pub kind: MediaKind,
    pub content_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaCandidate {
    /// Build a candidate, coercing untrusted dimension fields.
    ///
    /// Upstream feeds sometimes carry width/height as strings ("600"),
    /// floats, or garbage. Anything that does not parse as a positive
    /// integer becomes `None` rather than an error.
    pub fn new(
        url: impl Into<String>,
        kind: MediaKind,
        content_type: Option<String>,
        width: Option<&str>,
        height: Option<&str>,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            content_type,
            width: width.and_then(coerce_dimension),
            height: height.and_then(coerce_dimension),
        }
    }

    /// Estimated pixel area used for tie-breaking within a priority tier.
    ///
    /// When only one dimension is known we assume 4:3; when neither is
    /// known a neutral default keeps the candidate viable without letting
    /// it beat a fully-specified one.
    pub fn estimated_area(&self) -> u64 {
        estimated_area(self.width, self.height)
    }
}

/// See [`MediaCandidate::estimated_area`]; also used for inline `<img>` tags.
pub fn estimated_area(width: Option<u32>, height: Option<u32>) -> u64 {
    match (width, height) {
        (Some(w), Some(h)) => w as u64 * h as u64,
        (Some(w), None) => w as u64 * (w as u64 * 3 / 4),
        (None, Some(h)) => (h as u64 * 4 / 3) * h as u64,
        (None, None) => DEFAULT_AREA,
    }
}

/// Area assumed for a candidate with no declared dimensions.
pub const DEFAULT_AREA: u64 = 10_000;

/// Coerce a stringly-typed numeric field into a positive pixel dimension.
pub fn coerce_dimension(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    // Some feeds emit "600.0"
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() && f >= 1.0 && f <= u32::MAX as f64 {
            return Some(f as u32);
        }
    }
    None
}

/// A raw syndicated entry after the typed ingestion boundary.
///
/// Produced once by the ingestion adapter and consumed once by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable external id (feed guid, or a synthesized hash).
    pub entry_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    /// Raw content or summary snippet from the feed, may contain HTML.
    pub content_snippet: String,
    pub media: Vec<MediaCandidate>,
}

// ============================================================================
// Article
// ============================================================================

/// Lifecycle of the full-content fetch for an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Success,
    Failed,
    RobotsBlocked,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RobotsBlocked => "robots_blocked",
        }
    }
}

/// The representative image chosen for an article, post-cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopImage {
    /// Proxy path inside the image cache (not the origin URL).
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Compact low-resolution preview (blurhash string).
    pub placeholder: String,
}

/// The core output record, mutated in place by each pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub entry_id: String,
    pub canonical_url: String,
    pub title: String,
    pub source_name: String,
    pub full_text: Option<String>,
    pub full_html: Option<String>,
    pub content_hash: String,
    pub simhash: u64,
    pub language: Option<String>,
    pub authors: Vec<String>,
    pub extraction_status: ExtractionStatus,
    pub extraction_error: Option<String>,
    pub top_image: Option<TopImage>,
    pub score_total: i64,
    pub subscores: BTreeMap<String, f64>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub flags: Vec<String>,
    pub spam_probability: f64,
    pub content_quality_score: f64,
    pub story_id: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub scored_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Create a fresh pending article from an ingested item.
    ///
    /// `canonical_url`, `content_hash` and `simhash` are stamped by the
    /// canonicalizer before the article enters the pipeline proper.
    pub fn from_item(item: &FeedItem, canonical_url: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id: item.entry_id.clone(),
            canonical_url,
            title: item.title.clone(),
            source_name: item.source_name.clone(),
            full_text: None,
            full_html: None,
            content_hash: String::new(),
            simhash: 0,
            language: None,
            authors: Vec::new(),
            extraction_status: ExtractionStatus::Pending,
            extraction_error: None,
            top_image: None,
            score_total: 0,
            subscores: BTreeMap::new(),
            topics: Vec::new(),
            entities: Vec::new(),
            flags: Vec::new(),
            spam_probability: 0.0,
            content_quality_score: 1.0,
            story_id: None,
            published_at: item.published_at,
            created_at: now,
            extracted_at: None,
            scored_at: None,
        }
    }

    /// Text used for near-duplicate signatures: title plus lead paragraph.
    pub fn signature_text(&self) -> String {
        let lead = self
            .full_text
            .as_deref()
            .and_then(|t| t.split("\n\n").next())
            .unwrap_or("");
        format!("{} {}", self.title, lead)
    }
}

// ============================================================================
// Story
// ============================================================================

/// One article's membership in a story cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryMember {
    pub article_id: Uuid,
    pub source_name: String,
}

/// A cluster of articles judged to report the same real-world event.
///
/// Invariant: `article_count == members.len()`, and every member article
/// carries this story's id in `story_id`. Merging adds membership; it never
/// rewrites identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    /// Title of the earliest member; never replaced by later arrivals.
    pub canonical_title: String,
    pub best_image: Option<TopImage>,
    pub members: Vec<StoryMember>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: f64,
    pub article_count: u32,
}

// ============================================================================
// Diagnostics & audit
// ============================================================================

/// One fetch attempt against an article URL. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub article_id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub latency_ms: u64,
    pub http_status: Option<u16>,
}

/// Reviewer disposition for a spam report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Confirmed,
    FalsePositive,
}

/// What the filter suggests doing with the article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Review,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Review => "review",
            Self::Reject => "reject",
        }
    }
}

/// One detector signal with its confidence and a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamSignal {
    pub signal_type: String,
    pub confidence: f64,
    pub reason: String,
}

/// Audit record for a spam verdict. The computed signals are immutable;
/// manual override only moves `review_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamReport {
    pub article_id: Uuid,
    pub spam_probability: f64,
    pub signals: Vec<SpamSignal>,
    pub recommendation: Recommendation,
    pub review_status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}
