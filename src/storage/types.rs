use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Article, ExtractionAttempt, ExtractionStatus, Recommendation, ReviewStatus, SpamReport,
    Story, TopImage,
};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the database locked
    #[error("The database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored JSON column failed to (de)serialize
    #[error("Stored record is malformed: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Timestamp helpers
// ============================================================================

pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

pub(crate) fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_ts)
}

// ============================================================================
// Row types
// ============================================================================

/// Internal row type for article queries; JSON columns are expanded in
/// `into_article`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub id: String,
    pub entry_id: String,
    pub canonical_url: String,
    pub title: String,
    pub source_name: String,
    pub full_text: Option<String>,
    pub full_html: Option<String>,
    pub content_hash: String,
    pub simhash: i64,
    pub language: Option<String>,
    pub authors: String,
    pub extraction_status: String,
    pub extraction_error: Option<String>,
    pub top_image: Option<String>,
    pub score_total: i64,
    pub subscores: String,
    pub topics: String,
    pub entities: String,
    pub flags: String,
    pub spam_probability: f64,
    pub content_quality_score: f64,
    pub story_id: Option<String>,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub extracted_at: Option<i64>,
    pub scored_at: Option<i64>,
}

impl ArticleRow {
    pub(crate) fn into_article(self) -> Result<Article, DatabaseError> {
        let top_image: Option<TopImage> = match self.top_image {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Article {
            id: parse_uuid(&self.id),
            entry_id: self.entry_id,
            canonical_url: self.canonical_url,
            title: self.title,
            source_name: self.source_name,
            full_text: self.full_text,
            full_html: self.full_html,
            content_hash: self.content_hash,
            simhash: self.simhash as u64,
            language: self.language,
            authors: serde_json::from_str(&self.authors)?,
            extraction_status: parse_extraction_status(&self.extraction_status),
            extraction_error: self.extraction_error,
            top_image,
            score_total: self.score_total,
            subscores: serde_json::from_str(&self.subscores)?,
            topics: serde_json::from_str(&self.topics)?,
            entities: serde_json::from_str(&self.entities)?,
            flags: serde_json::from_str(&self.flags)?,
            spam_probability: self.spam_probability,
            content_quality_score: self.content_quality_score,
            story_id: self.story_id.as_deref().map(parse_uuid),
            published_at: self.published_at.map(from_ts),
            created_at: from_ts(self.created_at),
            extracted_at: self.extracted_at.map(from_ts),
            scored_at: self.scored_at.map(from_ts),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoryRow {
    pub id: String,
    pub canonical_title: String,
    pub best_image: Option<String>,
    pub members: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub confidence: f64,
    pub article_count: i64,
}

impl StoryRow {
    pub(crate) fn into_story(self) -> Result<Story, DatabaseError> {
        let best_image: Option<TopImage> = match self.best_image {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Story {
            id: parse_uuid(&self.id),
            canonical_title: self.canonical_title,
            best_image,
            members: serde_json::from_str(&self.members)?,
            first_seen: from_ts(self.first_seen),
            last_seen: from_ts(self.last_seen),
            confidence: self.confidence,
            article_count: self.article_count as u32,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttemptRow {
    pub article_id: String,
    pub attempted_at: i64,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub latency_ms: i64,
    pub http_status: Option<i64>,
}

impl AttemptRow {
    pub(crate) fn into_attempt(self) -> ExtractionAttempt {
        ExtractionAttempt {
            article_id: parse_uuid(&self.article_id),
            attempted_at: from_ts(self.attempted_at),
            success: self.success,
            failure_reason: self.failure_reason,
            latency_ms: self.latency_ms.max(0) as u64,
            http_status: self.http_status.map(|s| s as u16),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SpamReportRow {
    pub article_id: String,
    pub spam_probability: f64,
    pub signals: String,
    pub recommendation: String,
    pub review_status: String,
    pub created_at: i64,
}

impl SpamReportRow {
    pub(crate) fn into_report(self) -> Result<SpamReport, DatabaseError> {
        Ok(SpamReport {
            article_id: parse_uuid(&self.article_id),
            spam_probability: self.spam_probability,
            signals: serde_json::from_str(&self.signals)?,
            recommendation: parse_recommendation(&self.recommendation),
            review_status: parse_review_status(&self.review_status),
            created_at: from_ts(self.created_at),
        })
    }
}

// ============================================================================
// Enum round-trips
// ============================================================================

/// A malformed id yields the nil UUID rather than failing the whole query.
fn parse_uuid(raw: &str) -> Uuid {
    Uuid::parse_str(raw).unwrap_or_else(|_| {
        tracing::warn!(raw = %raw, "Malformed UUID in database");
        Uuid::nil()
    })
}

pub(crate) fn parse_extraction_status(raw: &str) -> ExtractionStatus {
    match raw {
        "success" => ExtractionStatus::Success,
        "failed" => ExtractionStatus::Failed,
        "robots_blocked" => ExtractionStatus::RobotsBlocked,
        _ => ExtractionStatus::Pending,
    }
}

pub(crate) fn parse_recommendation(raw: &str) -> Recommendation {
    match raw {
        "reject" => Recommendation::Reject,
        "review" => Recommendation::Review,
        _ => Recommendation::Accept,
    }
}

pub(crate) fn parse_review_status(raw: &str) -> ReviewStatus {
    match raw {
        "confirmed" => ReviewStatus::Confirmed,
        "false_positive" => ReviewStatus::FalsePositive,
        _ => ReviewStatus::Pending,
    }
}

pub(crate) fn review_status_str(status: ReviewStatus) -> &'static str {
    match status {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Confirmed => "confirmed",
        ReviewStatus::FalsePositive => "false_positive",
    }
}
