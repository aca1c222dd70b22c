//! Spam and quality heuristics.
//!
//! Four signal families (promotional language, clickbait phrasing, thin
//! content, title/body coherence) each yield a confidence in [0, 1]. A
//! weighted combination produces `spam_probability`; the accept/review/
//! reject recommendation comes from the configured thresholds, never from
//! hardcoded cutoffs.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::config::SpamConfig;
use crate::model::{Recommendation, ReviewStatus, SpamReport, SpamSignal};

/// Filter output, fed to both the audit sink and the scoring penalty.
#[derive(Debug, Clone)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub spam_probability: f64,
    pub content_score: f64,
    pub title_content_coherence: f64,
    pub signals: Vec<SpamSignal>,
    pub recommendation: Recommendation,
}

impl SpamVerdict {
    /// Audit record for the sink. Computed signals are immutable; a human
    /// override later only moves `review_status`.
    pub fn report(&self, article_id: Uuid, now: DateTime<Utc>) -> SpamReport {
        SpamReport {
            article_id,
            spam_probability: self.spam_probability,
            signals: self.signals.clone(),
            recommendation: self.recommendation,
            review_status: ReviewStatus::Pending,
            created_at: now,
        }
    }
}

const SIGNAL_FAMILIES: &[&str] = &["promotional", "clickbait", "thin_content", "low_coherence"];

/// Word count at which content is considered fully substantial.
const SOLID_CONTENT_WORDS: usize = 200;

/// Coherence below this (for non-trivial bodies) raises a signal.
const COHERENCE_FLOOR: f64 = 0.2;

static PROMO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(sale|discount|click here|buy now|limited time( offer)?|free shipping|promo code|coupon|affiliate|sponsored|act now|order today)\b|\d+%\s*off",
    )
    .expect("promo regex")
});

static CLICKBAIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)you won'?t believe|this one (weird )?trick|\d+\s+(reasons|ways|things|secrets|tricks)\b|what happened next|will (shock|amaze) you|doctors hate|number \d+ will",
    )
    .expect("clickbait regex")
});

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "have", "will", "your", "about",
        "into", "over", "after", "their", "they", "been", "were", "what", "when", "more",
    ]
    .into_iter()
    .collect()
});

/// Run every signal family over a title/body pair and aggregate.
pub fn detect(title: &str, content: &str, source: &str, cfg: &SpamConfig) -> SpamVerdict {
    let mut signals = Vec::new();
    let combined = format!("{title} {content}");

    if let Some(s) = promotional_signal(&combined) {
        signals.push(s);
    }
    if let Some(s) = clickbait_signal(title, content) {
        signals.push(s);
    }

    let content_words = count_words(content);
    if let Some(s) = thin_content_signal(title, content_words) {
        signals.push(s);
    }

    let coherence = title_content_coherence(title, content);
    if let Some(s) = coherence_signal(coherence, content_words) {
        signals.push(s);
    }

    let spam_probability = aggregate(&signals, cfg);
    let recommendation = if spam_probability >= cfg.reject_threshold {
        Recommendation::Reject
    } else if spam_probability >= cfg.review_threshold {
        Recommendation::Review
    } else {
        Recommendation::Accept
    };

    let content_score = (content_words as f64 / SOLID_CONTENT_WORDS as f64).clamp(0.0, 1.0);

    if recommendation != Recommendation::Accept {
        tracing::debug!(
            source = %source,
            probability = spam_probability,
            recommendation = recommendation.as_str(),
            signals = signals.len(),
            "Spam signals raised"
        );
    }

    SpamVerdict {
        is_spam: spam_probability >= cfg.reject_threshold,
        spam_probability,
        content_score,
        title_content_coherence: coherence,
        signals,
        recommendation,
    }
}

/// Mean weighted confidence over the fixed family count, so a clean family
/// pulls the probability down and raising a fired family's weight can only
/// raise it.
fn aggregate(signals: &[SpamSignal], cfg: &SpamConfig) -> f64 {
    let weight_of = |family: &str| cfg.signal_weights.get(family).copied().unwrap_or(1.0);

    let fired: f64 = signals
        .iter()
        .map(|s| s.confidence * weight_of(&s.signal_type))
        .sum();
    (fired / SIGNAL_FAMILIES.len() as f64).clamp(0.0, 1.0)
}

fn promotional_signal(text: &str) -> Option<SpamSignal> {
    let hits = PROMO_RE.find_iter(text).count();
    if hits == 0 {
        return None;
    }
    Some(SpamSignal {
        signal_type: "promotional".into(),
        confidence: (hits as f64 * 0.25).min(1.0),
        reason: format!("{hits} promotional phrase(s)"),
    })
}

fn clickbait_signal(title: &str, content: &str) -> Option<SpamSignal> {
    let title_hits = CLICKBAIT_RE.find_iter(title).count();
    let body_hits = CLICKBAIT_RE.find_iter(content).count();
    if title_hits + body_hits == 0 {
        return None;
    }
    // A clickbait title is a much stronger signal than clickbait prose.
    let confidence = (title_hits as f64 * 0.6 + body_hits as f64 * 0.2).min(1.0);
    Some(SpamSignal {
        signal_type: "clickbait".into(),
        confidence,
        reason: format!("{title_hits} title / {body_hits} body clickbait phrase(s)"),
    })
}

/// Length floor scales with title complexity: a long, specific headline
/// promises more than a three-word one.
fn thin_content_signal(title: &str, content_words: usize) -> Option<SpamSignal> {
    let floor = (count_words(title) * 8).max(40);
    if content_words >= floor {
        return None;
    }
    let confidence = 1.0 - content_words as f64 / floor as f64;
    Some(SpamSignal {
        signal_type: "thin_content".into(),
        confidence,
        reason: format!("{content_words} words, floor {floor}"),
    })
}

fn coherence_signal(coherence: f64, content_words: usize) -> Option<SpamSignal> {
    // Near-empty bodies already fire the thin-content signal; coherence
    // over a handful of words is noise.
    if content_words < 20 || coherence >= COHERENCE_FLOOR {
        return None;
    }
    Some(SpamSignal {
        signal_type: "low_coherence".into(),
        confidence: 1.0 - coherence / COHERENCE_FLOOR,
        reason: format!("title/body overlap {coherence:.2}"),
    })
}

/// Fraction of substantive title tokens that also appear in the body.
pub fn title_content_coherence(title: &str, content: &str) -> f64 {
    let title_tokens = substantive_tokens(title);
    if title_tokens.is_empty() {
        return 1.0;
    }
    let content_tokens = substantive_tokens(content);
    let shared = title_tokens.intersection(&content_tokens).count();
    shared as f64 / title_tokens.len() as f64
}

fn substantive_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() > 3 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Tests
// ============================================================================
