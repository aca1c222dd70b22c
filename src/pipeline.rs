//! End-to-end orchestration of the enrichment pipeline.
//!
//! Stage order per item: canonicalize → phase-1 story assignment →
//! extraction → phase-2 refinement → image → spam → score → sink. Items
//! run concurrently under a bounded `buffer_unordered`; one item's failure
//! never aborts the batch. Only systemic errors (an unreachable sink)
//! escape `process_batch`.

use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use uuid::Uuid;

use crate::config::Config;
use crate::dedup::{content_fingerprint, near_duplicate_signature, normalize_url, StoryIndex};
use crate::extract::{extract_fallback, Extractor, RunSummary};
use crate::image::{pick_primary_image, ImageCache, RejectEntry};
use crate::model::{
    Article, ExtractionAttempt, ExtractionStatus, FeedItem, Recommendation, SpamReport, Story,
    TopImage,
};
use crate::score::{apply_spam_penalty, score, ScoreInput};
use crate::spam;

// ============================================================================
// Sink
// ============================================================================

/// Storage collaborator. Everything the pipeline produces goes through
/// here; implementations decide durability.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Previously stored article for this entry, if any. Lets reprocessing
    /// keep the article's identity and its extraction state.
    async fn find_article(&self, entry_id: &str) -> anyhow::Result<Option<Article>>;
    async fn store_article(&self, article: &Article) -> anyhow::Result<()>;
    async fn store_attempt(&self, attempt: &ExtractionAttempt) -> anyhow::Result<()>;
    async fn store_spam_report(&self, report: &SpamReport) -> anyhow::Result<()>;
    async fn store_story(&self, story: &Story) -> anyhow::Result<()>;
}

// ============================================================================
// Batch outcome
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub items: usize,
    pub stored: usize,
    pub spam_rejected: usize,
    pub images_cached: usize,
    pub stories_touched: usize,
    pub extraction: RunSummary,
}

/// Aggregate result of one batch. `failures` carries per-item problems
/// (by `entry_id`) that prevented an article from being produced at all.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub stats: BatchStats,
    pub failures: Vec<(String, String)>,
}

enum ItemResult {
    Stored {
        story_id: Option<Uuid>,
        rejected: bool,
        image_cached: bool,
    },
    Skipped {
        entry_id: String,
        reason: String,
    },
}

// ============================================================================
// Pipeline
// ============================================================================

/// Owns every collaborator for one processing context. Explicit
/// construction, no globals; tests build one around a mock server and an
/// in-memory sink.
pub struct Pipeline<S: Sink> {
    cfg: Config,
    extractor: Extractor,
    images: ImageCache,
    stories: StoryIndex,
    sink: S,
}

impl<S: Sink> Pipeline<S> {
    pub fn new(cfg: Config, sink: S) -> anyhow::Result<Self> {
        let extractor =
            Extractor::new(cfg.extraction.clone()).context("building HTTP extractor")?;
        let images = ImageCache::new(extractor.client().clone(), cfg.image.clone());
        let stories = StoryIndex::new(cfg.dedup.clone());
        Ok(Self {
            cfg,
            extractor,
            images,
            stories,
            sink,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Story clusters currently tracked.
    pub async fn stories(&self) -> Vec<Story> {
        self.stories.all_stories().await
    }

    /// Images the cache refused this run.
    pub fn image_rejects(&self) -> Vec<RejectEntry> {
        self.images.rejects()
    }

    /// Process one batch of ingested items to completion.
    pub async fn process_batch(&self, items: Vec<FeedItem>) -> anyhow::Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        outcome.stats.items = items.len();

        let mut touched: HashSet<Uuid> = HashSet::new();
        let concurrency = self.cfg.extraction.max_concurrent.max(1);

        let mut results = futures::stream::iter(
            items.into_iter().map(|item| self.process_item(item)),
        )
        .buffer_unordered(concurrency);

        while let Some(result) = results.next().await {
            match result? {
                ItemResult::Stored {
                    story_id,
                    rejected,
                    image_cached,
                } => {
                    outcome.stats.stored += 1;
                    if rejected {
                        outcome.stats.spam_rejected += 1;
                    }
                    if image_cached {
                        outcome.stats.images_cached += 1;
                    }
                    if let Some(id) = story_id {
                        touched.insert(id);
                    }
                }
                ItemResult::Skipped { entry_id, reason } => {
                    outcome.failures.push((entry_id, reason));
                }
            }
        }
        drop(results);

        for id in &touched {
            if let Some(story) = self.stories.snapshot(*id).await {
                self.sink
                    .store_story(&story)
                    .await
                    .context("storing story cluster")?;
            }
        }

        outcome.stats.stories_touched = touched.len();
        outcome.stats.extraction = self.extractor.stats();
        tracing::info!(
            items = outcome.stats.items,
            stored = outcome.stats.stored,
            failures = outcome.failures.len(),
            spam_rejected = outcome.stats.spam_rejected,
            stories = outcome.stats.stories_touched,
            "Batch complete"
        );
        Ok(outcome)
    }

    /// One item through every stage. `Err` is systemic (sink failure);
    /// content-level problems come back as `ItemResult::Skipped` or as
    /// status fields on the stored article.
    async fn process_item(&self, item: FeedItem) -> anyhow::Result<ItemResult> {
        let now = Utc::now();

        let canonical = match normalize_url(&item.url, None) {
            Some(u) => u,
            None => {
                tracing::warn!(entry = %item.entry_id, url = %item.url, "Unusable article URL");
                return Ok(ItemResult::Skipped {
                    entry_id: item.entry_id,
                    reason: format!("unusable URL: {}", item.url),
                });
            }
        };

        let mut article = Article::from_item(&item, canonical, now);

        // Cheap pre-extraction fingerprint from what the feed gave us.
        let snippet = snippet_text(&item.content_snippet);
        article.content_hash = content_fingerprint(&format!("{} {}", article.title, snippet));

        // A previously stored entry keeps its identity and extraction
        // state, so re-ingestion updates in place instead of duplicating.
        if let Some(prior) = self
            .sink
            .find_article(&item.entry_id)
            .await
            .context("looking up stored article")?
        {
            carry_prior(&mut article, prior);
        }

        self.stories.assign_initial(&mut article, now).await;

        let attempts = self.extractor.extract_article(&mut article, false).await;
        for attempt in &attempts {
            self.sink
                .store_attempt(attempt)
                .await
                .context("storing extraction attempt")?;
        }

        if article.extraction_status == ExtractionStatus::Success {
            if let Some(text) = article.full_text.clone() {
                article.content_hash = content_fingerprint(&text);
            }
            article.simhash = near_duplicate_signature(&article.signature_text());
            self.stories.register_content(&article).await;
            self.stories.refine(&mut article, now).await;
        }

        let image_cached = self.attach_image(&item, &mut article).await;

        let body = article.full_text.clone().unwrap_or_else(|| snippet.clone());
        let verdict = spam::detect(&article.title, &body, &article.source_name, &self.cfg.spam);
        article.spam_probability = verdict.spam_probability;
        article.content_quality_score = verdict.content_score;

        let scored_at = Utc::now();
        let input = ScoreInput {
            title: &article.title,
            content: &body,
            source: &article.source_name,
            published_at: article.published_at,
            has_image: article.top_image.is_some(),
        };
        let mut breakdown = score(&input, &self.cfg.scoring, scored_at);
        apply_spam_penalty(&mut breakdown, &verdict, &self.cfg.spam);

        article.score_total = breakdown.total;
        article.subscores = breakdown.subscores;
        for topic in breakdown.topics {
            if !article.topics.contains(&topic) {
                article.topics.push(topic);
            }
        }
        article.entities = breakdown.entities;
        article.flags = breakdown.flags;
        article.scored_at = Some(scored_at);

        let rejected = verdict.recommendation == Recommendation::Reject;

        self.sink
            .store_article(&article)
            .await
            .context("storing article")?;
        self.sink
            .store_spam_report(&verdict.report(article.id, scored_at))
            .await
            .context("storing spam report")?;

        Ok(ItemResult::Stored {
            story_id: article.story_id,
            rejected,
            image_cached,
        })
    }

    /// Pick, fetch and attach the primary image. A rejected or missing
    /// image never fails the article.
    async fn attach_image(&self, item: &FeedItem, article: &mut Article) -> bool {
        let body_html = (!item.content_snippet.is_empty()).then_some(item.content_snippet.as_str());
        let candidate = match pick_primary_image(item, body_html, article.full_html.as_deref()) {
            Some(c) => c,
            None => return false,
        };

        match self.images.fetch_and_cache(&candidate.url).await {
            Some(cached) => {
                article.top_image = Some(TopImage {
                    url: cached.relative_path,
                    width: cached.width,
                    height: cached.height,
                    placeholder: cached.placeholder,
                });
                true
            }
            None => false,
        }
    }
}

/// Adopt the stored article's identity and whatever work already
/// succeeded. Feed-derived fields (title, snippet, media) stay fresh; a
/// successful extraction also keeps its content-derived fingerprints.
fn carry_prior(article: &mut Article, prior: Article) {
    article.id = prior.id;
    article.created_at = prior.created_at;
    article.story_id = prior.story_id;
    article.extraction_status = prior.extraction_status;
    article.extraction_error = prior.extraction_error;
    article.extracted_at = prior.extracted_at;
    article.full_text = prior.full_text;
    article.full_html = prior.full_html;
    article.language = prior.language;
    article.authors = prior.authors;
    article.topics = prior.topics;
    article.top_image = prior.top_image;
    if prior.extraction_status == ExtractionStatus::Success {
        article.content_hash = prior.content_hash;
        article.simhash = prior.simhash;
    }
}

/// Feed snippets routinely carry markup; reduce to plain text once.
fn snippet_text(snippet: &str) -> String {
    if snippet.contains('<') {
        extract_fallback(snippet).text
    } else {
        snippet.trim().to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
