//! Two-phase story clustering.
//!
//! Phase 1 runs at ingestion, before any network work: exact matches by
//! canonical URL or content hash against stories active within a trailing
//! window. Phase 2 runs after extraction, when the full text is available:
//! still-standalone articles are compared by SimHash against the same
//! window and merged when within the configured Hamming distance.
//!
//! All mutation goes through one async lock, so two sources resolving to the
//! same story concurrently serialize instead of racing to a lost update.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DedupConfig;
use crate::dedup::simhash::hamming_distance;
use crate::model::{Article, Story, StoryMember};

/// In-memory index of active stories with their lookup keys.
pub struct StoryIndex {
    cfg: DedupConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    stories: HashMap<Uuid, IndexedStory>,
    by_url: HashMap<String, Uuid>,
    by_hash: HashMap<String, Uuid>,
}

struct IndexedStory {
    story: Story,
    /// Signature of the earliest member, used for phase-2 matching.
    signature: u64,
    first_published: DateTime<Utc>,
}

/// Confidence assigned to a brand-new singleton story.
const BASE_CONFIDENCE: f64 = 0.5;

impl StoryIndex {
    pub fn new(cfg: DedupConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner {
                stories: HashMap::new(),
                by_url: HashMap::new(),
                by_hash: HashMap::new(),
            }),
        }
    }

    /// Phase 1: attach the article to an active story by exact key, or
    /// create a new singleton. Sets `article.story_id` and returns it.
    pub async fn assign_initial(&self, article: &mut Article, now: DateTime<Utc>) -> Uuid {
        let mut inner = self.inner.lock().await;
        let cutoff = now - Duration::days(self.cfg.window_days);

        let by_url = inner.by_url.get(&article.canonical_url).copied();
        let by_hash = (!article.content_hash.is_empty())
            .then(|| inner.by_hash.get(&article.content_hash).copied())
            .flatten();

        if let Some(id) = by_url.or(by_hash) {
            if let Some(indexed) = inner.stories.get_mut(&id) {
                if indexed.story.last_seen >= cutoff {
                    attach(indexed, article, 1.0, now);
                    article.story_id = Some(id);
                    tracing::debug!(
                        article = %article.id,
                        story = %id,
                        members = indexed.story.article_count,
                        "attached to story by exact key"
                    );
                    return id;
                }
            }
        }

        let id = self.create_story(&mut inner, article, now);
        article.story_id = Some(id);
        id
    }

    /// Phase 2: for articles still alone in their story, rescan the window
    /// by SimHash and merge into a better home when one exists.
    ///
    /// The article's `simhash` must already be recomputed from full content.
    /// On merge, the singleton story created in phase 1 is dissolved; the
    /// target keeps its identity, its earliest title, and the best image.
    pub async fn refine(&self, article: &mut Article, now: DateTime<Utc>) {
        let own_id = match article.story_id {
            Some(id) => id,
            None => return,
        };

        let mut inner = self.inner.lock().await;

        let standalone = inner
            .stories
            .get(&own_id)
            .map(|s| s.story.article_count <= 1)
            .unwrap_or(false);
        if !standalone || article.simhash == 0 {
            return;
        }

        let cutoff = now - Duration::days(self.cfg.window_days);
        let mut best: Option<(Uuid, u32)> = None;
        for (id, indexed) in &inner.stories {
            if *id == own_id || indexed.story.last_seen < cutoff {
                continue;
            }
            let d = hamming_distance(article.simhash, indexed.signature);
            if d <= self.cfg.hamming_threshold && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((*id, d));
            }
        }

        let (target, distance) = match best {
            Some(found) => found,
            None => return, // stays standalone
        };

        // Dissolve the singleton before attaching to the target.
        if let Some(old) = inner.stories.remove(&own_id) {
            inner.by_url.retain(|_, v| *v != own_id);
            inner.by_hash.retain(|_, v| *v != own_id);
            drop(old);
        }

        let strength = 1.0 - distance as f64 / 64.0;
        inner.by_url.insert(article.canonical_url.clone(), target);
        if !article.content_hash.is_empty() {
            inner.by_hash.insert(article.content_hash.clone(), target);
        }
        if let Some(indexed) = inner.stories.get_mut(&target) {
            attach(indexed, article, strength, now);
            article.story_id = Some(target);
            tracing::info!(
                article = %article.id,
                story = %target,
                hamming = distance,
                "merged near-duplicate into story"
            );
        }
    }

    /// Update the index after extraction refreshed an article's keys.
    ///
    /// Content hash and signature are only known (or only accurate) once the
    /// full text exists; phase 2 relies on them being registered.
    pub async fn register_content(&self, article: &Article) {
        let id = match article.story_id {
            Some(id) => id,
            None => return,
        };
        let mut inner = self.inner.lock().await;
        if !article.content_hash.is_empty() {
            inner.by_hash.insert(article.content_hash.clone(), id);
        }
        if let Some(indexed) = inner.stories.get_mut(&id) {
            // Singleton signatures track the full-content hash; established
            // stories keep the signature of their earliest member.
            if indexed.story.article_count <= 1 && article.simhash != 0 {
                indexed.signature = article.simhash;
            }
        }
    }

    /// Snapshot of one story cluster.
    pub async fn snapshot(&self, id: Uuid) -> Option<Story> {
        let inner = self.inner.lock().await;
        inner.stories.get(&id).map(|s| s.story.clone())
    }

    /// Snapshot of every story currently indexed.
    pub async fn all_stories(&self) -> Vec<Story> {
        let inner = self.inner.lock().await;
        inner.stories.values().map(|s| s.story.clone()).collect()
    }

    fn create_story(&self, inner: &mut Inner, article: &Article, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let story = Story {
            id,
            canonical_title: article.title.clone(),
            best_image: article.top_image.clone(),
            members: vec![StoryMember {
                article_id: article.id,
                source_name: article.source_name.clone(),
            }],
            first_seen: now,
            last_seen: now,
            confidence: BASE_CONFIDENCE,
            article_count: 1,
        };
        inner.by_url.insert(article.canonical_url.clone(), id);
        if !article.content_hash.is_empty() {
            inner.by_hash.insert(article.content_hash.clone(), id);
        }
        inner.stories.insert(
            id,
            IndexedStory {
                story,
                signature: article.simhash,
                first_published: article.published_at.unwrap_or(now),
            },
        );
        id
    }
}

/// Attach an article to an existing story, keeping the cluster invariants:
/// count tracks membership, canonical title belongs to the earliest member,
/// best image is only replaced by strictly higher resolution. Re-attaching
/// an existing member refreshes the story without duplicating it.
fn attach(indexed: &mut IndexedStory, article: &Article, strength: f64, now: DateTime<Utc>) {
    let story = &mut indexed.story;
    let already_member = story.members.iter().any(|m| m.article_id == article.id);
    if !already_member {
        story.members.push(StoryMember {
            article_id: article.id,
            source_name: article.source_name.clone(),
        });
        story.article_count = story.members.len() as u32;
        story.confidence = ((story.confidence + strength) / 2.0).clamp(0.0, 1.0);
    }
    story.last_seen = now;

    if let Some(published) = article.published_at {
        if published < indexed.first_published {
            indexed.first_published = published;
            story.canonical_title = article.title.clone();
        }
    }

    if let Some(candidate) = &article.top_image {
        let better = story
            .best_image
            .as_ref()
            .map(|current| {
                (candidate.width as u64 * candidate.height as u64)
                    > (current.width as u64 * current.height as u64)
            })
            .unwrap_or(true);
        if better {
            story.best_image = Some(candidate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::canonical::content_fingerprint;
    use crate::dedup::simhash::near_duplicate_signature;
    use crate::model::{FeedItem, TopImage};

    fn item(url: &str, source: &str, title: &str) -> FeedItem {
        FeedItem {
            entry_id: format!("{source}:{url}"),
            title: title.into(),
            url: url.into(),
            published_at: Some(Utc::now()),
            source_name: source.into(),
            content_snippet: String::new(),
            media: vec![],
        }
    }

    fn article(url: &str, source: &str, title: &str) -> Article {
        let it = item(url, source, title);
        Article::from_item(&it, it.url.clone(), Utc::now())
    }

    #[tokio::test]
    async fn same_content_hash_different_sources_share_a_story() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://alpha.example/1", "alpha", "Rates rise");
        let mut b = article("https://beta.example/2", "beta", "Rates rise");
        a.content_hash = content_fingerprint("central bank raises rates");
        b.content_hash = a.content_hash.clone();

        let sa = index.assign_initial(&mut a, now).await;
        let sb = index.assign_initial(&mut b, now).await;

        assert_eq!(sa, sb);
        let story = index.snapshot(sa).await.unwrap();
        assert_eq!(story.article_count, 2);
        assert_eq!(story.members.len(), 2);
    }

    #[tokio::test]
    async fn reassigning_the_same_article_is_idempotent() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://example.com/story", "alpha", "A story");
        let first = index.assign_initial(&mut a, now).await;
        let later = now + Duration::hours(1);
        let second = index.assign_initial(&mut a, later).await;

        assert_eq!(first, second);
        let story = index.snapshot(first).await.unwrap();
        assert_eq!(story.article_count, 1);
        assert_eq!(story.members.len(), 1);
        assert_eq!(story.last_seen, later);
    }

    #[tokio::test]
    async fn same_canonical_url_attaches() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://example.com/story", "alpha", "A story");
        let mut b = article("https://example.com/story", "beta", "A story again");

        let sa = index.assign_initial(&mut a, now).await;
        let sb = index.assign_initial(&mut b, now).await;
        assert_eq!(sa, sb);
    }

    #[tokio::test]
    async fn unrelated_articles_get_distinct_stories() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://alpha.example/1", "alpha", "Rates rise");
        let mut b = article("https://beta.example/2", "beta", "Bakery wins prize");
        a.content_hash = content_fingerprint("rates");
        b.content_hash = content_fingerprint("bakery");

        let sa = index.assign_initial(&mut a, now).await;
        let sb = index.assign_initial(&mut b, now).await;
        assert_ne!(sa, sb);
    }

    #[tokio::test]
    async fn stale_story_outside_window_is_not_matched() {
        let index = StoryIndex::new(DedupConfig {
            window_days: 7,
            hamming_threshold: 10,
        });
        let then = Utc::now() - Duration::days(30);
        let now = Utc::now();

        let mut old = article("https://example.com/story", "alpha", "Old story");
        let sa = index.assign_initial(&mut old, then).await;

        let mut fresh = article("https://example.com/story", "beta", "Old story resurfaces");
        let sb = index.assign_initial(&mut fresh, now).await;

        assert_ne!(sa, sb);
    }

    #[tokio::test]
    async fn phase_two_merges_near_duplicates() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let text_a = "Central bank raises interest rates amid inflation concerns \
            as markets react to the announcement";
        let text_b = "Central bank raises interest rates amid inflation concerns \
            as investors react to the announcement";

        let mut a = article("https://alpha.example/1", "alpha", "Rates rise");
        a.content_hash = content_fingerprint(text_a);
        a.simhash = near_duplicate_signature(text_a);
        let sa = index.assign_initial(&mut a, now).await;
        index.register_content(&a).await;

        let mut b = article("https://beta.example/2", "beta", "Rates go up");
        b.content_hash = content_fingerprint(text_b);
        let sb = index.assign_initial(&mut b, now).await;
        assert_ne!(sa, sb);

        b.simhash = near_duplicate_signature(text_b);
        index.refine(&mut b, now).await;

        assert_eq!(b.story_id, Some(sa));
        let story = index.snapshot(sa).await.unwrap();
        assert_eq!(story.article_count, 2);
        assert!(index.snapshot(sb).await.is_none(), "singleton dissolved");
    }

    #[tokio::test]
    async fn refine_leaves_distant_articles_standalone() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://alpha.example/1", "alpha", "Rates rise");
        a.simhash = near_duplicate_signature("central bank raises interest rates today");
        index.assign_initial(&mut a, now).await;
        index.register_content(&a).await;

        let mut b = article("https://beta.example/2", "beta", "Bakery prize");
        let sb = index.assign_initial(&mut b, now).await;
        b.simhash =
            near_duplicate_signature("local bakery wins regional pastry competition entry");
        index.refine(&mut b, now).await;

        assert_eq!(b.story_id, Some(sb));
    }

    #[tokio::test]
    async fn best_image_is_highest_resolution() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut a = article("https://example.com/story", "alpha", "A story");
        a.top_image = Some(TopImage {
            url: "cache/aa/bb/small.jpg".into(),
            width: 320,
            height: 180,
            placeholder: "L0".into(),
        });
        let sid = index.assign_initial(&mut a, now).await;

        let mut b = article("https://example.com/story", "beta", "A story");
        b.top_image = Some(TopImage {
            url: "cache/cc/dd/big.jpg".into(),
            width: 1280,
            height: 720,
            placeholder: "L0".into(),
        });
        index.assign_initial(&mut b, now).await;

        let story = index.snapshot(sid).await.unwrap();
        assert_eq!(story.best_image.unwrap().width, 1280);
    }

    #[tokio::test]
    async fn canonical_title_is_earliest_members() {
        let index = StoryIndex::new(DedupConfig::default());
        let now = Utc::now();

        let mut late = article("https://example.com/story", "alpha", "Later title");
        late.published_at = Some(now);
        let sid = index.assign_initial(&mut late, now).await;

        let mut early = article("https://example.com/story", "beta", "Earliest title");
        early.published_at = Some(now - Duration::hours(5));
        index.assign_initial(&mut early, now).await;

        let story = index.snapshot(sid).await.unwrap();
        assert_eq!(story.canonical_title, "Earliest title");
    }
}
