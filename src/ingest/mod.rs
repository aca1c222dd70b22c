//! Typed ingestion boundary: `feed_rs` entries become `FeedItem`s.
//!
//! Upstream feed fields are duck-typed and partially absent; everything is
//! validated and coerced here, once, so the pipeline never sees a malformed
//! field. Entries without a usable link are rejected (with a counter), not
//! patched downstream.

mod fetch;

use feed_rs::model::Entry;
use sha2::{Digest, Sha256};

use crate::model::{FeedItem, MediaCandidate, MediaKind};

pub use fetch::{fetch_feed, FetchError};

/// Outcome of adapting one batch of entries.
#[derive(Debug, Default)]
pub struct IngestResult {
    pub items: Vec<FeedItem>,
    /// Entries dropped for having no usable article link.
    pub skipped: usize,
}

/// Adapt raw feed entries into validated `FeedItem`s.
pub fn adapt_entries(
    entries: Vec<Entry>,
    source_name: &str,
    base_url: Option<&str>,
) -> IngestResult {
    let mut result = IngestResult::default();
    for entry in entries {
        match adapt_entry(entry, source_name, base_url) {
            Some(item) => result.items.push(item),
            None => result.skipped += 1,
        }
    }
    if result.skipped > 0 {
        tracing::warn!(
            source = source_name,
            skipped = result.skipped,
            "Entries without usable links dropped at ingestion"
        );
    }
    result
}

/// Adapt a single entry, or `None` when it has no article link.
pub fn adapt_entry(entry: Entry, source_name: &str, base_url: Option<&str>) -> Option<FeedItem> {
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("enclosure"))
        .map(|l| l.href.clone())?;

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let published_at = entry.published.or(entry.updated);

    let content_snippet = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();

    let existing_id = if entry.id.is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let entry_id = generate_guid(
        existing_id,
        Some(&url),
        &title,
        published_at.map(|d| d.timestamp()),
    );

    let mut media = Vec::new();

    // Enclosure links: only image types are candidates.
    for link in &entry.links {
        if link.rel.as_deref() == Some("enclosure") {
            let is_image = link
                .media_type
                .as_deref()
                .map(|m| m.starts_with("image/"))
                .unwrap_or(false);
            if is_image {
                media.push(MediaCandidate {
                    url: resolve(&link.href, base_url),
                    kind: MediaKind::Enclosure,
                    content_type: link.media_type.clone(),
                    width: None,
                    height: None,
                });
            }
        }
    }

    // media:content / media:thumbnail — dimensions arrive pre-parsed from
    // feed-rs, but zero means the feed lied; treat it as unknown.
    //
    // RSS `<enclosure>` elements also land here: feed-rs folds them into the
    // default media object as content with a byte size and no dimensions
    // (the length attribute is mandatory on enclosures, width/height do not
    // exist there). Classify those separately and keep only image types.
    for object in &entry.media {
        for content in &object.content {
            let Some(url) = &content.url else { continue };
            let from_enclosure =
                content.size.is_some() && content.width.is_none() && content.height.is_none();
            if from_enclosure {
                let is_image = content
                    .content_type
                    .as_ref()
                    .map(|m| m.ty().as_str() == "image")
                    .unwrap_or(false);
                if is_image {
                    media.push(MediaCandidate {
                        url: resolve(url.as_str(), base_url),
                        kind: MediaKind::Enclosure,
                        content_type: content.content_type.as_ref().map(|m| m.to_string()),
                        width: None,
                        height: None,
                    });
                }
            } else {
                media.push(MediaCandidate {
                    url: resolve(url.as_str(), base_url),
                    kind: MediaKind::MediaContent,
                    content_type: content.content_type.as_ref().map(|m| m.to_string()),
                    width: content.width.and_then(nonzero),
                    height: content.height.and_then(nonzero),
                });
            }
        }
        for thumb in &object.thumbnails {
            media.push(MediaCandidate {
                url: resolve(&thumb.image.uri, base_url),
                kind: MediaKind::MediaThumbnail,
                content_type: None,
                width: thumb.image.width.and_then(nonzero),
                height: thumb.image.height.and_then(nonzero),
            });
        }
    }

    Some(FeedItem {
        entry_id,
        title,
        url,
        published_at,
        source_name: source_name.to_string(),
        content_snippet,
        media,
    })
}

fn nonzero(n: u32) -> Option<u32> {
    (n > 0).then_some(n)
}

fn resolve(href: &str, base: Option<&str>) -> String {
    crate::dedup::normalize_url(href, base).unwrap_or_else(|| href.to_string())
}

/// Stable guid: the feed's own id when present, else a hash of the
/// identifying fields. Matches how duplicate detection keys entries even
/// when publishers omit guids.
fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
