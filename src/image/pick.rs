//! Primary-image selection across every place a feed can hide one.

use scraper::{Html, Selector};

use crate::dedup::normalize_url;
use crate::model::{coerce_dimension, estimated_area, FeedItem, MediaKind};

/// Where the winning candidate came from, in strict priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImageOrigin {
    Enclosure,
    MediaContent,
    MediaThumbnail,
    BodyImg,
    PageMeta,
}

/// A normalized image URL with enough metadata to break ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub origin: ImageOrigin,
    pub estimated_area: u64,
}

/// Pick the best image for an item.
///
/// Tiers are tried in order and the first tier with a usable candidate
/// wins outright; `estimated_area` only breaks ties within a tier. The
/// article page's og:image/twitter:image is the last resort, so a feed
/// that declares its own media never pays for a page parse.
pub fn pick_primary_image(
    item: &FeedItem,
    body_html: Option<&str>,
    page_html: Option<&str>,
) -> Option<ImageCandidate> {
    let base = Some(item.url.as_str());

    for kind in [
        MediaKind::Enclosure,
        MediaKind::MediaContent,
        MediaKind::MediaThumbnail,
    ] {
        let best = item
            .media
            .iter()
            .filter(|m| m.kind == kind && looks_like_image(m.content_type.as_deref(), &m.url))
            .filter_map(|m| {
                let url = normalize_image_url(&m.url, base)?;
                Some(ImageCandidate {
                    url,
                    origin: origin_for(kind),
                    estimated_area: m.estimated_area(),
                })
            })
            .max_by_key(|c| c.estimated_area);
        if best.is_some() {
            return best;
        }
    }

    if let Some(html) = body_html {
        if let Some(c) = largest_body_img(html, base) {
            return Some(c);
        }
    }

    if let Some(html) = page_html {
        if let Some(c) = page_meta_image(html, base) {
            return Some(c);
        }
    }

    None
}

/// URL normalization for images: the usual canonical form plus
/// scheme-relative `//cdn.example.com/...` references, which feeds emit
/// far more often for images than for links.
pub fn normalize_image_url(raw: &str, base: Option<&str>) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("//") {
        return normalize_url(&format!("https://{rest}"), base);
    }
    normalize_url(trimmed, base)
}

fn origin_for(kind: MediaKind) -> ImageOrigin {
    match kind {
        MediaKind::Enclosure => ImageOrigin::Enclosure,
        MediaKind::MediaContent => ImageOrigin::MediaContent,
        MediaKind::MediaThumbnail => ImageOrigin::MediaThumbnail,
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];

fn looks_like_image(content_type: Option<&str>, url: &str) -> bool {
    if let Some(ct) = content_type {
        return ct.trim().to_lowercase().starts_with("image/");
    }
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn largest_body_img(html: &str, base: Option<&str>) -> Option<ImageCandidate> {
    let fragment = Html::parse_fragment(html);
    let img_sel = Selector::parse("img").ok()?;

    fragment
        .select(&img_sel)
        .filter_map(|img| {
            let src = img.value().attr("src")?;
            if src.starts_with("data:") {
                return None;
            }
            let url = normalize_image_url(src, base)?;
            let width = img.value().attr("width").and_then(coerce_dimension);
            let height = img.value().attr("height").and_then(coerce_dimension);
            Some(ImageCandidate {
                url,
                origin: ImageOrigin::BodyImg,
                estimated_area: estimated_area(width, height),
            })
        })
        .max_by_key(|c| c.estimated_area)
}

fn page_meta_image(html: &str, base: Option<&str>) -> Option<ImageCandidate> {
    let document = Html::parse_document(html);

    for selector in [
        "meta[property=\"og:image\"]",
        "meta[name=\"og:image\"]",
        "meta[name=\"twitter:image\"]",
        "meta[property=\"twitter:image\"]",
    ] {
        let sel = Selector::parse(selector).ok()?;
        if let Some(content) = document
            .select(&sel)
            .filter_map(|m| m.value().attr("content"))
            .find(|c| !c.trim().is_empty())
        {
            if let Some(url) = normalize_image_url(content, base) {
                return Some(ImageCandidate {
                    url,
                    origin: ImageOrigin::PageMeta,
                    estimated_area: estimated_area(None, None),
                });
            }
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaCandidate;

    fn item_with_media(media: Vec<MediaCandidate>) -> FeedItem {
        FeedItem {
            entry_id: "e1".into(),
            title: "t".into(),
            url: "https://news.example.com/story".into(),
            published_at: None,
            source_name: "example".into(),
            content_snippet: String::new(),
            media,
        }
    }

    #[test]
    fn enclosure_beats_larger_inline_img() {
        let item = item_with_media(vec![MediaCandidate::new(
            "https://cdn.example.com/enclosed.jpg",
            MediaKind::Enclosure,
            Some("image/jpeg".into()),
            None,
            None,
        )]);
        let body = r#"<p>text</p><img src="https://cdn.example.com/huge.jpg" width="800" height="600">"#;

        let picked = pick_primary_image(&item, Some(body), None).unwrap();
        assert_eq!(picked.origin, ImageOrigin::Enclosure);
        assert_eq!(picked.url, "https://cdn.example.com/enclosed.jpg");
    }

    #[test]
    fn within_tier_larger_area_wins() {
        let item = item_with_media(vec![
            MediaCandidate::new(
                "https://cdn.example.com/small.jpg",
                MediaKind::MediaContent,
                Some("image/jpeg".into()),
                Some("100"),
                Some("100"),
            ),
            MediaCandidate::new(
                "https://cdn.example.com/big.jpg",
                MediaKind::MediaContent,
                Some("image/jpeg".into()),
                Some("1200"),
                Some("800"),
            ),
        ]);

        let picked = pick_primary_image(&item, None, None).unwrap();
        assert_eq!(picked.url, "https://cdn.example.com/big.jpg");
        assert_eq!(picked.estimated_area, 1200 * 800);
    }

    #[test]
    fn non_image_enclosure_is_skipped() {
        let item = item_with_media(vec![MediaCandidate::new(
            "https://cdn.example.com/episode.mp3",
            MediaKind::Enclosure,
            Some("audio/mpeg".into()),
            None,
            None,
        )]);
        assert!(pick_primary_image(&item, None, None).is_none());
    }

    #[test]
    fn body_img_used_when_feed_declares_nothing() {
        let item = item_with_media(vec![]);
        let body = r#"<img src="/images/lead.png" width="640"><img src="/images/icon.png" width="16" height="16">"#;

        let picked = pick_primary_image(&item, Some(body), None).unwrap();
        assert_eq!(picked.origin, ImageOrigin::BodyImg);
        assert_eq!(picked.url, "https://news.example.com/images/lead.png");
        // 4:3 assumed for the missing height
        assert_eq!(picked.estimated_area, 640 * 480);
    }

    #[test]
    fn og_image_is_last_resort() {
        let item = item_with_media(vec![]);
        let page = r#"<html><head>
            <meta property="og:image" content="https://cdn.example.com/og.jpg">
            </head><body></body></html>"#;

        let picked = pick_primary_image(&item, Some("<p>no images here</p>"), Some(page)).unwrap();
        assert_eq!(picked.origin, ImageOrigin::PageMeta);
        assert_eq!(picked.url, "https://cdn.example.com/og.jpg");
    }

    #[test]
    fn twitter_image_fallback_when_no_og() {
        let item = item_with_media(vec![]);
        let page = r#"<meta name="twitter:image" content="//cdn.example.com/tw.jpg">"#;

        let picked = pick_primary_image(&item, None, Some(page)).unwrap();
        assert_eq!(picked.url, "https://cdn.example.com/tw.jpg");
    }

    #[test]
    fn scheme_relative_urls_get_https() {
        assert_eq!(
            normalize_image_url("//cdn.example.com/a.jpg", None).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
    }

    #[test]
    fn data_uris_are_ignored() {
        let item = item_with_media(vec![]);
        let body = r#"<img src="data:image/gif;base64,R0lGOD">"#;
        assert!(pick_primary_image(&item, Some(body), None).is_none());
    }
}
