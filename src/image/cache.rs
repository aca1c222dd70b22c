//! Content-addressed image cache.
//!
//! Every accepted image is re-encoded to a normalized JPEG and stored under
//! a two-level shard of its key hash, with a JSON sidecar describing it:
//!
//! ```text
//! {root}/{h[0:2]}/{h[2:4]}/{hash}.jpg
//! {root}/{h[0:2]}/{h[2:4]}/{hash}.json
//! ```
//!
//! A cache hit younger than the revalidation window never touches the
//! network. Rejections (wrong type, too small, undecodable) are recorded
//! in a write-only log and are never retried here; the next pipeline run
//! simply tries again.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use ::image::metadata::Orientation;
use ::image::{DynamicImage, ImageDecoder, ImageReader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ImageConfig;

const JPEG_QUALITY: u8 = 85;
const BLURHASH_COMPONENTS: (u32, u32) = (4, 3);
const THUMB_EDGE: u32 = 32;

const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

// ============================================================================
// Errors and the reject log
// ============================================================================

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("Image exceeds size cap")]
    TooLarge,
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
    #[error("Placeholder encoding failed: {0}")]
    Placeholder(String),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sidecar serialization failed: {0}")]
    Sidecar(#[from] serde_json::Error),
}

impl ImageError {
    fn stage(&self) -> &'static str {
        match self {
            ImageError::Network(_) | ImageError::HttpStatus(_) => "fetch",
            ImageError::UnsupportedType(_) => "content_type",
            ImageError::TooLarge => "size",
            ImageError::Decode(_) => "decode",
            ImageError::TooSmall { .. } => "dimensions",
            ImageError::Placeholder(_) => "placeholder",
            ImageError::Io(_) | ImageError::Sidecar(_) => "store",
        }
    }
}

/// One rejected image, kept for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectEntry {
    pub domain: String,
    pub stage: &'static str,
    pub reason: String,
}

/// Append-only record of images the cache refused.
#[derive(Debug, Default)]
pub struct RejectLog {
    entries: Mutex<Vec<RejectEntry>>,
}

impl RejectLog {
    fn record(&self, domain: &str, error: &ImageError) {
        let entry = RejectEntry {
            domain: domain.to_string(),
            stage: error.stage(),
            reason: error.to_string(),
        };
        tracing::debug!(domain = %entry.domain, stage = entry.stage, reason = %entry.reason, "Image rejected");
        self.entries.lock().expect("reject log poisoned").push(entry);
    }

    pub fn entries(&self) -> Vec<RejectEntry> {
        self.entries.lock().expect("reject log poisoned").clone()
    }
}

// ============================================================================
// Cache records
// ============================================================================

/// Sidecar written next to every cached JPEG. The validators, when the
/// origin served any, let a stale entry revalidate with a conditional
/// request instead of a full refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMeta {
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub placeholder: String,
    pub content_type: String,
    pub bytes: u64,
    pub cached_at: DateTime<Utc>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// A cache entry handed back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    /// Path relative to the cache root, e.g. `ab/cd/abcd...ef.jpg`.
    pub relative_path: String,
    pub width: u32,
    pub height: u32,
    pub placeholder: String,
}

// ============================================================================
// ImageCache
// ============================================================================

pub struct ImageCache {
    client: reqwest::Client,
    cfg: ImageConfig,
    root: PathBuf,
    rejects: RejectLog,
}

impl ImageCache {
    pub fn new(client: reqwest::Client, cfg: ImageConfig) -> Self {
        Self {
            root: cfg.cache_dir.clone(),
            client,
            cfg,
            rejects: RejectLog::default(),
        }
    }

    /// Cache key for a normalized image URL.
    pub fn cache_key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Rejections observed so far.
    pub fn rejects(&self) -> Vec<RejectEntry> {
        self.rejects.entries()
    }

    /// Fetch, normalize, and cache an image, or return the fresh cached
    /// copy without touching the network.
    ///
    /// Rejections return `None` after being logged. Concurrent calls for
    /// the same key may both fetch; both write identical content, so the
    /// race is harmless.
    pub async fn fetch_and_cache(&self, url: &str) -> Option<CachedImage> {
        let key = Self::cache_key(url);

        let prior = self.load_entry(&key).await;
        if let Some(meta) = &prior {
            if self.is_fresh(meta) {
                tracing::debug!(url = %url, "Image cache hit");
                return Some(Self::entry_for(&key, meta));
            }
        }

        match self.fetch_store(url, &key, prior).await {
            Ok(cached) => Some(cached),
            Err(e) => {
                let domain = url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();
                self.rejects.record(&domain, &e);
                None
            }
        }
    }

    fn shard_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join(&key[0..2]).join(&key[2..4]);
        (dir.join(format!("{key}.jpg")), dir.join(format!("{key}.json")))
    }

    fn relative_path(key: &str) -> String {
        format!("{}/{}/{key}.jpg", &key[0..2], &key[2..4])
    }

    /// Read the cached entry's sidecar if both files exist.
    async fn load_entry(&self, key: &str) -> Option<ImageMeta> {
        let (jpg, json) = self.shard_paths(key);
        if !jpg.exists() {
            return None;
        }
        let raw = tokio::fs::read(&json).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn is_fresh(&self, meta: &ImageMeta) -> bool {
        let max_age = Duration::from_secs(self.cfg.revalidate_after_hours * 3600);
        let age = Utc::now().signed_duration_since(meta.cached_at);
        age.to_std().map(|a| a < max_age).unwrap_or(false)
    }

    fn entry_for(key: &str, meta: &ImageMeta) -> CachedImage {
        CachedImage {
            relative_path: Self::relative_path(key),
            width: meta.width,
            height: meta.height,
            placeholder: meta.placeholder.clone(),
        }
    }

    /// Fetch (conditionally, when a stale prior entry carries validators),
    /// normalize, and write both cache files. A 304 answer refreshes the
    /// sidecar timestamp and keeps the stored JPEG.
    async fn fetch_store(
        &self,
        url: &str,
        key: &str,
        prior: Option<ImageMeta>,
    ) -> Result<CachedImage, ImageError> {
        let (jpg_path, json_path) = self.shard_paths(key);

        let body = self.download(url, prior.as_ref()).await?;
        let (bytes, etag, last_modified) = match (body, prior) {
            (Body::NotModified, Some(mut meta)) => {
                meta.cached_at = Utc::now();
                tokio::fs::write(&json_path, serde_json::to_vec_pretty(&meta)?).await?;
                tracing::debug!(url = %url, "Image revalidated, origin unchanged");
                return Ok(Self::entry_for(key, &meta));
            }
            // 304 to an unconditional request is an origin bug.
            (Body::NotModified, None) => return Err(ImageError::HttpStatus(304)),
            (Body::Full { bytes, etag, last_modified }, _) => (bytes, etag, last_modified),
        };

        let img = decode_oriented(&bytes)?;

        let (width, height) = (img.width(), img.height());
        if width < self.cfg.min_width || height < self.cfg.min_height {
            return Err(ImageError::TooSmall { width, height });
        }

        let jpeg = encode_jpeg(&img)?;
        let placeholder = blurhash_placeholder(&img)?;

        let meta = ImageMeta {
            source_url: url.to_string(),
            width,
            height,
            placeholder: placeholder.clone(),
            content_type: "image/jpeg".to_string(),
            bytes: jpeg.len() as u64,
            cached_at: Utc::now(),
            etag,
            last_modified,
        };

        if let Some(parent) = jpg_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&jpg_path, &jpeg).await?;
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&meta)?).await?;

        tracing::debug!(url = %url, width, height, bytes = jpeg.len(), "Image cached");
        Ok(CachedImage {
            relative_path: Self::relative_path(key),
            width,
            height,
            placeholder,
        })
    }

    async fn download(
        &self,
        url: &str,
        prior: Option<&ImageMeta>,
    ) -> Result<Body, ImageError> {
        let mut request = self.client.get(url);
        if let Some(meta) = prior {
            if let Some(etag) = &meta.etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(since) = &meta.last_modified {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, since);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(Body::NotModified);
        }
        if !status.is_success() {
            return Err(ImageError::HttpStatus(status.as_u16()));
        }

        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let essence = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();
            if !ALLOWED_TYPES.contains(&essence.as_str()) {
                return Err(ImageError::UnsupportedType(essence));
            }
        }

        let limit = self.cfg.max_bytes;
        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(ImageError::TooLarge);
            }
        }

        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len().saturating_add(chunk.len()) > limit {
                return Err(ImageError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(Body::Full { bytes, etag, last_modified })
    }
}

/// Downloaded image payload, or the origin's word that ours is current.
enum Body {
    NotModified,
    Full {
        bytes: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Accessible to tests: full cache root for a key.
impl ImageCache {
    pub fn path_for(&self, url: &str) -> PathBuf {
        let key = Self::cache_key(url);
        self.shard_paths(&key).0
    }
}

fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(out)
}

/// Blurhash is quadratic in pixel count, so encode from a small thumbnail.
fn blurhash_placeholder(img: &DynamicImage) -> Result<String, ImageError> {
    let thumb = img.thumbnail(THUMB_EDGE, THUMB_EDGE).to_rgba8();
    let (cx, cy) = BLURHASH_COMPONENTS;
    blurhash::encode(cx, cy, thumb.width(), thumb.height(), thumb.as_raw())
        .map_err(|e| ImageError::Placeholder(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{ImageBuffer, Rgb};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buf = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 120u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn cache_in(dir: &TempDir, cfg_tweak: impl FnOnce(&mut ImageConfig)) -> ImageCache {
        let mut cfg = ImageConfig {
            cache_dir: dir.path().to_path_buf(),
            ..ImageConfig::default()
        };
        cfg_tweak(&mut cfg);
        ImageCache::new(reqwest::Client::new(), cfg)
    }

    #[tokio::test]
    async fn caches_image_in_sharded_layout_with_sidecar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lead.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(png_bytes(640, 360)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |_| {});
        let url = format!("{}/lead.png", server.uri());

        let cached = cache.fetch_and_cache(&url).await.unwrap();
        assert_eq!((cached.width, cached.height), (640, 360));
        assert!(!cached.placeholder.is_empty());

        let key = ImageCache::cache_key(&url);
        assert_eq!(
            cached.relative_path,
            format!("{}/{}/{key}.jpg", &key[0..2], &key[2..4])
        );

        let jpg_path = cache.path_for(&url);
        assert!(jpg_path.exists());
        let sidecar: ImageMeta =
            serde_json::from_slice(&std::fs::read(jpg_path.with_extension("json")).unwrap())
                .unwrap();
        assert_eq!(sidecar.source_url, url);
        assert_eq!(sidecar.content_type, "image/jpeg");

        // cached bytes are a decodable JPEG
        let stored = decode_oriented(&std::fs::read(&jpg_path).unwrap()).unwrap();
        assert_eq!((stored.width(), stored.height()), (640, 360));
    }

    #[tokio::test]
    async fn fresh_hit_skips_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lead.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(png_bytes(640, 360)),
            )
            .expect(1) // second call must come from disk
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |_| {});
        let url = format!("{}/lead.png", server.uri());

        let first = cache.fetch_and_cache(&url).await.unwrap();
        let second = cache.fetch_and_cache(&url).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn tiny_image_is_rejected_and_logged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/icon.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(png_bytes(64, 64)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |_| {});
        let url = format!("{}/icon.png", server.uri());

        assert!(cache.fetch_and_cache(&url).await.is_none());
        let rejects = cache.rejects();
        assert_eq!(rejects.len(), 1);
        assert_eq!(rejects[0].stage, "dimensions");
        assert!(!cache.path_for(&url).exists());
    }

    #[tokio::test]
    async fn html_content_type_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notimage"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>not found</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |_| {});
        let url = format!("{}/notimage", server.uri());

        assert!(cache.fetch_and_cache(&url).await.is_none());
        assert_eq!(cache.rejects()[0].stage, "content_type");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        let body = png_bytes(640, 360);
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(body),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |cfg| cfg.max_bytes = 100);
        let url = format!("{}/big.png", server.uri());

        assert!(cache.fetch_and_cache(&url).await.is_none());
        assert_eq!(cache.rejects()[0].stage, "size");
    }

    #[tokio::test]
    async fn stale_entry_revalidates_with_conditional_request() {
        use wiremock::matchers::header;

        let server = MockServer::start().await;
        // Mounted first so the conditional retry matches here, not below.
        Mock::given(method("GET"))
            .and(path("/lead.png"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lead.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .insert_header("ETag", "\"v1\"")
                    .set_body_bytes(png_bytes(640, 360)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |cfg| cfg.revalidate_after_hours = 0);
        let url = format!("{}/lead.png", server.uri());

        let first = cache.fetch_and_cache(&url).await.unwrap();
        let second = cache.fetch_and_cache(&url).await.unwrap();
        assert_eq!(first, second);

        // The 304 refreshed the sidecar without dropping the validators.
        let sidecar: ImageMeta = serde_json::from_slice(
            &std::fs::read(cache.path_for(&url).with_extension("json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn stale_entry_is_refetched() {
        let served = png_bytes(640, 360);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lead.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(served),
            )
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, |cfg| cfg.revalidate_after_hours = 0);
        let url = format!("{}/lead.png", server.uri());

        cache.fetch_and_cache(&url).await.unwrap();
        cache.fetch_and_cache(&url).await.unwrap();
    }
}
