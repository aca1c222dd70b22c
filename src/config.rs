//! Configuration file parser for the pipeline (`newsmill.toml`).
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Every section uses `#[serde(default)]` so any subset of keys can be
//! specified; unknown top-level sections are logged as probable typos.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub image: ImageConfig,
    pub scoring: ScoringConfig,
    pub spam: SpamConfig,
    pub dedup: DedupConfig,
}

/// Content extraction service knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Process-wide bound on concurrent page fetches.
    pub max_concurrent: usize,
    /// Per-domain request budget in requests per second.
    pub per_domain_rate_limit: f64,
    /// Retry budget for transient failures.
    pub max_retries: u32,
    /// Read timeout per request, seconds. Connect timeout is fixed lower.
    pub timeout_secs: u64,
    /// How long a cached robots.txt answer stays valid.
    pub robots_ttl_hours: u64,
    /// Base unit for exponential backoff: attempt n sleeps `2^n * base`.
    pub backoff_base_ms: u64,
    pub user_agent: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            per_domain_rate_limit: 1.0,
            max_retries: 3,
            timeout_secs: 20,
            robots_ttl_hours: 24,
            backoff_base_ms: 1000,
            user_agent: concat!("newsmill/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Image pipeline knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub cache_dir: PathBuf,
    /// Reject payloads larger than this many bytes.
    pub max_bytes: usize,
    pub min_width: u32,
    pub min_height: u32,
    /// Cache entries older than this are revalidated, not trusted.
    pub revalidate_after_hours: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("image-cache"),
            max_bytes: 5 * 1024 * 1024,
            min_width: 320,
            min_height: 180,
            revalidate_after_hours: 168,
        }
    }
}

/// Relevance scoring weights and thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Case-insensitive keyword -> weight.
    pub keyword_weights: HashMap<String, f64>,
    /// Entities to watch for; matches are flagged `watch:<entity>`.
    pub watchlist: Vec<String>,
    /// Watchlisted entity -> weight override.
    pub entity_weights: HashMap<String, f64>,
    /// Weight for watchlisted entities without an override.
    pub default_entity_weight: f64,
    /// Source reputation tiers; unknown sources score 0.
    pub source_weights: HashMap<String, f64>,
    pub half_life_hours: f64,
    pub hot_threshold: i64,
    pub interesting_threshold: i64,
    /// Flat bonus for having a usable image; added after decay.
    pub image_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weights: HashMap::new(),
            watchlist: Vec::new(),
            entity_weights: HashMap::new(),
            default_entity_weight: 10.0,
            source_weights: HashMap::new(),
            half_life_hours: 24.0,
            hot_threshold: 80,
            interesting_threshold: 60,
            image_bonus: 3.0,
        }
    }
}

/// Spam filter aggregation weights and recommendation thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// signal family -> weight in the probability aggregate.
    pub signal_weights: HashMap<String, f64>,
    /// Probability at or above which the verdict is Review.
    pub review_threshold: f64,
    /// Probability at or above which the verdict is Reject.
    pub reject_threshold: f64,
    /// Score assigned to rejected articles (buried, not deleted).
    pub spam_sentinel: i64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            signal_weights: HashMap::new(),
            review_threshold: 0.5,
            reject_threshold: 0.8,
            spam_sentinel: -1000,
        }
    }
}

/// Near-duplicate clustering knobs. Both values are empirically tuned;
/// treat them as configuration, not constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Stories older than this trailing window are not scanned.
    pub window_days: i64,
    /// Maximum Hamming distance between simhashes to merge.
    pub hamming_threshold: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            hamming_threshold: 10,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown sections → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to flag unknown sections
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known = ["extraction", "image", "scoring", "spam", "dedup"];
            for key in raw.keys() {
                if !known.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown section in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
