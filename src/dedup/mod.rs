//! Canonicalization and near-duplicate story clustering.
//!
//! Identity for an article is established in layers: the canonical URL
//! (tracking parameters stripped), an exact content fingerprint, and a
//! 64-bit SimHash for near-duplicate matching. `StoryIndex` groups articles
//! from independent publishers into Story clusters using those keys in two
//! phases — a cheap pre-dedup at ingestion and a refinement pass after full
//! content is available.

mod canonical;
mod cluster;
mod simhash;

pub use canonical::{content_fingerprint, normalize_url};
pub use cluster::StoryIndex;
pub use simhash::{hamming_distance, near_duplicate_signature};
