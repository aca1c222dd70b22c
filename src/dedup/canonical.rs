//! URL and content canonicalization.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that carry tracking state, not identity.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "source"];

/// Normalize a URL into a stable identity key.
///
/// Strips tracking parameters (`utm_*`, `fbclid`, `gclid`, `ref`, `source`),
/// lower-cases scheme and host, drops default ports and fragments. Relative
/// URLs resolve against `base` when one is given. Idempotent: normalizing a
/// normalized URL is a no-op.
///
/// Returns `None` for input that cannot be parsed as an absolute URL even
/// after base resolution.
pub fn normalize_url(raw: &str, base: Option<&str>) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base?).ok()?;
            base.join(trimmed).ok()?
        }
        Err(_) => return None,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);

    // Url lower-cases scheme/host on parse; dropping the default port is
    // explicit because set_port refuses hosts it considers cannot-be-a-base.
    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    Some(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Exact-duplicate fingerprint: sha256 over lower-cased text with all
/// whitespace runs collapsed to single spaces.
pub fn content_fingerprint(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let hash = Sha256::digest(collapsed.as_bytes());
    format!("{:x}", hash)
}
