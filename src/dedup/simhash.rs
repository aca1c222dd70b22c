//! 64-bit SimHash over token shingles.
//!
//! Near-identical texts produce signatures within a small Hamming distance
//! of each other; unrelated texts land far apart with high probability.

use sha2::{Digest, Sha256};

/// Shingle width in tokens. Two-token shingles keep word order relevant
/// without making the signature brittle to single-word edits.
const SHINGLE_SIZE: usize = 2;

/// Compute the near-duplicate signature for a text.
///
/// Tokens are lower-cased alphanumeric runs; each `SHINGLE_SIZE`-token
/// shingle votes its 64 hash bits into a weight vector, and the sign of
/// each accumulated weight becomes one bit of the signature. Empty or
/// single-token input falls back to hashing the tokens it has.
pub fn near_duplicate_signature(text: &str) -> u64 {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();

    if tokens.is_empty() {
        return 0;
    }

    let mut weights = [0i32; 64];
    let mut vote = |feature: &str| {
        let h = hash64(feature);
        for (bit, w) in weights.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *w += 1;
            } else {
                *w -= 1;
            }
        }
    };

    if tokens.len() < SHINGLE_SIZE {
        for t in &tokens {
            vote(t);
        }
    } else {
        for shingle in tokens.windows(SHINGLE_SIZE) {
            vote(&shingle.join(" "));
        }
    }

    let mut signature = 0u64;
    for (bit, w) in weights.iter().enumerate() {
        if *w > 0 {
            signature |= 1 << bit;
        }
    }
    signature
}

/// Number of differing bits between two signatures.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn hash64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().expect("sha256 is at least 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "Central bank raises interest rates amid inflation \
        concerns as markets react to the announcement";

    #[test]
    fn identical_text_identical_signature() {
        assert_eq!(
            near_duplicate_signature(ARTICLE),
            near_duplicate_signature(ARTICLE)
        );
    }

    #[test]
    fn one_word_change_stays_near() {
        let edited = ARTICLE.replace("markets", "investors");
        let d = hamming_distance(
            near_duplicate_signature(ARTICLE),
            near_duplicate_signature(&edited),
        );
        assert!(d <= 10, "one-word edit drifted {d} bits");
    }

    #[test]
    fn unrelated_text_lands_far() {
        let other = "Local bakery wins regional pastry competition with \
            sourdough croissant entry delighting judges";
        let d = hamming_distance(
            near_duplicate_signature(ARTICLE),
            near_duplicate_signature(other),
        );
        assert!(d > 10, "unrelated texts only {d} bits apart");
    }

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(near_duplicate_signature(""), 0);
        assert_eq!(near_duplicate_signature("   ...   "), 0);
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        assert_eq!(
            near_duplicate_signature("Breaking: Rates Up!"),
            near_duplicate_signature("breaking rates up")
        );
    }
}
