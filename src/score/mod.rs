//! Explainable multi-factor relevance scoring.
//!
//! `score` is a pure function: the clock is an explicit argument and every
//! component lands in the subscore map, so any total can be reconstructed
//! from its breakdown. Decay applies to the content-derived components
//! only; flat bonuses are added afterwards so an old article with a good
//! image still gets its bonus undiminished.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{ScoringConfig, SpamConfig};
use crate::model::Recommendation;
use crate::spam::SpamVerdict;

/// Everything the scorer is allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub source: &'a str,
    pub published_at: Option<DateTime<Utc>>,
    pub has_image: bool,
}

/// The total plus every component that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub total: i64,
    pub subscores: BTreeMap<String, f64>,
    /// Keywords that matched, for topic tagging.
    pub topics: Vec<String>,
    /// Watchlist entities that matched.
    pub entities: Vec<String>,
    /// hot / interesting / watch:<entity> labels.
    pub flags: Vec<String>,
}

/// Scale for the soft penalty applied in the review band: a borderline
/// probability of 1.0 would cost this many points.
const REVIEW_PENALTY_SCALE: f64 = 50.0;

pub fn score(input: &ScoreInput, cfg: &ScoringConfig, now: DateTime<Utc>) -> ScoreBreakdown {
    let haystack = format!("{} {}", input.title, input.content).to_lowercase();

    let mut subscores = BTreeMap::new();
    let mut topics = Vec::new();
    let mut entities = Vec::new();
    let mut flags = Vec::new();

    // Keywords, with logarithmic diminishing returns per term.
    let mut keyword_score = 0.0;
    let mut matched: Vec<(&String, f64)> = Vec::new();
    for (term, weight) in &cfg.keyword_weights {
        let n = haystack.matches(&term.to_lowercase()).count();
        if n > 0 {
            matched.push((term, weight * (1.0 + (n as f64).ln())));
        }
    }
    matched.sort_by(|a, b| a.0.cmp(b.0));
    for (term, contribution) in matched {
        keyword_score += contribution;
        topics.push(term.clone());
    }
    subscores.insert("keywords".to_string(), keyword_score);

    // Watchlist entities contribute flat weights and produce labels.
    let mut entity_score = 0.0;
    let mut watched: Vec<&String> = cfg
        .watchlist
        .iter()
        .chain(cfg.entity_weights.keys())
        .filter(|e| haystack.contains(&e.to_lowercase()))
        .collect();
    watched.sort();
    watched.dedup();
    for entity in watched {
        entity_score += cfg
            .entity_weights
            .get(entity)
            .copied()
            .unwrap_or(cfg.default_entity_weight);
        entities.push(entity.clone());
        flags.push(format!("watch:{entity}"));
    }
    subscores.insert("entities".to_string(), entity_score);

    let source_score = cfg.source_weights.get(input.source).copied().unwrap_or(0.0);
    subscores.insert("source".to_string(), source_score);

    // Age decay over the content components. Unknown publish time is
    // treated as fresh rather than penalized.
    let age_hours = input
        .published_at
        .map(|p| (now - p).num_minutes().max(0) as f64 / 60.0)
        .unwrap_or(0.0);
    let recency = 0.5_f64.powf(age_hours / cfg.half_life_hours);
    subscores.insert("recency_multiplier".to_string(), recency);

    let image_bonus = if input.has_image { cfg.image_bonus } else { 0.0 };
    subscores.insert("image_bonus".to_string(), image_bonus);

    let total_f = (keyword_score + entity_score + source_score) * recency + image_bonus;
    let total = total_f.round() as i64;

    if total >= cfg.hot_threshold {
        flags.push("hot".to_string());
    } else if total >= cfg.interesting_threshold {
        flags.push("interesting".to_string());
    }

    ScoreBreakdown {
        total,
        subscores,
        topics,
        entities,
        flags,
    }
}

/// Fold the spam verdict into an existing breakdown.
///
/// A reject-level verdict buries the article at the configured sentinel
/// (still stored, never deleted). The review band takes a soft penalty
/// proportional to the probability; accepted articles are untouched.
pub fn apply_spam_penalty(
    breakdown: &mut ScoreBreakdown,
    verdict: &SpamVerdict,
    cfg: &SpamConfig,
) {
    match verdict.recommendation {
        Recommendation::Reject => {
            let penalty = breakdown.total - cfg.spam_sentinel;
            breakdown
                .subscores
                .insert("spam_penalty".to_string(), -(penalty as f64));
            breakdown.total = cfg.spam_sentinel;
            breakdown.flags.retain(|f| f != "hot" && f != "interesting");
            breakdown.flags.push("spam".to_string());
        }
        Recommendation::Review => {
            let penalty = (verdict.spam_probability * REVIEW_PENALTY_SCALE).round() as i64;
            breakdown
                .subscores
                .insert("spam_penalty".to_string(), -(penalty as f64));
            breakdown.total -= penalty;
            breakdown.flags.push("needs-review".to_string());
        }
        Recommendation::Accept => {}
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spam;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn cfg_with_keyword(term: &str, weight: f64) -> ScoringConfig {
        let mut cfg = ScoringConfig::default();
        cfg.keyword_weights.insert(term.to_string(), weight);
        cfg
    }

    fn input<'a>(title: &'a str, content: &'a str) -> ScoreInput<'a> {
        ScoreInput {
            title,
            content,
            source: "example-news",
            published_at: None,
            has_image: false,
        }
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let cfg = cfg_with_keyword("merger", 15.0);
        let now = Utc::now();
        let i = ScoreInput {
            published_at: Some(now - Duration::hours(6)),
            has_image: true,
            ..input("Merger talks resume", "The merger was announced today.")
        };
        assert_eq!(score(&i, &cfg, now), score(&i, &cfg, now));
    }

    #[test]
    fn decay_is_monotonic_and_halves_at_half_life() {
        let cfg = cfg_with_keyword("outage", 40.0);
        let now = Utc::now();
        let at_age = |hours: i64| {
            let i = ScoreInput {
                published_at: Some(now - Duration::hours(hours)),
                ..input("Major outage", "An outage hit the region.")
            };
            score(&i, &cfg, now)
        };

        let fresh = at_age(0);
        let day = at_age(24);
        let two_days = at_age(48);
        assert!(fresh.total > day.total);
        assert!(day.total > two_days.total);

        let ratio = day.total as f64 / fresh.total as f64;
        assert!((0.4..=0.6).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn repeated_keyword_diminishes() {
        let cfg = cfg_with_keyword("payment", 20.0);
        let once = score(&input("payment", ""), &cfg, Utc::now());
        let four = score(&input("payment payment payment payment", ""), &cfg, Utc::now());

        let single = once.subscores["keywords"];
        let repeated = four.subscores["keywords"];
        assert!(repeated > single);
        assert!(repeated < 4.0 * single);
    }

    #[test]
    fn six_payment_mentions_stay_below_sixty() {
        let mut cfg = cfg_with_keyword("payment", 20.0);
        cfg.source_weights.insert("trusted-wire".to_string(), 10.0);

        let i = ScoreInput {
            source: "trusted-wire",
            published_at: Some(Utc::now()),
            ..input(
                "Payment payment payment payment",
                "Payment systems for payment processing",
            )
        };
        let breakdown = score(&i, &cfg, Utc::now());
        let keywords = breakdown.subscores["keywords"];
        assert!(keywords < 60.0, "keyword subscore {keywords}");
        // a naive linear rule would have given 6 * 20 = 120
    }

    #[test]
    fn watchlist_entities_flag_and_weigh() {
        let mut cfg = ScoringConfig::default();
        cfg.watchlist.push("Acme Corp".to_string());
        cfg.entity_weights.insert("Globex".to_string(), 25.0);

        let breakdown = score(
            &input("Acme Corp sues Globex", "Filing was made Tuesday."),
            &cfg,
            Utc::now(),
        );
        assert_eq!(breakdown.entities, vec!["Acme Corp", "Globex"]);
        assert!(breakdown.flags.contains(&"watch:Acme Corp".to_string()));
        assert!(breakdown.flags.contains(&"watch:Globex".to_string()));
        // default weight for Acme, override for Globex
        assert_eq!(breakdown.subscores["entities"], 10.0 + 25.0);
    }

    #[test]
    fn unknown_source_scores_zero() {
        let mut cfg = ScoringConfig::default();
        cfg.source_weights.insert("trusted-wire".to_string(), 10.0);
        let breakdown = score(&input("t", "c"), &cfg, Utc::now());
        assert_eq!(breakdown.subscores["source"], 0.0);
    }

    #[test]
    fn image_bonus_is_not_decayed() {
        let cfg = cfg_with_keyword("launch", 30.0);
        let now = Utc::now();
        let old = |has_image: bool| {
            let i = ScoreInput {
                published_at: Some(now - Duration::hours(96)),
                has_image,
                ..input("Launch day", "The launch went ahead.")
            };
            score(&i, &cfg, now).total
        };
        // the bonus survives four days of decay intact
        assert_eq!(old(true) - old(false), 3);
    }

    #[test]
    fn thresholds_label_hot_and_interesting() {
        let mut cfg = cfg_with_keyword("breach", 90.0);
        let hot = score(&input("Data breach", ""), &cfg, Utc::now());
        assert!(hot.flags.contains(&"hot".to_string()));

        cfg.keyword_weights.insert("breach".to_string(), 65.0);
        let interesting = score(&input("Data breach", ""), &cfg, Utc::now());
        assert!(interesting.flags.contains(&"interesting".to_string()));
        assert!(!interesting.flags.contains(&"hot".to_string()));
    }

    #[test]
    fn reject_verdict_buries_at_sentinel() {
        let scoring = cfg_with_keyword("breach", 90.0);
        let spam_cfg = SpamConfig::default();
        let mut breakdown = score(&input("Data breach", ""), &scoring, Utc::now());
        assert!(breakdown.total >= 80);

        let verdict = spam::detect(
            "You won't believe this one trick for savings",
            "BUY NOW! Limited time offer, 50% off everything. Click here for your promo code. \
             Free shipping on all orders, act now before the sale ends.",
            "spam-blog",
            &spam_cfg,
        );
        apply_spam_penalty(&mut breakdown, &verdict, &spam_cfg);

        assert_eq!(breakdown.total, -1000);
        assert!(breakdown.flags.contains(&"spam".to_string()));
        assert!(!breakdown.flags.contains(&"hot".to_string()));
    }

    #[test]
    fn review_band_takes_a_soft_penalty() {
        let scoring = cfg_with_keyword("breach", 90.0);
        let spam_cfg = SpamConfig {
            review_threshold: 0.1,
            ..SpamConfig::default()
        };
        let mut breakdown = score(&input("Data breach", ""), &scoring, Utc::now());
        let before = breakdown.total;

        let verdict = spam::detect(
            "Weekend discount on data breach coverage",
            "A discount retailer disclosed a breach of its payment systems affecting \
             customers across several regions, the company said in a filing on Friday. \
             Investigators believe attackers had access for weeks before detection.",
            "example-news",
            &spam_cfg,
        );
        assert_eq!(verdict.recommendation, Recommendation::Review);

        apply_spam_penalty(&mut breakdown, &verdict, &spam_cfg);
        assert!(breakdown.total < before);
        assert!(breakdown.total > spam_cfg.spam_sentinel);
        assert!(breakdown.flags.contains(&"needs-review".to_string()));
    }
}
