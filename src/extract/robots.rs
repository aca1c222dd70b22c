//! robots.txt parsing and TTL-cached per-domain compliance checks.
//!
//! The parser covers the de facto standard: user-agent groups, Allow and
//! Disallow prefix rules, longest-match-wins with Allow breaking ties. An
//! unreachable or missing robots.txt counts as allow — deny-closed would
//! silently drop every publisher with a broken robots endpoint.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;
use url::Url;

/// Upper bound on distinct domains kept in the robots cache.
const CACHE_CAPACITY: usize = 1024;

/// Size cap for a robots.txt body; anything larger is truncated.
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    prefix: String,
}

/// Parsed rules applicable to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    rules: Vec<Rule>,
}

impl RobotsTxt {
    /// Parse a robots.txt body, keeping the group that best matches
    /// `user_agent` (most specific token wins; `*` is the fallback group).
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let ua_lower = user_agent.to_lowercase();

        // (specificity, rules) for the best group seen so far. A group may
        // list several user-agent lines before its rules.
        let mut best: Option<(usize, Vec<Rule>)> = None;
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules: Vec<Rule> = Vec::new();
        let mut in_rules = false;

        let flush = |agents: &[String], rules: &mut Vec<Rule>, best: &mut Option<(usize, Vec<Rule>)>| {
            let specificity = agents
                .iter()
                .filter_map(|a| {
                    if a == "*" {
                        Some(0)
                    } else if ua_lower.contains(a.as_str()) {
                        Some(a.len())
                    } else {
                        None
                    }
                })
                .max();
            if let Some(s) = specificity {
                let better = best.as_ref().map(|(bs, _)| s > *bs).unwrap_or(true);
                if better {
                    *best = Some((s, std::mem::take(rules)));
                    return;
                }
            }
            rules.clear();
        };

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if in_rules {
                        flush(&current_agents, &mut current_rules, &mut best);
                        current_agents.clear();
                        in_rules = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" | "allow" => {
                    in_rules = true;
                    // An empty Disallow means "allow everything" and adds
                    // no rule; an empty Allow is meaningless.
                    if !value.is_empty() {
                        current_rules.push(Rule {
                            allow: field == "allow",
                            prefix: value.to_string(),
                        });
                    }
                }
                _ => {} // crawl-delay, sitemap, unknown fields
            }
        }
        flush(&current_agents, &mut current_rules, &mut best);

        Self {
            rules: best.map(|(_, r)| r).unwrap_or_default(),
        }
    }

    /// An instance that allows every path (no applicable rules).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether the given path may be fetched. Longest matching prefix
    /// decides; Allow wins a length tie.
    pub fn is_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        let mut verdict = true;
        let mut best_len = 0usize;
        for rule in &self.rules {
            if path.starts_with(&rule.prefix) {
                let len = rule.prefix.len();
                if len > best_len || (len == best_len && rule.allow) {
                    best_len = len;
                    verdict = rule.allow;
                }
            }
        }
        verdict
    }
}

// ============================================================================
// TTL cache
// ============================================================================

struct CachedRobots {
    fetched_at: Instant,
    robots: Arc<RobotsTxt>,
}

/// Read-through per-domain robots cache.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            ttl,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Whether `url` may be fetched under its domain's robots policy.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let key = match url.port() {
            Some(p) => format!("{}://{}:{}", url.scheme(), host, p),
            None => format!("{}://{}", url.scheme(), host),
        };

        let robots = self.lookup(&key).await;
        robots.is_allowed(url.path())
    }

    async fn lookup(&self, origin: &str) -> Arc<RobotsTxt> {
        {
            let mut entries = self.entries.lock().await;
            if let Some(cached) = entries.get(origin) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Arc::clone(&cached.robots);
                }
            }
        }

        // Fetch outside the lock; a racing refresh of the same domain is
        // harmless (both produce equivalent entries).
        let robots = Arc::new(self.fetch(origin).await);

        let mut entries = self.entries.lock().await;
        entries.put(
            origin.to_string(),
            CachedRobots {
                fetched_at: Instant::now(),
                robots: Arc::clone(&robots),
            },
        );
        robots
    }

    async fn fetch(&self, origin: &str) -> RobotsTxt {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(mut body) => {
                    if body.len() > MAX_ROBOTS_BYTES {
                        body.truncate(MAX_ROBOTS_BYTES);
                    }
                    tracing::debug!(origin = origin, "Fetched robots.txt");
                    RobotsTxt::parse(&body, &self.user_agent)
                }
                Err(e) => {
                    tracing::debug!(origin = origin, error = %e, "robots.txt body read failed, allowing");
                    RobotsTxt::allow_all()
                }
            },
            Ok(resp) => {
                tracing::debug!(
                    origin = origin,
                    status = resp.status().as_u16(),
                    "robots.txt not available, allowing"
                );
                RobotsTxt::allow_all()
            }
            Err(e) => {
                tracing::debug!(origin = origin, error = %e, "robots.txt fetch failed, allowing");
                RobotsTxt::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "\
User-agent: *
Disallow: /private/
Allow: /private/press/
Disallow: /tmp
";

    #[test]
    fn disallow_prefix_blocks() {
        let robots = RobotsTxt::parse(BASIC, "newsmill/0.1.0");
        assert!(!robots.is_allowed("/private/letters"));
        assert!(!robots.is_allowed("/tmp"));
        assert!(!robots.is_allowed("/tmpfiles")); // prefix match, per the standard
        assert!(robots.is_allowed("/public/story"));
    }

    #[test]
    fn longer_allow_overrides_disallow() {
        let robots = RobotsTxt::parse(BASIC, "newsmill/0.1.0");
        assert!(robots.is_allowed("/private/press/release"));
    }

    #[test]
    fn specific_group_beats_wildcard() {
        let body = "\
User-agent: *
Disallow: /

User-agent: newsmill
Disallow: /drafts/
";
        let robots = RobotsTxt::parse(body, "newsmill/0.1.0");
        assert!(robots.is_allowed("/story"));
        assert!(!robots.is_allowed("/drafts/1"));

        let stranger = RobotsTxt::parse(body, "otherbot/2.0");
        assert!(!stranger.is_allowed("/story"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n", "newsmill/0.1.0");
        assert!(robots.is_allowed("/anything"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let body = "\
# full-line comment
User-agent: * # trailing comment

Disallow: /secret # also here
";
        let robots = RobotsTxt::parse(body, "newsmill/0.1.0");
        assert!(!robots.is_allowed("/secret"));
        assert!(robots.is_allowed("/open"));
    }

    #[test]
    fn no_matching_group_allows() {
        let body = "User-agent: googlebot\nDisallow: /\n";
        let robots = RobotsTxt::parse(body, "newsmill/0.1.0");
        assert!(robots.is_allowed("/anything"));
    }

    #[tokio::test]
    async fn cache_hits_skip_the_network() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /no\n"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = RobotsCache::new(
            reqwest::Client::new(),
            "newsmill/0.1.0",
            Duration::from_secs(3600),
        );

        let allowed = Url::parse(&format!("{}/yes", server.uri())).unwrap();
        let blocked = Url::parse(&format!("{}/no/page", server.uri())).unwrap();

        assert!(cache.is_allowed(&allowed).await);
        assert!(!cache.is_allowed(&blocked).await);
        // second call for the same origin must be served from cache (expect(1))
        assert!(cache.is_allowed(&allowed).await);
    }

    #[tokio::test]
    async fn missing_robots_txt_allows() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = RobotsCache::new(
            reqwest::Client::new(),
            "newsmill/0.1.0",
            Duration::from_secs(3600),
        );
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        assert!(cache.is_allowed(&url).await);
    }
}
