//! Interval-driven background runner.
//!
//! `watch` mode and one-shot `once` mode share the exact same batch code
//! path: a `FeedSource` collects items, the pipeline processes them.
//! Cancellation is an explicit watch channel, not a framework scheduler.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::ingest::fetch_feed;
use crate::model::FeedItem;
use crate::pipeline::{Pipeline, Sink};

/// Supplies a batch of items per cycle. One failing feed never fails the
/// collection; it is logged and the rest proceed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn collect(&self) -> anyhow::Result<Vec<FeedItem>>;
}

/// One subscribed feed.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub name: String,
    pub url: String,
}

impl FeedSpec {
    /// Parse `NAME=URL`, or a bare URL whose host becomes the name.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some((name, url)) = raw.split_once('=') {
            if url.contains("://") && !name.contains("://") {
                return Some(Self {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                });
            }
        }
        let url = url::Url::parse(raw.trim()).ok()?;
        let name = url.host_str()?.to_string();
        Some(Self {
            name,
            url: raw.trim().to_string(),
        })
    }
}

/// Pulls items from a fixed set of syndicated feeds over HTTP.
pub struct HttpFeedSource {
    client: reqwest::Client,
    feeds: Vec<FeedSpec>,
}

impl HttpFeedSource {
    pub fn new(user_agent: &str, feeds: Vec<FeedSpec>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client, feeds })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn collect(&self) -> anyhow::Result<Vec<FeedItem>> {
        let mut items = Vec::new();
        for feed in &self.feeds {
            match fetch_feed(&self.client, &feed.url, &feed.name).await {
                Ok(result) => {
                    tracing::debug!(
                        feed = %feed.name,
                        items = result.items.len(),
                        skipped = result.skipped,
                        "Feed collected"
                    );
                    items.extend(result.items);
                }
                Err(e) => {
                    tracing::warn!(feed = %feed.name, url = %feed.url, error = %e, "Feed fetch failed");
                }
            }
        }
        Ok(items)
    }
}

/// Run the pipeline on an interval until the shutdown flag flips.
///
/// Only systemic errors propagate; an empty collection simply skips the
/// cycle. The first tick fires immediately.
pub async fn run_interval<S: Sink, F: FeedSource>(
    pipeline: &Pipeline<S>,
    source: &F,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let items = match source.collect().await {
                    Ok(items) => items,
                    Err(e) => {
                        tracing::warn!(error = %e, "Collection cycle failed");
                        continue;
                    }
                };
                if items.is_empty() {
                    tracing::debug!("No items this cycle");
                    continue;
                }
                let outcome = pipeline.process_batch(items).await?;
                tracing::info!(
                    stored = outcome.stats.stored,
                    failures = outcome.failures.len(),
                    "Cycle complete"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Shutdown requested, stopping runner");
                    return Ok(());
                }
            }
        }
    }
}
