//! SQLite persistence for pipeline output.
//!
//! `Database` is the durable [`Sink`] implementation: articles, story
//! clusters, the append-only extraction attempt log, and spam reports
//! (with their manual review overrides).

mod articles;
mod reports;
mod schema;
mod stories;
mod types;

use async_trait::async_trait;

use crate::model::{Article, ExtractionAttempt, SpamReport, Story};
use crate::pipeline::Sink;

pub use schema::Database;
pub use types::DatabaseError;

#[async_trait]
impl Sink for Database {
    async fn find_article(&self, entry_id: &str) -> anyhow::Result<Option<Article>> {
        Ok(self.get_article_by_entry(entry_id).await?)
    }

    async fn store_article(&self, article: &Article) -> anyhow::Result<()> {
        self.upsert_article(article).await?;
        Ok(())
    }

    async fn store_attempt(&self, attempt: &ExtractionAttempt) -> anyhow::Result<()> {
        self.record_attempt(attempt).await?;
        Ok(())
    }

    async fn store_spam_report(&self, report: &SpamReport) -> anyhow::Result<()> {
        self.insert_spam_report(report).await?;
        Ok(())
    }

    async fn store_story(&self, story: &Story) -> anyhow::Result<()> {
        self.upsert_story(story).await?;
        Ok(())
    }
}
