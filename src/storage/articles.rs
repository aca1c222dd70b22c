use uuid::Uuid;

use crate::model::{Article, ExtractionAttempt};

use super::schema::Database;
use super::types::{opt_ts, to_ts, ArticleRow, AttemptRow, DatabaseError};

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Upsert an article keyed by its feed `entry_id`.
    ///
    /// Re-processing the same entry updates every pipeline-owned field in
    /// place; the surrogate `id` of the first sighting is preserved.
    pub async fn upsert_article(&self, article: &Article) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO articles (
                id, entry_id, canonical_url, title, source_name,
                full_text, full_html, content_hash, simhash, language, authors,
                extraction_status, extraction_error, top_image,
                score_total, subscores, topics, entities, flags,
                spam_probability, content_quality_score, story_id,
                published_at, created_at, extracted_at, scored_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entry_id) DO UPDATE SET
                canonical_url = excluded.canonical_url,
                title = excluded.title,
                full_text = excluded.full_text,
                full_html = excluded.full_html,
                content_hash = excluded.content_hash,
                simhash = excluded.simhash,
                language = excluded.language,
                authors = excluded.authors,
                extraction_status = excluded.extraction_status,
                extraction_error = excluded.extraction_error,
                top_image = excluded.top_image,
                score_total = excluded.score_total,
                subscores = excluded.subscores,
                topics = excluded.topics,
                entities = excluded.entities,
                flags = excluded.flags,
                spam_probability = excluded.spam_probability,
                content_quality_score = excluded.content_quality_score,
                story_id = excluded.story_id,
                published_at = excluded.published_at,
                extracted_at = excluded.extracted_at,
                scored_at = excluded.scored_at
        "#,
        )
        .bind(article.id.to_string())
        .bind(&article.entry_id)
        .bind(&article.canonical_url)
        .bind(&article.title)
        .bind(&article.source_name)
        .bind(&article.full_text)
        .bind(&article.full_html)
        .bind(&article.content_hash)
        .bind(article.simhash as i64)
        .bind(&article.language)
        .bind(serde_json::to_string(&article.authors)?)
        .bind(article.extraction_status.as_str())
        .bind(&article.extraction_error)
        .bind(
            article
                .top_image
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(article.score_total)
        .bind(serde_json::to_string(&article.subscores)?)
        .bind(serde_json::to_string(&article.topics)?)
        .bind(serde_json::to_string(&article.entities)?)
        .bind(serde_json::to_string(&article.flags)?)
        .bind(article.spam_probability)
        .bind(article.content_quality_score)
        .bind(article.story_id.map(|id| id.to_string()))
        .bind(opt_ts(article.published_at))
        .bind(to_ts(article.created_at))
        .bind(opt_ts(article.extracted_at))
        .bind(opt_ts(article.scored_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one article by its feed entry id.
    pub async fn get_article_by_entry(
        &self,
        entry_id: &str,
    ) -> Result<Option<Article>, DatabaseError> {
        let row: Option<ArticleRow> =
            sqlx::query_as("SELECT * FROM articles WHERE entry_id = ?")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ArticleRow::into_article).transpose()
    }

    /// Ranked listing, highest score first. Buried spam sorts to the
    /// bottom naturally; it is stored, not deleted.
    pub async fn top_articles(&self, limit: i64) -> Result<Vec<Article>, DatabaseError> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT * FROM articles ORDER BY score_total DESC, published_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    /// All articles clustered into one story.
    pub async fn articles_for_story(
        &self,
        story_id: Uuid,
    ) -> Result<Vec<Article>, DatabaseError> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT * FROM articles WHERE story_id = ? ORDER BY published_at ASC",
        )
        .bind(story_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    // ========================================================================
    // Extraction Attempt Operations
    // ========================================================================

    /// Append one fetch attempt. The attempt log is append-only.
    pub async fn record_attempt(
        &self,
        attempt: &ExtractionAttempt,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO extraction_attempts
                (article_id, attempted_at, success, failure_reason, latency_ms, http_status)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(attempt.article_id.to_string())
        .bind(to_ts(attempt.attempted_at))
        .bind(attempt.success)
        .bind(&attempt.failure_reason)
        .bind(attempt.latency_ms as i64)
        .bind(attempt.http_status.map(|s| s as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attempt history for one article, oldest first.
    pub async fn attempts_for_article(
        &self,
        article_id: Uuid,
    ) -> Result<Vec<ExtractionAttempt>, DatabaseError> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            r#"
            SELECT article_id, attempted_at, success, failure_reason, latency_ms, http_status
            FROM extraction_attempts
            WHERE article_id = ?
            ORDER BY attempted_at ASC, id ASC
        "#,
        )
        .bind(article_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttemptRow::into_attempt).collect())
    }
}
