use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. pragma() on the options makes every
        // pooled connection inherit the setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers peak concurrent
        // readers (pipeline stores + review queries).
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op; a failure mid-way rolls the schema back to its
    /// previous consistent state.
    async fn migrate(&self) -> Result<()> {
        // Per-connection setting, must run outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                canonical_url TEXT NOT NULL,
                title TEXT NOT NULL,
                source_name TEXT NOT NULL,
                full_text TEXT,
                full_html TEXT,
                content_hash TEXT NOT NULL,
                simhash INTEGER NOT NULL DEFAULT 0,
                language TEXT,
                authors TEXT NOT NULL DEFAULT '[]',
                extraction_status TEXT NOT NULL DEFAULT 'pending',
                extraction_error TEXT,
                top_image TEXT,
                score_total INTEGER NOT NULL DEFAULT 0,
                subscores TEXT NOT NULL DEFAULT '{}',
                topics TEXT NOT NULL DEFAULT '[]',
                entities TEXT NOT NULL DEFAULT '[]',
                flags TEXT NOT NULL DEFAULT '[]',
                spam_probability REAL NOT NULL DEFAULT 0,
                content_quality_score REAL NOT NULL DEFAULT 1,
                story_id TEXT,
                published_at INTEGER,
                created_at INTEGER NOT NULL,
                extracted_at INTEGER,
                scored_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stories (
                id TEXT PRIMARY KEY,
                canonical_title TEXT NOT NULL,
                best_image TEXT,
                members TEXT NOT NULL DEFAULT '[]',
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                article_count INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_attempts (
                id INTEGER PRIMARY KEY,
                article_id TEXT NOT NULL,
                attempted_at INTEGER NOT NULL,
                success INTEGER NOT NULL,
                failure_reason TEXT,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                http_status INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spam_reports (
                id INTEGER PRIMARY KEY,
                article_id TEXT NOT NULL,
                spam_probability REAL NOT NULL,
                signals TEXT NOT NULL DEFAULT '[]',
                recommendation TEXT NOT NULL,
                review_status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Ranked listing and story lookups are the hot read paths
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_score ON articles(score_total DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_story ON articles(story_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_hash ON articles(content_hash)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stories_last_seen ON stories(last_seen DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attempts_article ON extraction_attempts(article_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reports_article ON spam_reports(article_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
