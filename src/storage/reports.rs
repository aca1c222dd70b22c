use uuid::Uuid;

use crate::model::{ReviewStatus, SpamReport};

use super::schema::Database;
use super::types::{review_status_str, to_ts, DatabaseError, SpamReportRow};

impl Database {
    // ========================================================================
    // Spam Report Operations
    // ========================================================================

    /// Append one spam verdict for the audit trail.
    pub async fn insert_spam_report(&self, report: &SpamReport) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO spam_reports
                (article_id, spam_probability, signals, recommendation, review_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(report.article_id.to_string())
        .bind(report.spam_probability)
        .bind(serde_json::to_string(&report.signals)?)
        .bind(report.recommendation.as_str())
        .bind(review_status_str(report.review_status))
        .bind(to_ts(report.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reports for one article, newest first.
    pub async fn reports_for_article(
        &self,
        article_id: Uuid,
    ) -> Result<Vec<SpamReport>, DatabaseError> {
        let rows: Vec<SpamReportRow> = sqlx::query_as(
            r#"
            SELECT article_id, spam_probability, signals, recommendation, review_status, created_at
            FROM spam_reports
            WHERE article_id = ?
            ORDER BY created_at DESC, id DESC
        "#,
        )
        .bind(article_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SpamReportRow::into_report).collect()
    }

    /// Manual review override. Only `review_status` moves; the computed
    /// signals and probability stay exactly as the filter produced them.
    pub async fn set_review_status(
        &self,
        article_id: Uuid,
        status: ReviewStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE spam_reports SET review_status = ?
            WHERE id = (
                SELECT id FROM spam_reports
                WHERE article_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            )
        "#,
        )
        .bind(review_status_str(status))
        .bind(article_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Recommendation, SpamSignal};
    use chrono::Utc;

    fn sample_report(article_id: Uuid) -> SpamReport {
        SpamReport {
            article_id,
            spam_probability: 0.67,
            signals: vec![SpamSignal {
                signal_type: "promotional".into(),
                confidence: 0.9,
                reason: "3 promotional phrase(s)".into(),
            }],
            recommendation: Recommendation::Review,
            review_status: ReviewStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn override_moves_status_but_not_signals() {
        let db = Database::open(":memory:").await.unwrap();
        let article_id = Uuid::new_v4();
        db.insert_spam_report(&sample_report(article_id))
            .await
            .unwrap();

        db.set_review_status(article_id, ReviewStatus::FalsePositive)
            .await
            .unwrap();

        let reports = db.reports_for_article(article_id).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].review_status, ReviewStatus::FalsePositive);
        // computed verdict untouched
        assert_eq!(reports[0].spam_probability, 0.67);
        assert_eq!(reports[0].recommendation, Recommendation::Review);
        assert_eq!(reports[0].signals[0].signal_type, "promotional");
    }

    #[tokio::test]
    async fn override_targets_the_latest_report() {
        let db = Database::open(":memory:").await.unwrap();
        let article_id = Uuid::new_v4();

        let mut first = sample_report(article_id);
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        db.insert_spam_report(&first).await.unwrap();
        db.insert_spam_report(&sample_report(article_id)).await.unwrap();

        db.set_review_status(article_id, ReviewStatus::Confirmed)
            .await
            .unwrap();

        let reports = db.reports_for_article(article_id).await.unwrap();
        assert_eq!(reports[0].review_status, ReviewStatus::Confirmed);
        assert_eq!(reports[1].review_status, ReviewStatus::Pending);
    }
}
