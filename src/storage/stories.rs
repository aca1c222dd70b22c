use uuid::Uuid;

use crate::model::Story;

use super::schema::Database;
use super::types::{to_ts, DatabaseError, StoryRow};

impl Database {
    // ========================================================================
    // Story Operations
    // ========================================================================

    /// Upsert one story cluster snapshot.
    pub async fn upsert_story(&self, story: &Story) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO stories
                (id, canonical_title, best_image, members, first_seen, last_seen,
                 confidence, article_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                canonical_title = excluded.canonical_title,
                best_image = excluded.best_image,
                members = excluded.members,
                last_seen = excluded.last_seen,
                confidence = excluded.confidence,
                article_count = excluded.article_count
        "#,
        )
        .bind(story.id.to_string())
        .bind(&story.canonical_title)
        .bind(
            story
                .best_image
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&story.members)?)
        .bind(to_ts(story.first_seen))
        .bind(to_ts(story.last_seen))
        .bind(story.confidence)
        .bind(story.article_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_story(&self, id: Uuid) -> Result<Option<Story>, DatabaseError> {
        let row: Option<StoryRow> = sqlx::query_as("SELECT * FROM stories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoryRow::into_story).transpose()
    }

    /// Stories seen most recently first.
    pub async fn recent_stories(&self, limit: i64) -> Result<Vec<Story>, DatabaseError> {
        let rows: Vec<StoryRow> =
            sqlx::query_as("SELECT * FROM stories ORDER BY last_seen DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(StoryRow::into_story).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryMember;
    use chrono::Utc;

    fn sample_story() -> Story {
        Story {
            id: Uuid::new_v4(),
            canonical_title: "Grid failure leaves millions without power".into(),
            best_image: None,
            members: vec![StoryMember {
                article_id: Uuid::new_v4(),
                source_name: "wire".into(),
            }],
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            confidence: 0.5,
            article_count: 1,
        }
    }

    #[tokio::test]
    async fn story_roundtrip_preserves_members() {
        let db = Database::open(":memory:").await.unwrap();
        let story = sample_story();
        db.upsert_story(&story).await.unwrap();

        let loaded = db.get_story(story.id).await.unwrap().unwrap();
        assert_eq!(loaded.canonical_title, story.canonical_title);
        assert_eq!(loaded.members.len(), 1);
        assert_eq!(loaded.members[0].article_id, story.members[0].article_id);
    }

    #[tokio::test]
    async fn merge_updates_count_not_identity() {
        let db = Database::open(":memory:").await.unwrap();
        let mut story = sample_story();
        db.upsert_story(&story).await.unwrap();

        story.members.push(StoryMember {
            article_id: Uuid::new_v4(),
            source_name: "other-wire".into(),
        });
        story.article_count = 2;
        db.upsert_story(&story).await.unwrap();

        let loaded = db.get_story(story.id).await.unwrap().unwrap();
        assert_eq!(loaded.article_count, 2);

        let all = db.recent_stories(10).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
