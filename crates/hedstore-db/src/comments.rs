//! Tag comment repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::trace;
use uuid::Uuid;

use hedstore_core::{
    CommentRecord, CommentRepository, Error, NewComment, Result, TagComment,
};

/// PostgreSQL implementation of CommentRepository.
#[derive(Clone)]
pub struct PgCommentRepository {
    pool: Pool<Postgres>,
}

impl PgCommentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentRepository for PgCommentRepository {
    async fn insert(&self, comment: NewComment) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO tag_comments (tag_comment_uuid, tag_comment_tag_uuid, tag_comment_date,
                                      tag_comment_author, tag_comment_text)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(comment.tag_id)
        .bind(comment.date)
        .bind(&comment.author)
        .bind(&comment.text)
        .execute(&self.pool)
        .await
        .map_err(Error::persistence("insert comment"))?;

        sqlx::query("UPDATE tags SET tag_last_modified = $1 WHERE tag_uuid = $2")
            .bind(Utc::now())
            .bind(comment.tag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::persistence("touch last modified"))?;

        trace!(
            subsystem = "db",
            component = "comments",
            op = "insert",
            tag_id = %comment.tag_id,
            "Inserted comment"
        );
        Ok(id)
    }

    async fn insert_by_pathname(&self, pathname: &str, comment: &TagComment) -> Result<Uuid> {
        let tag_id: Option<Uuid> =
            sqlx::query_scalar("SELECT tag_uuid FROM tags WHERE tag_pathname = $1")
                .bind(pathname)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::persistence("fetch tag by pathname"))?;

        let tag_id = tag_id.ok_or_else(|| Error::NotFound(format!("Tag {}", pathname)))?;
        self.insert(NewComment::from_comment(tag_id, comment)).await
    }

    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<CommentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tag_comment_uuid, tag_comment_tag_uuid, tag_comment_date,
                   tag_comment_author, tag_comment_text
            FROM tag_comments
            WHERE tag_comment_tag_uuid = $1
            ORDER BY tag_comment_seq
            "#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::persistence("fetch comments"))?;

        Ok(rows
            .into_iter()
            .map(|row| CommentRecord {
                id: row.get("tag_comment_uuid"),
                tag_id: row.get("tag_comment_tag_uuid"),
                date: row.get("tag_comment_date"),
                author: row.get("tag_comment_author"),
                text: row.get("tag_comment_text"),
            })
            .collect())
    }
}
