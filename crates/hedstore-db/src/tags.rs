//! Tag repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::trace;
use uuid::Uuid;

use hedstore_core::{Error, NewTag, Result, TagRecord, TagRepository};

const TAG_COLUMNS: &str = "tag_uuid, tag_pathname, tag_parent_uuid, tag_description, tag_count, \
     tag_owner_email, tag_creation, tag_last_modified";

fn tag_from_row(row: &PgRow) -> TagRecord {
    TagRecord {
        id: row.get("tag_uuid"),
        pathname: row.get("tag_pathname"),
        parent_id: row.get("tag_parent_uuid"),
        description: row.get("tag_description"),
        count: row.get("tag_count"),
        owner: row.get("tag_owner_email"),
        created_at: row.get("tag_creation"),
        last_modified: row.get("tag_last_modified"),
    }
}

/// PostgreSQL implementation of TagRepository.
#[derive(Clone)]
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    /// Create a new PgTagRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn insert(&self, tag: NewTag) -> Result<Uuid> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tags (tag_uuid, tag_pathname, tag_parent_uuid, tag_description,
                              tag_count, tag_creation, tag_last_modified, tag_owner_email)
            VALUES ($1, $2, $3, $4, 0, $5, $5, $6)
            "#,
        )
        .bind(tag.id)
        .bind(&tag.pathname)
        .bind(tag.parent_id)
        .bind(&tag.description)
        .bind(now)
        .bind(&tag.owner)
        .execute(&self.pool)
        .await
        .map_err(Error::persistence("insert tag"))?;

        trace!(
            subsystem = "db",
            component = "tags",
            op = "insert",
            tag_id = %tag.id,
            pathname = %tag.pathname,
            "Inserted tag"
        );
        Ok(tag.id)
    }

    async fn fetch_by_pathname(&self, pathname: &str) -> Result<TagRecord> {
        self.find_by_pathname(pathname)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tag {}", pathname)))
    }

    async fn find_by_pathname(&self, pathname: &str) -> Result<Option<TagRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tags WHERE tag_pathname = $1",
            TAG_COLUMNS
        ))
        .bind(pathname)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::persistence("fetch tag by pathname"))?;

        Ok(row.as_ref().map(tag_from_row))
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<TagRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tags WHERE tag_uuid = $1",
            TAG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::persistence("fetch tag by id"))?;

        row.as_ref()
            .map(tag_from_row)
            .ok_or_else(|| Error::NotFound(format!("Tag {}", id)))
    }

    async fn child_ids(&self, parent: Option<Uuid>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT tag_uuid FROM tags WHERE tag_parent_uuid IS NOT DISTINCT FROM $1 ORDER BY tag_seq",
        )
        .bind(parent)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::persistence("fetch children"))?;

        Ok(ids)
    }

    async fn increment_count(&self, pathname: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE tags SET tag_count = tag_count + 1 WHERE tag_pathname = $1")
            .bind(pathname)
            .execute(&self.pool)
            .await
            .map_err(Error::persistence("increment count"))?;

        Ok(result.rows_affected())
    }

    async fn update_description(&self, pathname: &str, description: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE tags SET tag_description = $1 WHERE tag_pathname = $2")
            .bind(description)
            .bind(pathname)
            .execute(&self.pool)
            .await
            .map_err(Error::persistence("update description"))?;

        Ok(result.rows_affected())
    }

    async fn touch_last_modified(&self, id: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE tags SET tag_last_modified = $1 WHERE tag_uuid = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::persistence("touch last modified"))?;

        Ok(result.rows_affected())
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::persistence("count tags"))?;

        Ok(count)
    }
}
