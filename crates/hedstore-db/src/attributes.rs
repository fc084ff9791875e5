//! Tag attribute repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use hedstore_core::{AttributeRecord, AttributeRepository, Error, NewAttribute, Result};

/// PostgreSQL implementation of AttributeRepository.
#[derive(Clone)]
pub struct PgAttributeRepository {
    pool: Pool<Postgres>,
}

impl PgAttributeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttributeRepository for PgAttributeRepository {
    /// Insert an attribute and touch the owning tag.
    async fn insert(&self, attribute: NewAttribute) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO tag_attributes (tag_attribute_uuid, tag_attribute_tag_uuid,
                                        tag_attribute_name, tag_attribute_value)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(attribute.tag_id)
        .bind(&attribute.name)
        .bind(&attribute.value)
        .execute(&self.pool)
        .await
        .map_err(Error::persistence("insert attribute"))?;

        sqlx::query("UPDATE tags SET tag_last_modified = $1 WHERE tag_uuid = $2")
            .bind(Utc::now())
            .bind(attribute.tag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::persistence("touch last modified"))?;

        Ok(id)
    }

    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<AttributeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tag_attribute_uuid, tag_attribute_tag_uuid, tag_attribute_name, tag_attribute_value
            FROM tag_attributes
            WHERE tag_attribute_tag_uuid = $1
            ORDER BY tag_attribute_name
            "#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::persistence("fetch attributes"))?;

        let attributes = rows
            .into_iter()
            .map(|row| AttributeRecord {
                id: row.get("tag_attribute_uuid"),
                tag_id: row.get("tag_attribute_tag_uuid"),
                name: row.get("tag_attribute_name"),
                value: row.get("tag_attribute_value"),
            })
            .collect();

        Ok(attributes)
    }
}
