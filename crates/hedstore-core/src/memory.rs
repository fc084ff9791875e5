//! In-process tag store for deterministic testing.
//!
//! Behaves like the PostgreSQL store as far as the repository traits can
//! observe: unique pathnames, insertion-ordered children, comment inserts
//! touching the owning tag, `Persistence` errors on constraint violations.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = InMemoryStore::new().with_write_limit(3);
//! let report = merge_into_store(&store, &tree, false).await;
//! assert!(report.is_err());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::{AttributeRepository, CommentRepository, HedStore, TagRepository};

#[derive(Debug, Default)]
struct State {
    tags: Vec<TagRecord>,
    attributes: Vec<AttributeRecord>,
    comments: Vec<CommentRecord>,
    writes: usize,
    write_limit: Option<usize>,
}

impl State {
    /// Account for one write; fails once the configured limit is reached.
    fn write(&mut self, op: &str) -> Result<()> {
        if let Some(limit) = self.write_limit {
            if self.writes >= limit {
                return Err(Error::persistence(op)(sqlx::Error::Protocol(
                    "write limit reached".to_string(),
                )));
            }
        }
        self.writes += 1;
        Ok(())
    }

    fn tag_by_pathname(&self, pathname: &str) -> Option<&TagRecord> {
        self.tags.iter().find(|t| t.pathname == pathname)
    }

    fn touch(&mut self, id: Uuid) -> u64 {
        match self.tags.iter_mut().find(|t| t.id == id) {
            Some(tag) => {
                tag.last_modified = Utc::now();
                1
            }
            None => 0,
        }
    }
}

/// Tag store held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after the first `limit` writes (simulates a dropped connection).
    pub fn with_write_limit(self, limit: usize) -> Self {
        self.state().write_limit = Some(limit);
        self
    }

    /// Lift the write limit.
    pub fn clear_write_limit(&self) {
        self.state().write_limit = None;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Snapshot of every tag row in insertion order.
    pub fn tag_rows(&self) -> Vec<TagRecord> {
        self.state().tags.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TagRepository for InMemoryStore {
    async fn insert(&self, tag: NewTag) -> Result<Uuid> {
        let mut state = self.state();
        state.write("insert tag")?;
        if state.tag_by_pathname(&tag.pathname).is_some() {
            return Err(Error::persistence("insert tag")(sqlx::Error::Protocol(
                format!("duplicate pathname {}", tag.pathname),
            )));
        }
        let now = Utc::now();
        state.tags.push(TagRecord {
            id: tag.id,
            pathname: tag.pathname,
            parent_id: tag.parent_id,
            description: tag.description,
            count: 0,
            owner: tag.owner,
            created_at: now,
            last_modified: now,
        });
        Ok(tag.id)
    }

    async fn fetch_by_pathname(&self, pathname: &str) -> Result<TagRecord> {
        self.find_by_pathname(pathname)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tag {}", pathname)))
    }

    async fn find_by_pathname(&self, pathname: &str) -> Result<Option<TagRecord>> {
        Ok(self.state().tag_by_pathname(pathname).cloned())
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<TagRecord> {
        self.state()
            .tags
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Tag {}", id)))
    }

    async fn child_ids(&self, parent: Option<Uuid>) -> Result<Vec<Uuid>> {
        Ok(self
            .state()
            .tags
            .iter()
            .filter(|t| t.parent_id == parent)
            .map(|t| t.id)
            .collect())
    }

    async fn increment_count(&self, pathname: &str) -> Result<u64> {
        let mut state = self.state();
        state.write("increment count")?;
        match state.tags.iter_mut().find(|t| t.pathname == pathname) {
            Some(tag) => {
                tag.count += 1;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_description(&self, pathname: &str, description: &str) -> Result<u64> {
        let mut state = self.state();
        state.write("update description")?;
        match state.tags.iter_mut().find(|t| t.pathname == pathname) {
            Some(tag) => {
                tag.description = Some(description.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn touch_last_modified(&self, id: Uuid) -> Result<u64> {
        let mut state = self.state();
        state.write("touch last modified")?;
        Ok(state.touch(id))
    }

    async fn count_all(&self) -> Result<i64> {
        Ok(self.state().tags.len() as i64)
    }
}

#[async_trait]
impl AttributeRepository for InMemoryStore {
    async fn insert(&self, attribute: NewAttribute) -> Result<Uuid> {
        let mut state = self.state();
        state.write("insert attribute")?;
        if state
            .attributes
            .iter()
            .any(|a| a.tag_id == attribute.tag_id && a.name == attribute.name)
        {
            return Err(Error::persistence("insert attribute")(sqlx::Error::Protocol(
                format!("duplicate attribute {}", attribute.name),
            )));
        }
        let id = Uuid::now_v7();
        state.attributes.push(AttributeRecord {
            id,
            tag_id: attribute.tag_id,
            name: attribute.name,
            value: attribute.value,
        });
        state.touch(attribute.tag_id);
        Ok(id)
    }

    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<AttributeRecord>> {
        Ok(self
            .state()
            .attributes
            .iter()
            .filter(|a| a.tag_id == tag_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommentRepository for InMemoryStore {
    async fn insert(&self, comment: NewComment) -> Result<Uuid> {
        let mut state = self.state();
        state.write("insert comment")?;
        if !state.tags.iter().any(|t| t.id == comment.tag_id) {
            return Err(Error::persistence("insert comment")(sqlx::Error::Protocol(
                format!("no tag {}", comment.tag_id),
            )));
        }
        let id = Uuid::now_v7();
        state.comments.push(CommentRecord {
            id,
            tag_id: comment.tag_id,
            date: comment.date,
            author: comment.author,
            text: comment.text,
        });
        state.touch(comment.tag_id);
        Ok(id)
    }

    async fn insert_by_pathname(&self, pathname: &str, comment: &TagComment) -> Result<Uuid> {
        let tag = TagRepository::fetch_by_pathname(self, pathname).await?;
        CommentRepository::insert(self, NewComment::from_comment(tag.id, comment)).await
    }

    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<CommentRecord>> {
        Ok(self
            .state()
            .comments
            .iter()
            .filter(|c| c.tag_id == tag_id)
            .cloned()
            .collect())
    }
}

impl HedStore for InMemoryStore {
    fn tags(&self) -> &dyn TagRepository {
        self
    }

    fn attributes(&self) -> &dyn AttributeRepository {
        self
    }

    fn comments(&self) -> &dyn CommentRepository {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tag(pathname: &str, parent_id: Option<Uuid>) -> NewTag {
        NewTag {
            id: Uuid::now_v7(),
            pathname: pathname.to_string(),
            parent_id,
            description: None,
            owner: None,
        }
    }

    #[tokio::test]
    async fn test_children_in_insertion_order() {
        let store = InMemoryStore::new();
        let item = store.tags().insert(new_tag("/Item", None)).await.unwrap();
        let b = store.tags().insert(new_tag("/Item/B", Some(item))).await.unwrap();
        let a = store.tags().insert(new_tag("/Item/A", Some(item))).await.unwrap();

        assert_eq!(store.tags().child_ids(Some(item)).await.unwrap(), vec![b, a]);
        assert_eq!(store.tags().child_ids(None).await.unwrap(), vec![item]);
    }

    #[tokio::test]
    async fn test_duplicate_pathname_is_persistence_error() {
        let store = InMemoryStore::new();
        store.tags().insert(new_tag("/Item", None)).await.unwrap();
        let err = store.tags().insert(new_tag("/Item", None)).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { ref op, .. } if op == "insert tag"));
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = InMemoryStore::new();
        assert!(store.tags().fetch_by_pathname("/Nope").await.unwrap_err().is_not_found());
        assert!(store.tags().find_by_pathname("/Nope").await.unwrap().is_none());
        assert!(store.tags().fetch_by_id(Uuid::now_v7()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_increment_count_only_touches_named_tag() {
        let store = InMemoryStore::new();
        store.tags().insert(new_tag("/Item", None)).await.unwrap();
        assert_eq!(store.tags().increment_count("/Item").await.unwrap(), 1);
        assert_eq!(store.tags().increment_count("/Item").await.unwrap(), 1);
        assert_eq!(store.tags().increment_count("/Missing").await.unwrap(), 0);
        assert_eq!(store.tags().fetch_by_pathname("/Item").await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_comment_insert_touches_tag() {
        let store = InMemoryStore::new();
        let id = store.tags().insert(new_tag("/Item", None)).await.unwrap();
        let before = store.tags().fetch_by_id(id).await.unwrap().last_modified;

        store
            .comments()
            .insert_by_pathname("/Item", &TagComment::new("Physical").with_author("kay"))
            .await
            .unwrap();

        let after = store.tags().fetch_by_id(id).await.unwrap().last_modified;
        assert!(after >= before);
        let comments = store.comments().list_for_tag(id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author.as_deref(), Some("kay"));
    }

    #[tokio::test]
    async fn test_comment_on_missing_pathname_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .comments()
            .insert_by_pathname("/Nope", &TagComment::new("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_write_limit_fails_with_persistence() {
        let store = InMemoryStore::new().with_write_limit(1);
        store.tags().insert(new_tag("/Item", None)).await.unwrap();
        let err = store.tags().insert(new_tag("/Event", None)).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert_eq!(store.write_count(), 1);

        store.clear_write_limit();
        store.tags().insert(new_tag("/Event", None)).await.unwrap();
        assert_eq!(store.tags().count_all().await.unwrap(), 2);
    }
}
