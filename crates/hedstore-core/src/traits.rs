//! Repository traits for the three tag tables.
//!
//! The PostgreSQL implementations live in `hedstore-db`; [`crate::memory`]
//! provides an in-process implementation with the same observable behavior.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// TAG REPOSITORY
// =============================================================================

/// Repository for tag rows.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Insert a tag with a zero count. Returns the tag's identifier.
    async fn insert(&self, tag: NewTag) -> Result<Uuid>;

    /// Fetch a tag by pathname; `NotFound` when absent.
    async fn fetch_by_pathname(&self, pathname: &str) -> Result<TagRecord>;

    /// Look up a tag by pathname; `None` when absent.
    async fn find_by_pathname(&self, pathname: &str) -> Result<Option<TagRecord>>;

    /// Fetch a tag by identifier; `NotFound` when absent.
    async fn fetch_by_id(&self, id: Uuid) -> Result<TagRecord>;

    /// Identifiers of the direct children of `parent` (roots when `None`), in insertion order.
    async fn child_ids(&self, parent: Option<Uuid>) -> Result<Vec<Uuid>>;

    /// Add exactly one to the count of `pathname`. Returns rows updated.
    async fn increment_count(&self, pathname: &str) -> Result<u64>;

    /// Overwrite the description of `pathname`. Returns rows updated.
    async fn update_description(&self, pathname: &str, description: &str) -> Result<u64>;

    /// Set the last-modified timestamp of `id` to now. Returns rows updated.
    async fn touch_last_modified(&self, id: Uuid) -> Result<u64>;

    /// Total number of tags.
    async fn count_all(&self) -> Result<i64>;
}

// =============================================================================
// ATTRIBUTE REPOSITORY
// =============================================================================

/// Repository for tag attribute rows.
#[async_trait]
pub trait AttributeRepository: Send + Sync {
    async fn insert(&self, attribute: NewAttribute) -> Result<Uuid>;

    /// All attributes of a tag.
    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<AttributeRecord>>;
}

// =============================================================================
// COMMENT REPOSITORY
// =============================================================================

/// Repository for tag comment rows.
#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Insert a comment and touch the owning tag's last-modified timestamp.
    async fn insert(&self, comment: NewComment) -> Result<Uuid>;

    /// Insert a comment on the tag at `pathname`; `NotFound` when no such tag exists.
    async fn insert_by_pathname(&self, pathname: &str, comment: &TagComment) -> Result<Uuid>;

    /// All comments of a tag, oldest insert first.
    async fn list_for_tag(&self, tag_id: Uuid) -> Result<Vec<CommentRecord>>;
}

// =============================================================================
// STORE BUNDLE
// =============================================================================

/// A complete tag store: the three repositories over one backend.
pub trait HedStore: Send + Sync {
    fn tags(&self) -> &dyn TagRepository;
    fn attributes(&self) -> &dyn AttributeRepository;
    fn comments(&self) -> &dyn CommentRepository;
}
