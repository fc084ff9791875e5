//! # hedstore-db
//!
//! PostgreSQL tag store for HED tag hierarchies.
//!
//! This crate provides:
//! - Connection pool management
//! - Credentials files
//! - Repository implementations for tags, tag attributes and tag comments
//! - Store lifecycle: creation from a schema script, guarded deletion
//! - Store-backed dump, merge and usage-count updates
//!
//! ## Example
//!
//! ```rust,ignore
//! use hedstore_db::{Credentials, StoreManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::from_file("hed.properties")?;
//!     StoreManager::create_store(&credentials, "schema/tags.sql").await?;
//!
//!     let manager = StoreManager::connect(&credentials).await?;
//!     let merged = manager.merge_xml(&std::fs::read_to_string("HED.xml")?, false).await?;
//!     println!("{}", merged);
//!     manager.close().await;
//!     Ok(())
//! }
//! ```
pub mod attributes;
pub mod comments;
pub mod credentials;
pub mod manage;
pub mod pool;
pub mod store_name;
pub mod tags;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can reach them
pub mod test_fixtures;

// Re-export core types
pub use hedstore_core::*;

pub use attributes::PgAttributeRepository;
pub use comments::PgCommentRepository;
pub use credentials::Credentials;
pub use manage::{split_script, StoreManager, SCRIPT_SENTINEL, TEMPLATE_STORE};
pub use pool::{
    create_pool, create_pool_with_config, create_pool_with_options, PoolConfig,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS,
};
pub use store_name::validate_store_name;
pub use tags::PgTagRepository;

/// One tag store: the three repositories over a shared pool.
#[derive(Clone)]
pub struct Database {
    pool: sqlx::Pool<sqlx::Postgres>,
    /// Tag repository.
    pub tags: PgTagRepository,
    /// Tag attribute repository.
    pub attributes: PgAttributeRepository,
    /// Tag comment repository.
    pub comments: PgCommentRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            tags: PgTagRepository::new(pool.clone()),
            attributes: PgAttributeRepository::new(pool.clone()),
            comments: PgCommentRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect to the store named by `credentials`.
    pub async fn connect_with_credentials(credentials: &Credentials) -> Result<Self> {
        let pool =
            create_pool_with_options(credentials.connect_options(), PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl HedStore for Database {
    fn tags(&self) -> &dyn TagRepository {
        &self.tags
    }

    fn attributes(&self) -> &dyn AttributeRepository {
        &self.attributes
    }

    fn comments(&self) -> &dyn CommentRepository {
        &self.comments
    }
}
