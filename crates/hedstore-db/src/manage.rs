//! Store lifecycle management.
//!
//! A store is one PostgreSQL database. It is created from the bootstrap
//! `template1` database and populated by running a schema script whose
//! statements are separated by [`SCRIPT_SENTINEL`] lines. Deletion is refused
//! while any other session is connected to the store.
//!
//! The connection check before a drop is not atomic: a session that connects
//! between the check and the `DROP DATABASE` makes the drop fail with a
//! persistence error.

use std::path::Path;
use std::time::Instant;

use sqlx::{Pool, Postgres};
use tracing::{debug, info, warn};

use hedstore_core::{
    dump_xml, load_tree, merge_into_store, merge_xml_into_store, propagate_counts, BatchFormat,
    CountUpdate, Error, Result, StoreMerge, TagTree,
};

use crate::credentials::Credentials;
use crate::pool::{create_pool_with_options, PoolConfig};
use crate::store_name::validate_store_name;
use crate::Database;

/// Bootstrap database used to create and drop stores.
pub const TEMPLATE_STORE: &str = "template1";

/// Line separating statements in a schema script.
pub const SCRIPT_SENTINEL: &str = "-- execute";

/// Split a schema script into statements.
///
/// Segments holding nothing but blank lines and `--` comments are dropped.
///
/// ```
/// use hedstore_db::split_script;
///
/// let script = "-- header\nCREATE TABLE a (x INT);\n-- execute\nCREATE TABLE b (y INT);\n";
/// assert_eq!(
///     split_script(script),
///     vec!["-- header\nCREATE TABLE a (x INT);", "CREATE TABLE b (y INT);"]
/// );
/// ```
pub fn split_script(script: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        if line.trim() == SCRIPT_SENTINEL {
            push_segment(&mut segments, std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_segment(&mut segments, current);
    segments
}

fn push_segment(segments: &mut Vec<String>, segment: String) {
    let has_statement = segment.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    });
    if has_statement {
        segments.push(segment.trim().to_string());
    }
}

async fn connect_pool(credentials: &Credentials, config: PoolConfig) -> Result<Pool<Postgres>> {
    create_pool_with_options(credentials.connect_options(), config).await
}

/// A connection to one tag store plus the lifecycle operations on stores.
#[derive(Clone)]
pub struct StoreManager {
    database: Database,
    store: String,
}

impl StoreManager {
    /// Connect to the store named by `credentials`.
    pub async fn connect(credentials: &Credentials) -> Result<Self> {
        Self::connect_with_config(credentials, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(credentials: &Credentials, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(credentials, config).await?;
        info!(
            subsystem = "db",
            component = "lifecycle",
            op = "connect",
            store = %credentials.dbname,
            host = %credentials.hostname,
            "Connected to tag store"
        );
        Ok(Self {
            database: Database::new(pool),
            store: credentials.dbname.clone(),
        })
    }

    /// Connect using a credentials file.
    pub async fn from_credentials_file(path: impl AsRef<Path>) -> Result<Self> {
        let credentials = Credentials::from_file(path)?;
        Self::connect(&credentials).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        let store = pool
            .connect_options()
            .get_database()
            .unwrap_or_default()
            .to_string();
        Self {
            database: Database::new(pool),
            store,
        }
    }

    /// The repositories of the connected store.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name of the connected store.
    pub fn store_name(&self) -> &str {
        &self.store
    }

    /// Close every connection of this manager.
    pub async fn close(&self) {
        self.database.pool().close().await;
        debug!(
            subsystem = "db",
            component = "lifecycle",
            op = "close",
            store = %self.store,
            "Closed tag store connection"
        );
    }

    // =========================================================================
    // STORE LIFECYCLE
    // =========================================================================

    /// Create the store named by `credentials` and run the schema script in it.
    ///
    /// The script is read before anything is created, so a missing script
    /// leaves the server untouched.
    pub async fn create_store(credentials: &Credentials, script_path: impl AsRef<Path>) -> Result<()> {
        let start = Instant::now();
        validate_store_name(&credentials.dbname)?;
        let script = tokio::fs::read_to_string(script_path.as_ref()).await?;
        let statements = split_script(&script);

        let template = connect_pool(&credentials.for_store(TEMPLATE_STORE), PoolConfig::default()).await?;
        // Copy source is template0: it never accepts connections
        let created = sqlx::raw_sql(&format!(
            "CREATE DATABASE {} TEMPLATE template0",
            credentials.dbname
        ))
        .execute(&template)
        .await
        .map_err(Error::persistence("create store"));
        template.close().await;
        created?;

        let pool = connect_pool(credentials, PoolConfig::default()).await?;
        for (index, statement) in statements.iter().enumerate() {
            debug!(
                subsystem = "db",
                component = "lifecycle",
                op = "run_script",
                store = %credentials.dbname,
                statement = index,
                "Running schema statement"
            );
            if let Err(e) = sqlx::raw_sql(statement).execute(&pool).await {
                pool.close().await;
                return Err(Error::persistence("run schema script")(e));
            }
        }
        pool.close().await;

        info!(
            subsystem = "db",
            component = "lifecycle",
            op = "create_store",
            store = %credentials.dbname,
            result_count = statements.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Created tag store"
        );
        Ok(())
    }

    /// Create a store using a credentials file.
    pub async fn create_store_from_file(
        credentials_path: impl AsRef<Path>,
        script_path: impl AsRef<Path>,
    ) -> Result<()> {
        let credentials = Credentials::from_file(credentials_path)?;
        Self::create_store(&credentials, script_path).await
    }

    /// Drop the store named by `credentials`.
    ///
    /// Fails with [`Error::ConnectionsActive`] and leaves the store in place
    /// when any other session is connected to it.
    pub async fn delete_store(credentials: &Credentials) -> Result<()> {
        validate_store_name(&credentials.dbname)?;

        let pool = connect_pool(credentials, PoolConfig::default()).await?;
        let others: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(
            "SELECT count(pid) FROM pg_stat_activity \
             WHERE datname = current_database() AND pid <> pg_backend_pid()",
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;
        let others = others.map_err(Error::persistence("count connections"))?;

        if others > 0 {
            warn!(
                subsystem = "db",
                component = "lifecycle",
                op = "delete_store",
                store = %credentials.dbname,
                result_count = others,
                "Refusing to drop store with active connections"
            );
            return Err(Error::ConnectionsActive(others));
        }

        let template = connect_pool(&credentials.for_store(TEMPLATE_STORE), PoolConfig::default()).await?;
        let dropped = sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS {}", credentials.dbname))
            .execute(&template)
            .await
            .map_err(Error::persistence("drop store"));
        template.close().await;
        dropped?;

        info!(
            subsystem = "db",
            component = "lifecycle",
            op = "delete_store",
            store = %credentials.dbname,
            "Dropped tag store"
        );
        Ok(())
    }

    /// Drop a store using a credentials file.
    pub async fn delete_store_from_file(credentials_path: impl AsRef<Path>) -> Result<()> {
        let credentials = Credentials::from_file(credentials_path)?;
        Self::delete_store(&credentials).await
    }

    // =========================================================================
    // STORE CONTENT
    // =========================================================================

    /// Rebuild the store's tag tree.
    pub async fn load_tree(&self, include_counts: bool) -> Result<TagTree> {
        load_tree(&self.database, include_counts).await
    }

    /// Serialize the whole store as an XML document.
    pub async fn dump_xml(&self, include_counts: bool) -> Result<String> {
        dump_xml(&self.database, include_counts).await
    }

    /// Merge a parsed hierarchy into the store.
    pub async fn merge_tree(&self, src: &TagTree, include_counts: bool) -> Result<StoreMerge> {
        merge_into_store(&self.database, src, include_counts).await
    }

    /// Merge an XML hierarchy into the store and return the merged document.
    pub async fn merge_xml(&self, xml: &str, include_counts: bool) -> Result<String> {
        merge_xml_into_store(&self.database, xml, include_counts).await
    }

    /// Increment counts for the tag usages `new_batch` adds over `old_batch`.
    pub async fn update_tag_counts(
        &self,
        old_batch: &str,
        new_batch: &str,
        format: BatchFormat,
    ) -> Result<CountUpdate> {
        propagate_counts(&self.database, old_batch, new_batch, format).await
    }
}
