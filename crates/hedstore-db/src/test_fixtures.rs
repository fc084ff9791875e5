//! Test fixtures for database integration tests.
//!
//! ## Configuration
//!
//! The test server is configured through `TEST_DB_HOST`, `TEST_DB_PORT`,
//! `TEST_DB_USER` and `TEST_DB_PASSWORD`. Unset variables fall back to the
//! `DEFAULT_TEST_DB_*` constants.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hedstore_db::test_fixtures::TestStore;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let store = TestStore::new().await;
//!     let xml = store.manager.dump_xml(false).await.unwrap();
//!     // ...
//!     store.cleanup().await;
//! }
//! ```

use std::path::PathBuf;

use uuid::Uuid;

use crate::credentials::Credentials;
use crate::manage::StoreManager;

/// Default test server host when TEST_DB_HOST is not set.
pub const DEFAULT_TEST_DB_HOST: &str = "localhost";

/// Default test server port when TEST_DB_PORT is not set.
pub const DEFAULT_TEST_DB_PORT: u16 = 5432;

/// Default test login when TEST_DB_USER is not set.
pub const DEFAULT_TEST_DB_USER: &str = "postgres";

/// Default test password when TEST_DB_PASSWORD is not set.
pub const DEFAULT_TEST_DB_PASSWORD: &str = "admin";

/// Credentials for a store named `dbname` on the test server.
pub fn test_credentials(dbname: &str) -> Credentials {
    let port = std::env::var("TEST_DB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_TEST_DB_PORT);
    Credentials::new(
        dbname,
        std::env::var("TEST_DB_HOST").unwrap_or_else(|_| DEFAULT_TEST_DB_HOST.to_string()),
        port,
        std::env::var("TEST_DB_USER").unwrap_or_else(|_| DEFAULT_TEST_DB_USER.to_string()),
        std::env::var("TEST_DB_PASSWORD").unwrap_or_else(|_| DEFAULT_TEST_DB_PASSWORD.to_string()),
    )
}

/// Path of the bundled schema script.
pub fn schema_script_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("schema")
        .join("tags.sql")
}

/// A uniquely named store, created from the bundled schema script.
pub struct TestStore {
    pub credentials: Credentials,
    pub manager: StoreManager,
    cleaned_up: bool,
}

impl TestStore {
    /// Create a fresh store and connect to it.
    pub async fn new() -> Self {
        let name = format!("hedstore_test_{}", Uuid::new_v4().simple());
        let credentials = test_credentials(&name);

        StoreManager::create_store(&credentials, schema_script_path())
            .await
            .expect("Failed to create test store");
        let manager = StoreManager::connect(&credentials)
            .await
            .expect("Failed to connect to test store");

        Self {
            credentials,
            manager,
            cleaned_up: false,
        }
    }

    /// Close the connection and drop the store.
    pub async fn cleanup(mut self) {
        self.manager.close().await;
        let _ = StoreManager::delete_store(&self.credentials).await;
        self.cleaned_up = true;
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        if !self.cleaned_up {
            // Spawn async cleanup in Drop
            let manager = self.manager.clone();
            let credentials = self.credentials.clone();
            tokio::spawn(async move {
                manager.close().await;
                let _ = StoreManager::delete_store(&credentials).await;
            });
        }
    }
}
