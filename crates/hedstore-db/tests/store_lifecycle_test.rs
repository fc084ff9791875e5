//! Store creation, guarded deletion and credentials-file connection.
//!
//! These tests create and drop real databases on the test server.
use hedstore_db::test_fixtures::{schema_script_path, test_credentials, TestStore};
use hedstore_db::{Error, StoreManager, TagRepository};
use uuid::Uuid;

fn unique_name() -> String {
    format!("hedstore_lifecycle_{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_create_connect_delete() {
    let credentials = test_credentials(&unique_name());

    StoreManager::create_store(&credentials, schema_script_path())
        .await
        .unwrap();

    let manager = StoreManager::connect(&credentials).await.unwrap();
    assert_eq!(manager.store_name(), credentials.dbname);
    assert_eq!(manager.database().tags.count_all().await.unwrap(), 0);
    manager.close().await;

    StoreManager::delete_store(&credentials).await.unwrap();
    assert!(StoreManager::connect(&credentials).await.is_err());
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_delete_refused_while_connected() {
    let store = TestStore::new().await;

    // The fixture keeps its own connection open
    match StoreManager::delete_store(&store.credentials).await {
        Err(Error::ConnectionsActive(n)) => assert!(n >= 1),
        other => panic!("Expected ConnectionsActive, got {:?}", other),
    }

    // Store is untouched
    let count = store.manager.database().tags.count_all().await.unwrap();
    assert_eq!(count, 0);

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_create_existing_store_fails() {
    let store = TestStore::new().await;

    let result = StoreManager::create_store(&store.credentials, schema_script_path()).await;
    assert!(matches!(result, Err(Error::Persistence { .. })));

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_missing_script_creates_nothing() {
    let credentials = test_credentials(&unique_name());
    let dir = tempfile::tempdir().unwrap();

    let result = StoreManager::create_store(&credentials, dir.path().join("absent.sql")).await;
    assert!(matches!(result, Err(Error::Io(_))));
    assert!(StoreManager::connect(&credentials).await.is_err());
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_connect_from_credentials_file() {
    let store = TestStore::new().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hed.properties");
    store.credentials.write_to_file(&path).unwrap();

    let manager = StoreManager::from_credentials_file(&path).await.unwrap();
    assert_eq!(manager.store_name(), store.credentials.dbname);
    manager.close().await;

    store.cleanup().await;
}

#[tokio::test]
async fn test_invalid_store_name_rejected_before_connecting() {
    let credentials = test_credentials("tags; DROP DATABASE postgres");
    let result = StoreManager::create_store(&credentials, schema_script_path()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let result = StoreManager::delete_store(&credentials).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_mixed_case_store_name_rejected_before_connecting() {
    let credentials = test_credentials("HedTags");
    let result = StoreManager::create_store(&credentials, schema_script_path()).await;
    assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("lower-case")));

    let result = StoreManager::delete_store(&credentials).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}
