//! PostgreSQL entity mapper behavior.
use chrono::{TimeZone, Utc};
use hedstore_db::test_fixtures::TestStore;
use hedstore_db::{
    AttributeRepository, CommentRepository, Error, NewAttribute, NewComment, NewTag, TagComment,
    TagRepository,
};
use uuid::Uuid;

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
#[ignore] // Requires database connection
async fn test_tag_insert_and_lookup() {
    let store = TestStore::new().await;
    let tags = &store.manager.database().tags;

    let root = tags.insert(new_tag("/Item", None)).await.unwrap();
    let mut child = new_tag("/Item/Object", Some(root));
    child.description = Some("Something physical".to_string());
    let child_id = tags.insert(child).await.unwrap();

    let fetched = tags.fetch_by_pathname("/Item/Object").await.unwrap();
    assert_eq!(fetched.id, child_id);
    assert_eq!(fetched.parent_id, Some(root));
    assert_eq!(fetched.name(), "Object");
    assert_eq!(fetched.count, 0);
    assert_eq!(fetched.description.as_deref(), Some("Something physical"));

    assert_eq!(tags.fetch_by_id(root).await.unwrap().pathname, "/Item");
    assert!(tags.find_by_pathname("/Nothing").await.unwrap().is_none());
    assert!(matches!(
        tags.fetch_by_pathname("/Nothing").await,
        Err(Error::NotFound(_))
    ));

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_duplicate_pathname_is_persistence_error() {
    let store = TestStore::new().await;
    let tags = &store.manager.database().tags;

    tags.insert(new_tag("/Event", None)).await.unwrap();
    match tags.insert(new_tag("/Event", None)).await {
        Err(Error::Persistence { op, .. }) => assert_eq!(op, "insert tag"),
        other => panic!("Expected Persistence error, got {:?}", other),
    }

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_children_in_insertion_order() {
    let store = TestStore::new().await;
    let tags = &store.manager.database().tags;

    let root = tags.insert(new_tag("/Item", None)).await.unwrap();
    let zebra = tags.insert(new_tag("/Item/Zebra", Some(root))).await.unwrap();
    let apple = tags.insert(new_tag("/Item/Apple", Some(root))).await.unwrap();
    let event = tags.insert(new_tag("/Event", None)).await.unwrap();

    assert_eq!(tags.child_ids(Some(root)).await.unwrap(), vec![zebra, apple]);
    assert_eq!(tags.child_ids(None).await.unwrap(), vec![root, event]);
    assert!(tags.child_ids(Some(apple)).await.unwrap().is_empty());

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_count_and_description_updates() {
    let store = TestStore::new().await;
    let tags = &store.manager.database().tags;
    tags.insert(new_tag("/Item", None)).await.unwrap();

    assert_eq!(tags.increment_count("/Item").await.unwrap(), 1);
    assert_eq!(tags.increment_count("/Item").await.unwrap(), 1);
    assert_eq!(tags.increment_count("/Missing").await.unwrap(), 0);
    assert_eq!(tags.fetch_by_pathname("/Item").await.unwrap().count, 2);

    assert_eq!(tags.update_description("/Item", "Things").await.unwrap(), 1);
    assert_eq!(
        tags.fetch_by_pathname("/Item").await.unwrap().description.as_deref(),
        Some("Things")
    );

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_attribute_insert_touches_tag() {
    let store = TestStore::new().await;
    let db = store.manager.database();
    let id = db.tags.insert(new_tag("/Item", None)).await.unwrap();
    let before = db.tags.fetch_by_id(id).await.unwrap().last_modified;

    db.attributes
        .insert(NewAttribute {
            tag_id: id,
            name: "extensionAllowed".to_string(),
            value: "true".to_string(),
        })
        .await
        .unwrap();

    let attributes = db.attributes.list_for_tag(id).await.unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].name, "extensionAllowed");
    assert_eq!(attributes[0].value, "true");
    assert!(db.tags.fetch_by_id(id).await.unwrap().last_modified >= before);

    let duplicate = db
        .attributes
        .insert(NewAttribute {
            tag_id: id,
            name: "extensionAllowed".to_string(),
            value: "false".to_string(),
        })
        .await;
    assert!(matches!(duplicate, Err(Error::Persistence { .. })));

    store.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_comments_keep_insert_order() {
    let store = TestStore::new().await;
    let db = store.manager.database();
    let id = db.tags.insert(new_tag("/Item", None)).await.unwrap();

    let date = Utc.with_ymd_and_hms(2014, 5, 2, 10, 30, 0).unwrap();
    db.comments
        .insert(NewComment {
            tag_id: id,
            date,
            author: Some("kay".to_string()),
            text: "first".to_string(),
        })
        .await
        .unwrap();
    db.comments
        .insert_by_pathname("/Item", &TagComment::new("second"))
        .await
        .unwrap();

    let comments = db.comments.list_for_tag(id).await.unwrap();
    let texts: Vec<&str> = comments.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(comments[0].date, date);
    assert_eq!(comments[0].author.as_deref(), Some("kay"));
    assert!(comments[1].author.is_none());

    assert!(matches!(
        db.comments
            .insert_by_pathname("/Missing", &TagComment::new("lost"))
            .await,
        Err(Error::NotFound(_))
    ));

    store.cleanup().await;
}
