//! Operations that run a tag tree against a [`HedStore`].
//!
//! Every write goes out as its own statement, in order. Nothing here opens a
//! transaction: when a call fails midway the writes before it stay in place,
//! and re-running the same call completes the work.

use std::time::Instant;

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{expand_ancestors, new_tag_usages, parse_batch, BatchFormat};
use crate::merge::{merge_trees, MergeChange, MergeReport};
use crate::models::{is_blank, NewAttribute, NewComment, NewTag, TagComment};
use crate::traits::HedStore;
use crate::tree::{NodeId, TagTree};
use crate::xml;

/// Rebuild the full tag tree held by `store`.
///
/// Children keep the store's insertion order. Counts are attached only when
/// `include_counts` is set.
pub async fn load_tree(store: &dyn HedStore, include_counts: bool) -> Result<TagTree> {
    let start = Instant::now();
    let mut tree = TagTree::new();
    let mut pending: Vec<(Option<NodeId>, Option<Uuid>)> = vec![(None, None)];

    while let Some((parent, parent_id)) = pending.pop() {
        let mut attached = Vec::new();
        for id in store.tags().child_ids(parent_id).await? {
            let record = store.tags().fetch_by_id(id).await?;
            let attributes = store.attributes().list_for_tag(id).await?;
            let comments = store.comments().list_for_tag(id).await?;

            let handle = tree.attach_existing(parent, record.id, record.name());
            let node = tree.node_mut(handle);
            if !is_blank(record.description.as_deref()) {
                node.description = record.description;
            }
            if include_counts {
                node.count = Some(record.count);
            }
            node.attributes = attributes.into_iter().map(|a| (a.name, a.value)).collect();
            node.comments = comments.into_iter().map(TagComment::from).collect();
            node.created_at = record.created_at;
            node.last_modified = record.last_modified;

            trace!(
                subsystem = "store",
                op = "load",
                pathname = %record.pathname,
                "Loaded tag"
            );
            attached.push((Some(handle), Some(id)));
        }
        pending.extend(attached.into_iter().rev());
    }

    debug!(
        subsystem = "store",
        op = "load_tree",
        node_count = tree.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Loaded tag tree from store"
    );
    Ok(tree)
}

/// Serialize the whole store as an XML document.
pub async fn dump_xml(store: &dyn HedStore, include_counts: bool) -> Result<String> {
    let tree = load_tree(store, include_counts).await?;
    xml::to_xml_string(&tree)
}

/// Result of a store-backed merge.
#[derive(Debug, Clone)]
pub struct StoreMerge {
    /// The store's tree after the merge.
    pub tree: TagTree,
    pub report: MergeReport,
}

/// Merge `src` into the tree held by `store`, writing every change through.
pub async fn merge_into_store(
    store: &dyn HedStore,
    src: &TagTree,
    include_counts: bool,
) -> Result<StoreMerge> {
    let start = Instant::now();
    let mut tree = load_tree(store, include_counts).await?;
    let report = merge_trees(&mut tree, src);

    for (applied, change) in report.changes.iter().enumerate() {
        if let Err(e) = apply_change(store, &mut tree, change, include_counts).await {
            error!(
                subsystem = "merge",
                op = "merge_into_store",
                change_count = report.len(),
                applied,
                error = %e,
                "Store left partially merged; re-run the merge to complete it"
            );
            return Err(e);
        }
    }

    info!(
        subsystem = "merge",
        op = "merge_into_store",
        change_count = report.len(),
        nodes_added = report.nodes_added(),
        descriptions_adopted = report.descriptions_adopted(),
        comments_appended = report.comments_appended(),
        attributes_added = report.attributes_added(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Merged document into store"
    );
    Ok(StoreMerge { tree, report })
}

/// Parse `xml`, merge it into the store and return the merged document.
pub async fn merge_xml_into_store(
    store: &dyn HedStore,
    xml_text: &str,
    include_counts: bool,
) -> Result<String> {
    let src = xml::parse_document(xml_text)?;
    let merged = merge_into_store(store, &src, include_counts).await?;
    xml::to_xml_string(&merged.tree)
}

async fn apply_change(
    store: &dyn HedStore,
    tree: &mut TagTree,
    change: &MergeChange,
    include_counts: bool,
) -> Result<()> {
    match *change {
        MergeChange::NodeAdded(handle) => {
            let pathname = tree.pathname(handle);
            let node = tree.node(handle);
            let id = store
                .tags()
                .insert(NewTag {
                    id: node.id,
                    pathname: pathname.clone(),
                    parent_id: node.parent_id,
                    description: node.description.clone().filter(|d| !d.is_empty()),
                    owner: None,
                })
                .await?;
            for (name, value) in &node.attributes {
                store
                    .attributes()
                    .insert(NewAttribute {
                        tag_id: id,
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .await?;
            }
            for comment in &node.comments {
                store
                    .comments()
                    .insert(NewComment::from_comment(id, comment))
                    .await?;
            }
            tree.node_mut(handle).count = include_counts.then_some(0);
            trace!(subsystem = "merge", op = "insert tag", pathname = %pathname, "Added tag");
        }
        MergeChange::DescriptionAdopted(handle) => {
            let pathname = tree.pathname(handle);
            let description = tree.node(handle).description.clone().unwrap_or_default();
            store
                .tags()
                .update_description(&pathname, &description)
                .await?;
            trace!(subsystem = "merge", op = "update description", pathname = %pathname, "Adopted description");
        }
        MergeChange::CommentAppended { node, index } => {
            let target = tree.node(node);
            let comment = &target.comments[index];
            store
                .comments()
                .insert(NewComment::from_comment(target.id, comment))
                .await?;
            trace!(subsystem = "merge", op = "insert comment", tag_id = %target.id, "Appended comment");
        }
        MergeChange::AttributeAdded { node, ref name } => {
            let target = tree.node(node);
            let Some(value) = target.attributes.get(name) else {
                return Ok(());
            };
            store
                .attributes()
                .insert(NewAttribute {
                    tag_id: target.id,
                    name: name.clone(),
                    value: value.clone(),
                })
                .await?;
            trace!(subsystem = "merge", op = "insert attribute", tag_id = %target.id, name = %name, "Added attribute");
        }
    }
    Ok(())
}

// =============================================================================
// COUNT PROPAGATION
// =============================================================================

/// Totals from one count propagation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountUpdate {
    /// Events of the new batch processed.
    pub events: usize,
    /// Newly used pathnames across all events.
    pub paths: usize,
    /// Increments issued (one per expanded ancestor).
    pub increments: usize,
    /// Rows the increments actually changed.
    pub rows_updated: u64,
}

/// Increment the count of every ancestor of every newly used pathname.
///
/// Each occurrence counts: a pathname used twice increments its ancestors
/// twice. Increments go out event by event as they are computed.
pub async fn propagate_counts(
    store: &dyn HedStore,
    old_batch: &str,
    new_batch: &str,
    format: BatchFormat,
) -> Result<CountUpdate> {
    let start = Instant::now();
    let old = parse_batch(old_batch, format)?;
    let new = parse_batch(new_batch, format)?;

    let mut update = CountUpdate::default();
    for (code, paths) in new_tag_usages(&old, &new) {
        update.events += 1;
        for path in &paths {
            update.paths += 1;
            for ancestor in expand_ancestors(path) {
                let rows = store.tags().increment_count(&ancestor).await?;
                update.increments += 1;
                update.rows_updated += rows;
                if rows == 0 {
                    warn!(
                        subsystem = "counts",
                        component = "propagator",
                        event_code = %code,
                        pathname = %ancestor,
                        "Count increment matched no tag"
                    );
                }
            }
        }
        debug!(
            subsystem = "counts",
            component = "propagator",
            event_code = %code,
            result_count = paths.len(),
            "Propagated event counts"
        );
    }

    info!(
        subsystem = "counts",
        component = "propagator",
        format = format.as_str(),
        events = update.events,
        increments = update.increments,
        rows_updated = update.rows_updated,
        duration_ms = start.elapsed().as_millis() as u64,
        "Updated tag counts"
    );
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    const DOC: &str = r#"<HED>
        <node>
            <name>Item</name>
            <description>An independently existing thing</description>
            <node extensionAllowed="true">
                <name>Object</name>
                <comment><date>2014-03-05T10:20:30</date><author>kay</author><text>Physical</text></comment>
            </node>
        </node>
        <node><name>Event</name></node>
    </HED>"#;

    #[tokio::test]
    async fn test_merge_into_empty_store_persists_everything() {
        let store = InMemoryStore::new();
        let src = xml::parse_document(DOC).unwrap();

        let merged = merge_into_store(&store, &src, false).await.unwrap();
        assert_eq!(merged.report.nodes_added(), 3);
        assert_eq!(store.tags().count_all().await.unwrap(), 3);

        let object = store.tags().fetch_by_pathname("/Item/Object").await.unwrap();
        let item = store.tags().fetch_by_pathname("/Item").await.unwrap();
        assert_eq!(object.parent_id, Some(item.id));
        assert_eq!(object.count, 0);
        assert_eq!(
            item.description.as_deref(),
            Some("An independently existing thing")
        );

        let tree = load_tree(&store, true).await.unwrap();
        let handle = tree.find("/Item/Object").unwrap();
        let node = tree.node(handle);
        assert_eq!(node.id, object.id);
        assert_eq!(node.count, Some(0));
        assert_eq!(node.attributes.get("extensionAllowed").map(String::as_str), Some("true"));
        assert_eq!(node.comments.len(), 1);
        assert_eq!(node.comments[0].author.as_deref(), Some("kay"));
    }

    #[tokio::test]
    async fn test_store_merge_is_idempotent() {
        let store = InMemoryStore::new();
        let src = xml::parse_document(DOC).unwrap();
        merge_into_store(&store, &src, false).await.unwrap();
        let rows = store.tag_rows();
        let writes = store.write_count();

        let again = merge_into_store(&store, &src, false).await.unwrap();
        assert!(again.report.is_empty());
        assert_eq!(store.tag_rows(), rows);
        assert_eq!(store.write_count(), writes);
    }

    type TagSnapshot = (String, Option<String>, Vec<(String, String)>, Vec<String>);

    /// Everything a merge writes, keyed by pathname.
    async fn snapshot(store: &InMemoryStore) -> Vec<TagSnapshot> {
        let mut rows = Vec::new();
        for tag in store.tag_rows() {
            let mut attributes: Vec<(String, String)> = store
                .attributes()
                .list_for_tag(tag.id)
                .await
                .unwrap()
                .into_iter()
                .map(|a| (a.name, a.value))
                .collect();
            attributes.sort();
            let comments = store
                .comments()
                .list_for_tag(tag.id)
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.text)
                .collect();
            rows.push((tag.pathname, tag.description, attributes, comments));
        }
        rows.sort();
        rows
    }

    #[tokio::test]
    async fn test_interrupted_merge_completes_on_rerun() {
        let src = xml::parse_document(DOC).unwrap();
        let complete = InMemoryStore::new();
        merge_into_store(&complete, &src, false).await.unwrap();
        let expected = snapshot(&complete).await;
        let total_writes = complete.write_count();
        assert_eq!(total_writes, 5);

        for limit in 0..total_writes {
            let store = InMemoryStore::new().with_write_limit(limit);
            let err = merge_into_store(&store, &src, false).await.unwrap_err();
            assert!(matches!(err, crate::Error::Persistence { .. }), "limit {}", limit);
            assert_eq!(store.write_count(), limit);

            store.clear_write_limit();
            merge_into_store(&store, &src, false).await.unwrap();
            assert_eq!(snapshot(&store).await, expected, "limit {}", limit);
            assert!(merge_into_store(&store, &src, false).await.unwrap().report.is_empty());
        }
    }

    #[tokio::test]
    async fn test_duplicate_source_names_store_each_comment_once() {
        let mut src = TagTree::new();
        let first = src.add_node(None, "Event");
        src.node_mut(first).comments.push(TagComment::new("one"));
        let second = src.add_node(None, "Event");
        src.node_mut(second).comments.push(TagComment::new("two"));

        let store = InMemoryStore::new();
        let merged = merge_into_store(&store, &src, false).await.unwrap();
        assert_eq!(merged.report.nodes_added(), 1);
        assert_eq!(merged.report.comments_appended(), 0);

        let event = store.tags().fetch_by_pathname("/Event").await.unwrap();
        let texts: Vec<String> = store
            .comments()
            .list_for_tag(event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_unnamed_nodes_inside_copied_subtree_are_not_stored() {
        let src = xml::parse_document(
            r#"<HED><node><name>A</name><node><description>x</description></node><node><description>y</description></node></node></HED>"#,
        )
        .unwrap();

        let store = InMemoryStore::new();
        merge_into_store(&store, &src, false).await.unwrap();
        let pathnames: Vec<String> = store.tag_rows().into_iter().map(|t| t.pathname).collect();
        assert_eq!(pathnames, vec!["/A"]);
    }

    #[tokio::test]
    async fn test_store_merge_adds_missing_attributes() {
        let store = InMemoryStore::new();
        merge_into_store(&store, &xml::parse_document(DOC).unwrap(), false)
            .await
            .unwrap();

        let update = xml::parse_document(
            r#"<HED><node requireChild="true"><name>Item</name>
                <node extensionAllowed="false" takesValue="true"><name>Object</name></node>
            </node></HED>"#,
        )
        .unwrap();
        let merged = merge_into_store(&store, &update, false).await.unwrap();
        assert_eq!(merged.report.attributes_added(), 2);

        let rows = snapshot(&store).await;
        let attributes = |pathname: &str| {
            rows.iter()
                .find(|r| r.0 == pathname)
                .map(|r| r.2.clone())
                .unwrap()
        };
        assert_eq!(
            attributes("/Item"),
            vec![("requireChild".to_string(), "true".to_string())]
        );
        assert_eq!(
            attributes("/Item/Object"),
            vec![
                ("extensionAllowed".to_string(), "true".to_string()),
                ("takesValue".to_string(), "true".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_store_merge_fills_description_and_comments() {
        let store = InMemoryStore::new();
        merge_into_store(&store, &xml::parse_document(DOC).unwrap(), false)
            .await
            .unwrap();

        let update = xml::parse_document(
            r#"<HED>
                <node><name>Item</name><description>Replacement</description>
                    <node><name>Object</name><comment><text>Physical</text></comment><comment><text>Solid</text></comment></node>
                </node>
                <node><name>Event</name><description>Something that happens</description></node>
            </HED>"#,
        )
        .unwrap();
        let merged = merge_into_store(&store, &update, false).await.unwrap();
        assert_eq!(merged.report.descriptions_adopted(), 1);
        assert_eq!(merged.report.comments_appended(), 1);

        let item = store.tags().fetch_by_pathname("/Item").await.unwrap();
        assert_eq!(item.description.as_deref(), Some("An independently existing thing"));
        let event = store.tags().fetch_by_pathname("/Event").await.unwrap();
        assert_eq!(event.description.as_deref(), Some("Something that happens"));

        let object = store.tags().fetch_by_pathname("/Item/Object").await.unwrap();
        let texts: Vec<String> = store
            .comments()
            .list_for_tag(object.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["Physical", "Solid"]);
    }

    #[tokio::test]
    async fn test_dump_counts_only_when_requested() {
        let store = InMemoryStore::new();
        merge_into_store(&store, &xml::parse_document(DOC).unwrap(), false)
            .await
            .unwrap();
        store.tags().increment_count("/Event").await.unwrap();

        let without = dump_xml(&store, false).await.unwrap();
        assert!(!without.contains("<count>"));
        let with = dump_xml(&store, true).await.unwrap();
        assert!(with.contains("<count>1</count>"));

        let tree = xml::parse_document(&with).unwrap();
        let names: Vec<String> = tree.roots().iter().map(|&r| tree.node(r).name.clone()).collect();
        assert_eq!(names, vec!["Item", "Event"]);
    }

    #[tokio::test]
    async fn test_propagate_counts_per_occurrence() {
        let store = InMemoryStore::new();
        merge_into_store(&store, &xml::parse_document(DOC).unwrap(), false)
            .await
            .unwrap();

        let update = propagate_counts(
            &store,
            "",
            r#"[{"code": "1", "tags": [["/Item/Object", "/Item/Object"]]}]"#,
            BatchFormat::Json,
        )
        .await
        .unwrap();

        assert_eq!(update.events, 1);
        assert_eq!(update.paths, 2);
        assert_eq!(update.increments, 4);
        assert_eq!(update.rows_updated, 4);
        assert_eq!(store.tags().fetch_by_pathname("/Item").await.unwrap().count, 2);
        assert_eq!(store.tags().fetch_by_pathname("/Item/Object").await.unwrap().count, 2);
    }
}
