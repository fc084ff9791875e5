//! Directional gap-filling merge of two tag trees.
//!
//! `dest` is authoritative for everything it already has. `src` only
//! contributes children `dest` lacks, descriptions where `dest`'s is blank,
//! attributes `dest` does not carry, and comments whose text `dest` has not
//! seen yet.

use std::collections::HashSet;

use tracing::debug;

use crate::error::Result;
use crate::models::is_blank;
use crate::tree::{NodeId, TagNode, TagTree};
use crate::xml;

/// One modification applied to the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeChange {
    /// A node copied from the source; parents are always reported before their children.
    NodeAdded(NodeId),
    /// A blank description replaced by the source's.
    DescriptionAdopted(NodeId),
    /// A source comment appended at `index` of the node's comment list.
    CommentAppended { node: NodeId, index: usize },
    /// A source attribute the node did not carry.
    AttributeAdded { node: NodeId, name: String },
}

/// Ordered record of what a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub changes: Vec<MergeChange>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn nodes_added(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, MergeChange::NodeAdded(_)))
            .count()
    }

    pub fn descriptions_adopted(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, MergeChange::DescriptionAdopted(_)))
            .count()
    }

    pub fn comments_appended(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, MergeChange::CommentAppended { .. }))
            .count()
    }

    pub fn attributes_added(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, MergeChange::AttributeAdded { .. }))
            .count()
    }
}

/// Absorb `src` into `dest`.
///
/// Document-level data follows the same rule: root attributes and top-level
/// sections missing from `dest` are copied over, existing ones are kept.
pub fn merge_trees(dest: &mut TagTree, src: &TagTree) -> MergeReport {
    let mut report = MergeReport::default();
    let mut added = HashSet::new();
    merge_level(dest, src, None, None, &mut added, &mut report);

    for (key, value) in &src.root_attributes {
        dest.root_attributes
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    for section in &src.sections {
        if !dest.sections.iter().any(|s| s.name == section.name) {
            dest.sections.push(section.clone());
        }
    }

    debug!(
        subsystem = "merge",
        op = "merge_trees",
        change_count = report.len(),
        nodes_added = report.nodes_added(),
        attributes_added = report.attributes_added(),
        "Merged tag trees"
    );
    report
}

fn merge_level(
    dest: &mut TagTree,
    src: &TagTree,
    dest_parent: Option<NodeId>,
    src_parent: Option<NodeId>,
    added: &mut HashSet<NodeId>,
    report: &mut MergeReport,
) {
    for &src_child in src.children(src_parent) {
        let source = src.node(src_child);
        if source.name.is_empty() {
            continue;
        }

        match dest.child_named(dest_parent, &source.name) {
            None => {
                for copied in dest.copy_subtree(dest_parent, src, src_child) {
                    dedup_comments(dest.node_mut(copied));
                    added.insert(copied);
                    report.changes.push(MergeChange::NodeAdded(copied));
                }
            }
            Some(matched) => {
                // A node added by this merge is persisted with its final content
                let fresh = added.contains(&matched);
                let mut changes = reconcile(dest, matched, source);
                if !fresh {
                    report.changes.append(&mut changes);
                }
                merge_level(dest, src, Some(matched), Some(src_child), added, report);
            }
        }
    }
}

fn reconcile(dest: &mut TagTree, matched: NodeId, source: &TagNode) -> Vec<MergeChange> {
    let mut changes = Vec::new();
    let node = dest.node_mut(matched);

    if is_blank(node.description.as_deref()) && !is_blank(source.description.as_deref()) {
        node.description = source.description.clone();
        changes.push(MergeChange::DescriptionAdopted(matched));
    }

    for (name, value) in &source.attributes {
        if !node.attributes.contains_key(name) {
            node.attributes.insert(name.clone(), value.clone());
            node.touch();
            changes.push(MergeChange::AttributeAdded {
                node: matched,
                name: name.clone(),
            });
        }
    }

    let mut seen: HashSet<String> = node.comments.iter().map(|c| c.text.clone()).collect();
    for comment in &source.comments {
        if seen.insert(comment.text.clone()) {
            node.comments.push(comment.clone());
            node.touch();
            changes.push(MergeChange::CommentAppended {
                node: matched,
                index: node.comments.len() - 1,
            });
        }
    }
    changes
}

fn dedup_comments(node: &mut TagNode) {
    let mut seen = HashSet::new();
    node.comments.retain(|c| seen.insert(c.text.clone()));
}

/// Merge two XML documents: `old` is the destination, `new` fills its gaps.
pub fn merge_xml(old: &str, new: &str) -> Result<String> {
    let mut dest = xml::parse_document(old)?;
    let src = xml::parse_document(new)?;
    merge_trees(&mut dest, &src);
    xml::to_xml_string(&dest)
}
