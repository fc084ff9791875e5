//! Arena-backed tag tree.
//!
//! A [`TagTree`] owns every [`TagNode`] of one document instance. Nodes are
//! addressed by [`NodeId`] handles into the arena; parent/child structure is
//! kept as handle lists, and the node's stable [`Uuid`] is the only notion of
//! identity that leaves the tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::TagComment;
use crate::xml::XmlElement;

/// Handle of a node inside one [`TagTree`]. Not meaningful across trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One entry in the tag hierarchy.
#[derive(Debug, Clone)]
pub struct TagNode {
    /// Stable identifier, assigned once.
    pub id: Uuid,
    /// Identifier of the parent tag; `None` for top-level tags.
    pub parent_id: Option<Uuid>,
    /// Final pathname segment.
    pub name: String,
    pub description: Option<String>,
    /// Usage counter; `None` when the tree was built without counts.
    pub count: Option<i32>,
    pub attributes: BTreeMap<String, String>,
    pub comments: Vec<TagComment>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TagNode {
    fn new(name: String, parent: Option<NodeId>, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            parent_id,
            name,
            description: None,
            count: None,
            attributes: BTreeMap::new(),
            comments: Vec::new(),
            created_at: now,
            last_modified: now,
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether a comment with this exact text is already attached.
    pub fn has_comment_text(&self, text: &str) -> bool {
        self.comments.iter().any(|c| c.text == text)
    }

    /// Record a modification (attribute or comment added).
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// A rooted tag hierarchy.
///
/// The document root (`<HED>`) is implicit: top-level tags are the tree's
/// roots and have no parent.
#[derive(Debug, Clone, Default)]
pub struct TagTree {
    nodes: Vec<TagNode>,
    roots: Vec<NodeId>,
    /// Attributes carried by the document root element (e.g. `version`).
    pub root_attributes: BTreeMap<String, String>,
    /// Non-tag sections of the document root, kept verbatim (e.g. `unitClasses`).
    pub sections: Vec<XmlElement>,
}

impl TagTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.nodes[id.0].children,
            None => &self.roots,
        }
    }

    pub fn node(&self, id: NodeId) -> &TagNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TagNode {
        &mut self.nodes[id.0]
    }

    /// Append a new node named `name` under `parent` with a freshly minted identifier.
    pub fn add_node(&mut self, parent: Option<NodeId>, name: impl Into<String>) -> NodeId {
        let parent_id = parent.map(|p| self.nodes[p.0].id);
        let id = NodeId(self.nodes.len());
        self.nodes.push(TagNode::new(name.into(), parent, parent_id));
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// First child of `parent` carrying `name`.
    pub fn child_named(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&c| self.nodes[c.0].name == name)
    }

    /// Full `/`-delimited pathname of a node.
    pub fn pathname(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &self.nodes[current.0];
            segments.push(node.name.as_str());
            cursor = node.parent;
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// Resolve a pathname by walking names from the roots.
    pub fn find(&self, pathname: &str) -> Option<NodeId> {
        let mut cursor = None;
        for segment in pathname.strip_prefix('/').unwrap_or(pathname).split('/') {
            cursor = Some(self.child_named(cursor, segment)?);
        }
        cursor
    }

    /// Find a node by its stable identifier.
    pub fn find_by_id(&self, id: Uuid) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.id == id).map(NodeId)
    }

    /// `id` and all of its descendants, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current.0].children.iter().rev().copied());
        }
        out
    }

    /// Every node in document order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().flat_map(move |&r| self.descendants(r))
    }

    /// Deep-copy `src_node` (from another tree) under `dest_parent`.
    ///
    /// Every copied node gets a fresh identifier and is linked to its new
    /// parent. Unnamed nodes are left out together with their subtrees.
    /// Returns the copied handles, parents before children.
    pub fn copy_subtree(
        &mut self,
        dest_parent: Option<NodeId>,
        src: &TagTree,
        src_node: NodeId,
    ) -> Vec<NodeId> {
        let mut copied = Vec::new();
        let mut pending = vec![(dest_parent, src_node)];
        while let Some((parent, from)) = pending.pop() {
            let source = src.node(from);
            if source.name.is_empty() {
                continue;
            }
            let to = self.add_node(parent, source.name.clone());
            let node = &mut self.nodes[to.0];
            node.description = source.description.clone();
            node.count = source.count;
            node.attributes = source.attributes.clone();
            node.comments = source.comments.clone();
            copied.push(to);
            pending.extend(source.children.iter().rev().map(|&c| (Some(to), c)));
        }
        copied
    }

    /// Attach an already-identified node (read back from a store).
    pub fn attach_existing(
        &mut self,
        parent: Option<NodeId>,
        id: Uuid,
        name: impl Into<String>,
    ) -> NodeId {
        let handle = self.add_node(parent, name);
        self.nodes[handle.0].id = id;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (TagTree, NodeId, NodeId, NodeId) {
        let mut tree = TagTree::new();
        let item = tree.add_node(None, "Item");
        let object = tree.add_node(Some(item), "Object");
        let person = tree.add_node(Some(object), "Person");
        (tree, item, object, person)
    }

    #[test]
    fn test_pathname_walks_parents() {
        let (tree, item, _, person) = sample();
        assert_eq!(tree.pathname(item), "/Item");
        assert_eq!(tree.pathname(person), "/Item/Object/Person");
    }

    #[test]
    fn test_parent_ids_link_to_parent_node() {
        let (tree, item, object, person) = sample();
        assert_eq!(tree.node(item).parent_id, None);
        assert_eq!(tree.node(object).parent_id, Some(tree.node(item).id));
        assert_eq!(tree.node(person).parent(), Some(object));
    }

    #[test]
    fn test_find_by_pathname() {
        let (tree, _, object, person) = sample();
        assert_eq!(tree.find("/Item/Object"), Some(object));
        assert_eq!(tree.find("/Item/Object/Person"), Some(person));
        assert_eq!(tree.find("/Item/Nothing"), None);
    }

    #[test]
    fn test_descendants_are_preorder() {
        let (mut tree, item, object, person) = sample();
        let shape = tree.add_node(Some(item), "3D shape");
        assert_eq!(tree.descendants(item), vec![item, object, person, shape]);
        assert_eq!(tree.iter().count(), 4);
    }

    #[test]
    fn test_copy_subtree_mints_fresh_ids() {
        let (src, item, _, _) = sample();
        let mut dest = TagTree::new();
        let copied = dest.copy_subtree(None, &src, item);

        assert_eq!(copied.len(), 3);
        assert_eq!(dest.pathname(copied[2]), "/Item/Object/Person");
        for (&d, s) in copied.iter().zip(src.descendants(item)) {
            assert_ne!(dest.node(d).id, src.node(s).id);
        }
        assert_eq!(
            dest.node(copied[1]).parent_id,
            Some(dest.node(copied[0]).id)
        );
    }

    #[test]
    fn test_copy_subtree_leaves_out_unnamed_nodes() {
        let mut src = TagTree::new();
        let a = src.add_node(None, "A");
        let unnamed = src.add_node(Some(a), "");
        src.add_node(Some(unnamed), "Hidden");
        src.add_node(Some(a), "");
        src.add_node(Some(a), "B");

        let mut dest = TagTree::new();
        let copied = dest.copy_subtree(None, &src, a);

        let paths: Vec<String> = copied.iter().map(|&c| dest.pathname(c)).collect();
        assert_eq!(paths, vec!["/A", "/A/B"]);
        assert_eq!(dest.len(), 2);
    }

    #[test]
    fn test_child_named_first_name_wins() {
        let mut tree = TagTree::new();
        let first = tree.add_node(None, "Event");
        tree.add_node(None, "Event");
        assert_eq!(tree.child_named(None, "Event"), Some(first));
    }

    #[test]
    fn test_attach_existing_keeps_identifier() {
        let mut tree = TagTree::new();
        let id = Uuid::now_v7();
        let handle = tree.attach_existing(None, id, "Event");
        assert_eq!(tree.node(handle).id, id);
        assert_eq!(tree.find_by_id(id), Some(handle));
    }
}
