//! # hedstore-core
//!
//! Core types, tree model, and merge engine for HED tag hierarchies.
//!
//! This crate holds everything that does not depend on a particular store:
//! the arena-backed [`TagTree`], XML conversion, the directional merge, usage
//! batch parsing, XSD validation, and the repository traits that storage
//! backends implement.

pub mod error;
pub mod events;
pub mod logging;
pub mod memory;
pub mod merge;
pub mod models;
pub mod schema;
pub mod store;
pub mod traits;
pub mod tree;
pub mod xml;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{expand_ancestors, new_tag_usages, parse_batch, BatchFormat, TaggedEvent};
pub use memory::InMemoryStore;
pub use merge::{merge_trees, merge_xml, MergeChange, MergeReport};
pub use models::*;
pub use schema::{validate_with_default_schema, validate_with_schema, Schema, DEFAULT_SCHEMA_URL};
pub use store::{
    dump_xml, load_tree, merge_into_store, merge_xml_into_store, propagate_counts, CountUpdate,
    StoreMerge,
};
pub use traits::*;
pub use tree::{NodeId, TagNode, TagTree};
pub use xml::{parse_document, to_xml_string, XmlElement};
