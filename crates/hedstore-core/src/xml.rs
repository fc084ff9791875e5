//! XML conversion for tag hierarchies.
//!
//! Document layout:
//!
//! ```xml
//! <HED version="2.0">
//!    <node extensionAllowed="true">
//!       <name>Event</name>
//!       <description>Something that happens</description>
//!       <count>3</count>
//!       <comment>
//!          <date>2014-03-05T10:20:30-06:00</date>
//!          <author>kay</author>
//!          <text>Needs review</text>
//!       </comment>
//!       <node>...</node>
//!    </node>
//!    <unitClasses>...</unitClasses>
//! </HED>
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::{format_comment_date, parse_comment_date, TagComment};
use crate::tree::{NodeId, TagTree};

/// Name of the document root element.
pub const ROOT_ELEMENT: &str = "HED";
/// Element carrying one tag.
pub const NODE_ELEMENT: &str = "node";

const INDENT: usize = 3;

static INTER_TAG_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">\s+<").expect("valid regex"));

static EMPTY_UNIT_CLASSES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<unitClasses\s*>\s*</unitClasses\s*>|<unitClasses\s*/>").expect("valid regex")
});

/// A generic XML element: used for non-tag document sections and for XSD schemas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Element name without a namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name() == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.local_name() == name)
    }

    /// Text of the first child with the given local name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

pub(crate) fn local(name: &str) -> &str {
    match name.find(':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Apply the pre-parse normalizations: drop whitespace-only text between tags
/// and strip an empty `unitClasses` wrapper.
pub fn normalize(xml: &str) -> String {
    let compact = INTER_TAG_WHITESPACE.replace_all(xml.trim(), "><");
    EMPTY_UNIT_CLASSES.replace_all(&compact, "").into_owned()
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| Error::MalformedDocument(e.to_string()))
}

fn start_to_element(start: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Parse an XML string into a generic element tree (no normalization applied).
pub fn parse_element(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(Error::MalformedDocument(
                        "content after the document element".to_string(),
                    ));
                }
                stack.push(start_to_element(&start)?);
            }
            Event::Empty(start) => {
                let element = start_to_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(Error::MalformedDocument(
                            "multiple document elements".to_string(),
                        ))
                    }
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    Error::MalformedDocument("unbalanced closing tag".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(Error::MalformedDocument(
                            "text outside the document element".to_string(),
                        ))
                    }
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&utf8(&data)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::MalformedDocument(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| Error::MalformedDocument("document has no root element".to_string()))
}

/// Parse a tag-hierarchy document into a [`TagTree`].
///
/// Every parsed node receives a freshly minted identifier.
pub fn parse_document(xml: &str) -> Result<TagTree> {
    let root = parse_element(&normalize(xml))?;
    let mut tree = TagTree::new();
    tree.root_attributes = root.attributes.iter().cloned().collect();

    for child in root.children {
        if child.name == NODE_ELEMENT {
            build_node(&mut tree, None, &child)?;
        } else {
            tree.sections.push(child);
        }
    }
    tracing::trace!(
        subsystem = "tree",
        op = "parse",
        node_count = tree.len(),
        "Parsed tag document"
    );
    Ok(tree)
}

fn build_node(tree: &mut TagTree, parent: Option<NodeId>, element: &XmlElement) -> Result<()> {
    let name = element.child_text("name").unwrap_or_default().to_string();
    let handle = tree.add_node(parent, name);

    let count = match element.child_text("count") {
        Some(raw) => Some(raw.trim().parse::<i32>().map_err(|e| {
            Error::MalformedDocument(format!("invalid count '{}': {}", raw, e))
        })?),
        None => None,
    };

    let mut comments = Vec::new();
    for comment in element.children_named("comment") {
        let date = match comment.child_text("date") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_comment_date(raw)?),
            _ => None,
        };
        comments.push(TagComment {
            date,
            author: comment.child_text("author").map(str::to_string),
            text: comment.child_text("text").unwrap_or_default().to_string(),
        });
    }

    let node = tree.node_mut(handle);
    node.description = element.child_text("description").map(str::to_string);
    node.count = count;
    node.attributes = element.attributes.iter().cloned().collect::<BTreeMap<_, _>>();
    node.comments = comments;

    for child in element.children_named(NODE_ELEMENT) {
        build_node(tree, Some(handle), child)?;
    }
    Ok(())
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Serialize a tree as an indented XML document.
pub fn to_xml_string(tree: &TagTree) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;

    let mut root = BytesStart::new(ROOT_ELEMENT);
    for (key, value) in &tree.root_attributes {
        root.push_attribute((key.as_str(), value.as_str()));
    }
    if tree.roots().is_empty() && tree.sections.is_empty() {
        writer.write_event(Event::Empty(root))?;
    } else {
        writer.write_event(Event::Start(root))?;
        for &node in tree.roots() {
            write_node(&mut writer, tree, node)?;
        }
        for section in &tree.sections {
            write_element(&mut writer, section)?;
        }
        writer.write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))?;
    }

    String::from_utf8(writer.into_inner()).map_err(|e| Error::Serialization(e.to_string()))
}

fn write_text<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    if text.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(name)))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn write_node<W: std::io::Write>(writer: &mut Writer<W>, tree: &TagTree, id: NodeId) -> Result<()> {
    let node = tree.node(id);
    let mut start = BytesStart::new(NODE_ELEMENT);
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(start))?;

    write_text(writer, "name", &node.name)?;
    if let Some(description) = &node.description {
        write_text(writer, "description", description)?;
    }
    if let Some(count) = node.count {
        write_text(writer, "count", &count.to_string())?;
    }
    for comment in &node.comments {
        writer.write_event(Event::Start(BytesStart::new("comment")))?;
        if let Some(date) = &comment.date {
            write_text(writer, "date", &format_comment_date(date))?;
        }
        if let Some(author) = &comment.author {
            write_text(writer, "author", author)?;
        }
        write_text(writer, "text", &comment.text)?;
        writer.write_event(Event::End(BytesEnd::new("comment")))?;
    }
    for &child in node.children() {
        write_node(writer, tree, child)?;
    }

    writer.write_event(Event::End(BytesEnd::new(NODE_ELEMENT)))?;
    Ok(())
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.text.is_empty() && element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    if !element.text.is_empty() {
        writer.write_event(Event::Text(BytesText::new(&element.text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}
