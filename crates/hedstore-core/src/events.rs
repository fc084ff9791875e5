//! Tag-usage batches and the path arithmetic behind count propagation.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One tagged event: a code plus the groups of tag pathnames it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEvent {
    pub code: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

impl TaggedEvent {
    /// All pathnames of the event, groups flattened in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().flatten().map(String::as_str)
    }
}

/// Serialization of a usage batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchFormat {
    /// `[{"code": "...", "tags": [["/a/b", ...], ...]}, ...]`
    #[default]
    Json,
    /// `code,label,description,tag,tag;code,...`
    Delimited,
}

impl BatchFormat {
    /// Guess the format from the text: JSON batches are arrays.
    pub fn detect(text: &str) -> Self {
        if text.trim_start().starts_with('[') {
            BatchFormat::Json
        } else {
            BatchFormat::Delimited
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchFormat::Json => "json",
            BatchFormat::Delimited => "delimited",
        }
    }
}

impl FromStr for BatchFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(BatchFormat::Json),
            "delimited" | "text" => Ok(BatchFormat::Delimited),
            other => Err(Error::InvalidInput(format!(
                "Unknown batch format '{}'",
                other
            ))),
        }
    }
}

/// Decode a usage batch.
pub fn parse_batch(text: &str, format: BatchFormat) -> Result<Vec<TaggedEvent>> {
    match format {
        BatchFormat::Json if text.trim().is_empty() => Ok(Vec::new()),
        BatchFormat::Json => Ok(serde_json::from_str(text)?),
        BatchFormat::Delimited => Ok(parse_delimited(text)),
    }
}

fn parse_delimited(text: &str) -> Vec<TaggedEvent> {
    let flat = text.replace(['\r', '\n'], "");
    flat.split(';')
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let mut fields = record.split(',').map(str::trim);
            let code = fields.next().unwrap_or_default().to_string();
            let mut tags = Vec::new();
            // label and description
            for field in fields.by_ref().take(2) {
                if !field.is_empty() {
                    tags.push(vec![field.to_string()]);
                }
            }
            let rest: Vec<String> = fields
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            if !rest.is_empty() {
                tags.push(rest);
            }
            TaggedEvent { code, tags }
        })
        .collect()
}

/// Every ancestor pathname of `path`, root first, ending with `path` itself.
///
/// ```
/// use hedstore_core::events::expand_ancestors;
/// assert_eq!(
///     expand_ancestors("/Item/Object/Person"),
///     vec!["/Item", "/Item/Object", "/Item/Object/Person"]
/// );
/// ```
pub fn expand_ancestors(path: &str) -> Vec<String> {
    let rooted = path.starts_with('/');
    let mut prefix = String::new();
    let mut out = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if rooted || !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        out.push(prefix.clone());
    }
    out
}

/// Pathnames newly used by each event of `new` compared with `old`.
///
/// Events are matched by code (the last old event with a code wins). For a
/// matched event the result is the textual set difference, keeping repeats
/// from the new event; an unmatched event contributes all of its pathnames.
pub fn new_tag_usages(old: &[TaggedEvent], new: &[TaggedEvent]) -> Vec<(String, Vec<String>)> {
    let previous: HashMap<&str, &TaggedEvent> =
        old.iter().map(|e| (e.code.as_str(), e)).collect();

    new.iter()
        .map(|event| {
            let paths: Vec<String> = match previous.get(event.code.as_str()) {
                Some(before) => {
                    let known: HashSet<&str> = before.paths().collect();
                    event
                        .paths()
                        .filter(|p| !known.contains(p))
                        .map(str::to_string)
                        .collect()
                }
                None => event.paths().map(str::to_string).collect(),
            };
            (event.code.clone(), paths)
        })
        .collect()
}
