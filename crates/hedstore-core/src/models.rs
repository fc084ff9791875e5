//! Record types shared by the tree model and the entity mappers.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Format used for `<date>` elements inside comments, e.g. `2014-03-05T10:20:30-06:00`.
pub const COMMENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Whether an optional text field counts as empty (absent or zero length).
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, str::is_empty)
}

/// The last `/`-delimited segment of a pathname.
pub fn name_from_pathname(pathname: &str) -> &str {
    match pathname.rfind('/') {
        Some(idx) => &pathname[idx + 1..],
        None => pathname,
    }
}

/// A comment attached to a tag.
///
/// Two comments are the same comment when their `text` is identical; author
/// and date do not participate in deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagComment {
    pub date: Option<DateTime<FixedOffset>>,
    pub author: Option<String>,
    pub text: String,
}

impl TagComment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            date: None,
            author: None,
            text: text.into(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Date to persist: the comment's own date, or now when it has none.
    pub fn date_or_now(&self) -> DateTime<Utc> {
        self.date
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

/// Parse a comment `<date>` value.
///
/// Accepts RFC 3339 (with offset), a bare `YYYY-MM-DDTHH:MM:SS` (read as UTC),
/// and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_comment_date(raw: &str) -> Result<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc().fixed_offset());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    Err(Error::MalformedDocument(format!(
        "Unrecognized comment date '{}'",
        raw
    )))
}

/// Render a comment date the way documents carry it.
pub fn format_comment_date(date: &DateTime<FixedOffset>) -> String {
    date.format(COMMENT_DATE_FORMAT).to_string()
}

// =============================================================================
// STORE ROWS
// =============================================================================

/// A row of the `tags` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: Uuid,
    pub pathname: String,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    pub count: i32,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl TagRecord {
    pub fn name(&self) -> &str {
        name_from_pathname(&self.pathname)
    }
}

/// A row of the `tag_attributes` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub id: Uuid,
    pub tag_id: Uuid,
    pub name: String,
    pub value: String,
}

/// A row of the `tag_comments` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub tag_id: Uuid,
    pub date: DateTime<Utc>,
    pub author: Option<String>,
    pub text: String,
}

impl From<CommentRecord> for TagComment {
    fn from(record: CommentRecord) -> Self {
        Self {
            date: Some(record.date.fixed_offset()),
            author: record.author,
            text: record.text,
        }
    }
}

// =============================================================================
// INSERT REQUESTS
// =============================================================================

/// Request for inserting a tag row.
///
/// New tags always start with a zero count; counts only ever move through
/// increments afterwards.
#[derive(Debug, Clone)]
pub struct NewTag {
    pub id: Uuid,
    pub pathname: String,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    pub owner: Option<String>,
}

/// Request for inserting an attribute row.
#[derive(Debug, Clone)]
pub struct NewAttribute {
    pub tag_id: Uuid,
    pub name: String,
    pub value: String,
}

/// Request for inserting a comment row.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub tag_id: Uuid,
    pub date: DateTime<Utc>,
    pub author: Option<String>,
    pub text: String,
}

impl NewComment {
    pub fn from_comment(tag_id: Uuid, comment: &TagComment) -> Self {
        Self {
            tag_id,
            date: comment.date_or_now(),
            author: comment.author.clone(),
            text: comment.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_blank() {
        assert!(is_blank(None));
        assert!(is_blank(Some("")));
        assert!(!is_blank(Some(" ")));
        assert!(!is_blank(Some("A person")));
    }

    #[test]
    fn test_name_from_pathname() {
        assert_eq!(name_from_pathname("/Item/Object/Person"), "Person");
        assert_eq!(name_from_pathname("/Item"), "Item");
        assert_eq!(name_from_pathname("Item"), "Item");
    }

    #[test]
    fn test_parse_comment_date_rfc3339_keeps_offset() {
        let dt = parse_comment_date("2014-03-05T10:20:30-06:00").unwrap();
        assert_eq!(format_comment_date(&dt), "2014-03-05T10:20:30-06:00");
    }

    #[test]
    fn test_parse_comment_date_naive_is_utc() {
        let dt = parse_comment_date("2014-03-05T10:20:30").unwrap();
        assert_eq!(format_comment_date(&dt), "2014-03-05T10:20:30+00:00");

        let day = parse_comment_date("2014-03-05").unwrap();
        assert_eq!(format_comment_date(&day), "2014-03-05T00:00:00+00:00");
    }

    #[test]
    fn test_parse_comment_date_rejects_garbage() {
        let err = parse_comment_date("last tuesday").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_comment_record_into_tag_comment() {
        let date = Utc::now();
        let record = CommentRecord {
            id: Uuid::now_v7(),
            tag_id: Uuid::now_v7(),
            date,
            author: Some("kay".to_string()),
            text: "Needs review".to_string(),
        };
        let comment: TagComment = record.into();
        assert_eq!(comment.text, "Needs review");
        assert_eq!(comment.date.map(|d| d.with_timezone(&Utc)), Some(date));
    }
}
