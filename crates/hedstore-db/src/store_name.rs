//! Store (database) name validation.
//!
//! `CREATE DATABASE` and `DROP DATABASE` cannot take bind parameters, so the
//! name is interpolated into the statement and must be checked first.

use hedstore_core::{Error, Result};

/// PostgreSQL identifier length limit.
const MAX_NAME_LEN: usize = 63;

const RESERVED_NAMES: &[&str] = &[
    "postgres",
    "template0",
    "template1",
    "select",
    "insert",
    "update",
    "delete",
    "drop",
    "create",
    "alter",
    "grant",
    "revoke",
    "truncate",
];

/// Validate a store name for use as an unquoted PostgreSQL database name.
///
/// Unquoted identifiers are folded to lower case by the server, so only
/// lower-case names are accepted; the stored name then matches the one given.
///
/// # Examples
///
/// ```
/// use hedstore_db::validate_store_name;
///
/// assert!(validate_store_name("tagsdb").is_ok());
/// assert!(validate_store_name("hed_tags_2014").is_ok());
/// assert!(validate_store_name("2014tags").is_err());
/// assert!(validate_store_name("TagsDB").is_err());
/// assert!(validate_store_name("tags; DROP").is_err());
/// ```
pub fn validate_store_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("Store name cannot be empty".to_string()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "Store name exceeds {} character limit: {} characters",
            MAX_NAME_LEN,
            name.len()
        )));
    }

    if let Some(first) = name.chars().next() {
        if !first.is_ascii_lowercase() && first != '_' {
            return Err(Error::InvalidInput(format!(
                "Store name must start with a lower-case letter or underscore, found: '{}'",
                first
            )));
        }
    }

    if let Some(ch) = name
        .chars()
        .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '_')
    {
        return Err(Error::InvalidInput(format!(
            "Store name contains invalid character: '{}'. Only lower-case letters, digits and underscore allowed",
            ch
        )));
    }

    if RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidInput(format!(
            "Store name '{}' is reserved",
            name
        )));
    }

    Ok(())
}
