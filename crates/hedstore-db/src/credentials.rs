//! Store credentials and the credentials file.
//!
//! A credentials file is a `key=value` property file with exactly five keys:
//! `dbname`, `hostname`, `port`, `username` and `password`.

use std::fmt;
use std::path::Path;

use sqlx::postgres::PgConnectOptions;
use tracing::debug;

use hedstore_core::{Error, Result};

const KEY_DBNAME: &str = "dbname";
const KEY_HOSTNAME: &str = "hostname";
const KEY_PORT: &str = "port";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";

/// Connection parameters for one tag store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub dbname: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("dbname", &self.dbname)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        dbname: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dbname: dbname.into(),
            hostname: hostname.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from a property file.
    ///
    /// Every one of the five keys must be present; unknown keys are rejected.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut dbname = None;
        let mut hostname = None;
        let mut port = None;
        let mut username = None;
        let mut password = None;

        for entry in entries {
            let (key, value) = entry.map_err(|e| {
                Error::Config(format!(
                    "Invalid line in credentials file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            match key.as_str() {
                KEY_DBNAME => dbname = Some(value),
                KEY_HOSTNAME => hostname = Some(value),
                KEY_PORT => {
                    let parsed = value.trim().parse::<u16>().map_err(|_| {
                        Error::Config(format!("Invalid port in credentials file: '{}'", value))
                    })?;
                    port = Some(parsed);
                }
                KEY_USERNAME => username = Some(value),
                KEY_PASSWORD => password = Some(value),
                other => {
                    return Err(Error::Config(format!(
                        "Unknown key '{}' in credentials file {}",
                        other,
                        path.display()
                    )))
                }
            }
        }

        let missing = |key: &str| {
            Error::Config(format!(
                "Credentials file {} is missing '{}'",
                path.display(),
                key
            ))
        };
        let credentials = Self {
            dbname: dbname.ok_or_else(|| missing(KEY_DBNAME))?,
            hostname: hostname.ok_or_else(|| missing(KEY_HOSTNAME))?,
            port: port.ok_or_else(|| missing(KEY_PORT))?,
            username: username.ok_or_else(|| missing(KEY_USERNAME))?,
            password: password.ok_or_else(|| missing(KEY_PASSWORD))?,
        };

        debug!(
            subsystem = "db",
            component = "credentials",
            op = "load",
            store = %credentials.dbname,
            host = %credentials.hostname,
            "Loaded credentials file"
        );
        Ok(credentials)
    }

    /// Write these credentials as a property file, replacing any existing file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let port = self.port.to_string();
        let mut contents = String::new();
        for (key, value) in [
            (KEY_DBNAME, self.dbname.as_str()),
            (KEY_HOSTNAME, self.hostname.as_str()),
            (KEY_PORT, port.as_str()),
            (KEY_USERNAME, self.username.as_str()),
            (KEY_PASSWORD, self.password.as_str()),
        ] {
            contents.push_str(key);
            contents.push('=');
            contents.push_str(&quote_value(key, value)?);
            contents.push('\n');
        }
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Connect options for the store these credentials name.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.hostname)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.dbname)
    }

    /// The same server and login, pointed at another store.
    pub fn for_store(&self, dbname: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            ..self.clone()
        }
    }
}

/// Plain values are written bare; anything else is single-quoted, which the
/// reader takes literally.
fn quote_value(key: &str, value: &str) -> Result<String> {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._-@:/".contains(c));
    if plain {
        return Ok(value.to_string());
    }
    if value.contains('\'') || value.contains('\n') {
        return Err(Error::Config(format!(
            "Value for '{}' cannot be written to a credentials file",
            key
        )));
    }
    Ok(format!("'{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file_reads_five_keys() {
        let file = write_file(
            "dbname=tagsdb\nhostname=localhost\nport=5432\nusername=postgres\npassword=secret\n",
        );
        let credentials = Credentials::from_file(file.path()).unwrap();
        assert_eq!(
            credentials,
            Credentials::new("tagsdb", "localhost", 5432, "postgres", "secret")
        );
    }

    #[test]
    fn test_from_file_missing_key() {
        let file = write_file("dbname=tagsdb\nhostname=localhost\nport=5432\nusername=postgres\n");
        match Credentials::from_file(file.path()) {
            Err(Error::Config(msg)) => assert!(msg.contains("password")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file_bad_port() {
        let file = write_file(
            "dbname=tagsdb\nhostname=localhost\nport=fifty\nusername=postgres\npassword=x\n",
        );
        assert!(matches!(
            Credentials::from_file(file.path()),
            Err(Error::Config(msg)) if msg.contains("port")
        ));
    }

    #[test]
    fn test_from_file_unknown_key() {
        let file = write_file(
            "dbname=tagsdb\nhostname=localhost\nport=5432\nusername=postgres\npassword=x\nschema=public\n",
        );
        assert!(matches!(
            Credentials::from_file(file.path()),
            Err(Error::Config(msg)) if msg.contains("schema")
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Credentials::from_file(dir.path().join("absent.properties"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_write_then_read_back_with_awkward_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hed.properties");
        let credentials = Credentials::new("tagsdb", "db.example.org", 6543, "tagger", "p@ss word$1");

        credentials.write_to_file(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("password='p@ss word$1'"));
        assert!(contents.contains("hostname=db.example.org"));

        assert_eq!(Credentials::from_file(&path).unwrap(), credentials);
    }

    #[test]
    fn test_write_rejects_single_quote() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Credentials::new("tagsdb", "localhost", 5432, "postgres", "it's");
        let result = credentials.write_to_file(dir.path().join("hed.properties"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials::new("tagsdb", "localhost", 5432, "postgres", "hunter2");
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("tagsdb"));
    }

    #[test]
    fn test_for_store_keeps_login() {
        let credentials = Credentials::new("tagsdb", "localhost", 5432, "postgres", "x");
        let template = credentials.for_store("template1");
        assert_eq!(template.dbname, "template1");
        assert_eq!(template.username, "postgres");
        assert_eq!(template.port, 5432);
    }

    #[test]
    fn test_connect_options_target_store() {
        let options = Credentials::new("tagsdb", "localhost", 5433, "postgres", "x").connect_options();
        assert_eq!(options.get_database(), Some("tagsdb"));
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_host(), "localhost");
    }
}
