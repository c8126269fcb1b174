//! Replication state: per-object bookmarks, loaded before a run and written
//! back after an incremental run.
//!
//! On disk the state is the JSON document
//! `{"bookmarks": {"<key>": {"replication_key_value": "<ISO-8601>", "replication_key": "updated"}}}`.
//! Top-level keys other than `bookmarks` are carried through untouched.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Value};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StateError;

/// The only replication key this tap knows: the object's modification time.
pub const REPLICATION_KEY: &str = "updated";

/// Last-downloaded version of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(with = "iso_timestamp")]
    pub replication_key_value: DateTime<FixedOffset>,
    pub replication_key: String,
}

impl Bookmark {
    pub fn new(updated: DateTime<Utc>) -> Self {
        Self {
            replication_key_value: updated.into(),
            replication_key: REPLICATION_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl State {
    /// Load state from `path`.
    ///
    /// A missing file, or valid JSON that is not an object, yields an empty
    /// state. A file that does not parse, or an object whose `bookmarks`
    /// section cannot be read, is an error.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(state_path = %path.display(), "No state file found, starting from empty state");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_json(path, &content)
    }

    /// Parse a state document, normalising JSON values other than objects to
    /// the empty state.
    pub fn from_json(path: &Path, content: &str) -> Result<Self, StateError> {
        let value = serde_json::from_str::<Value>(content).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let Value::Object(map) = value else {
            warn!(state_path = %path.display(), "State file is not a JSON object, discarding it");
            return Ok(Self::default());
        };
        let state: State =
            serde_json::from_value(Value::Object(map)).map_err(|source| StateError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            state_path = %path.display(),
            bookmarks = state.bookmarks.len(),
            "Loaded state"
        );
        Ok(state)
    }

    pub fn bookmark(&self, key: &str) -> Option<&Bookmark> {
        self.bookmarks.get(key)
    }

    /// Record `updated` as the last-downloaded version of `key`.
    pub fn set_bookmark(&mut self, key: &str, updated: DateTime<Utc>) {
        self.bookmarks.insert(key.to_string(), Bookmark::new(updated));
    }

    /// Serialise with four-space indentation.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, StateError> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Overwrite `path` with the full state. The file is replaced atomically
    /// and keeps the permissions of the file it replaces.
    pub fn persist(&self, path: &Path) -> Result<(), StateError> {
        let write_err = |source: std::io::Error| StateError::Write {
            path: path.to_path_buf(),
            source,
        };
        let body = self.to_pretty_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        match std::fs::metadata(path) {
            Ok(existing) => tmp
                .as_file()
                .set_permissions(existing.permissions())
                .map_err(write_err)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(write_err(e)),
        }
        tmp.write_all(&body).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        debug!(
            state_path = %path.display(),
            bookmarks = self.bookmarks.len(),
            "State written"
        );
        Ok(())
    }
}

/// Timestamps in the `YYYY-MM-DDTHH:MM:SS[.ffffff]+HH:MM` shape. The fraction
/// is omitted when zero, six digits when the instant is whole microseconds,
/// nine otherwise.
pub mod iso_timestamp {
    use chrono::{DateTime, FixedOffset};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<FixedOffset>) -> String {
        let nanos = ts.timestamp_subsec_nanos();
        let pattern = if nanos == 0 {
            "%Y-%m-%dT%H:%M:%S%:z"
        } else if nanos % 1_000 == 0 {
            "%Y-%m-%dT%H:%M:%S%.6f%:z"
        } else {
            "%Y-%m-%dT%H:%M:%S%.9f%:z"
        };
        ts.format(pattern).to_string()
    }

    pub fn parse(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<FixedOffset>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).map_err(|e| D::Error::custom(format!("invalid timestamp `{raw}`: {e}")))
    }
}
