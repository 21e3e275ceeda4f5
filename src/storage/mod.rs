//! Persistence backends
//!
//! Both backends store the same flat [`SongRecord`] and expose the same
//! logical identity space (`i64`). The relational backend uses its row id
//! directly; the document backend derives the logical id from its object id.
//! The repository only ever talks to the [`Backend`] trait.

pub mod document;
pub mod relational;

pub use document::{DocumentBackend, ObjectId};
pub use relational::RelationalBackend;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::song::{Song, Theme};

/// A song as the backends store it: metadata plus the lyrics as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongRecord {
    #[serde(deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub author: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub lyrics: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub ccli: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub copyright: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub year: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub publisher: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub key: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub capo: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub info: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub sequence: String,
    pub translations: BTreeMap<String, String>,
    pub theme: Option<Theme>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<&Song> for SongRecord {
    fn from(song: &Song) -> Self {
        // The first section's theme wins, as that is what the display shows.
        let theme = song
            .sections()
            .first()
            .map(|s| s.theme())
            .unwrap_or_else(|| song.theme());
        Self {
            title: song.title().to_string(),
            author: song.author().to_string(),
            lyrics: song.lyrics(true, true, false),
            ccli: song.ccli().to_string(),
            copyright: song.copyright().to_string(),
            year: song.year().to_string(),
            publisher: song.publisher().to_string(),
            key: song.key().to_string(),
            capo: song.capo().to_string(),
            info: song.info().to_string(),
            sequence: song.sequence().to_string(),
            translations: song.translations().clone(),
            theme: Some(Theme::clone(theme)),
        }
    }
}

/// Backend-native identity of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Row(i64),
    Document(ObjectId),
}

impl RecordKey {
    pub fn logical_id(&self) -> i64 {
        match self {
            RecordKey::Row(id) => *id,
            RecordKey::Document(oid) => oid.logical_id(),
        }
    }
}

/// A record together with where it lives.
#[derive(Debug, Clone)]
pub struct StoredSong {
    pub key: RecordKey,
    pub record: SongRecord,
}

impl StoredSong {
    pub fn id(&self) -> i64 {
        self.key.logical_id()
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("record {record} is corrupt: {reason}")]
    Corrupt { record: String, reason: String },
    #[error("backend temporarily unavailable: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("backend failure: {0}")]
    Fatal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    pub fn corrupt(record: impl ToString, reason: impl ToString) -> Self {
        BackendError::Corrupt {
            record: record.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Failures that replacing the record may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Corrupt { .. })
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen,
            ) => BackendError::Transient(Box::new(err)),
            _ => BackendError::Fatal(Box::new(err)),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                BackendError::Transient(Box::new(err))
            }
            _ => BackendError::Fatal(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Fatal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Storage contract shared by every backend.
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Every stored record. A record that cannot be decoded shows up as an
    /// `Err` entry without failing the whole listing.
    fn list_all(&mut self) -> Result<Vec<Result<StoredSong>>>;

    /// Store a new record and return its logical id.
    fn insert(&mut self, record: &SongRecord) -> Result<i64>;

    /// Store several records at once; all or none when the backend can.
    fn insert_all(&mut self, records: &[SongRecord]) -> Result<Vec<i64>> {
        records.iter().map(|r| self.insert(r)).collect()
    }

    /// Overwrite the record with this logical id. Returns the matched count.
    fn update_by_identity(&mut self, id: i64, record: &SongRecord) -> Result<usize>;

    /// Delete records by native key. Returns the deleted count.
    fn delete_by_identities(&mut self, keys: &[RecordKey]) -> Result<usize>;

    /// Fetch and decode the record with this logical id.
    fn find_by_identity(&mut self, id: i64) -> Result<Option<StoredSong>>;

    /// Resolve a logical id to the native key without decoding the record.
    fn locate(&mut self, id: i64) -> Result<Option<RecordKey>>;

    /// Swap the record at `key` for a freshly inserted `record` and return
    /// the new logical id. Either both steps take effect or neither does.
    fn replace(&mut self, key: &RecordKey, record: &SongRecord) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Relational,
    Document,
}

/// Open the configured backend below `data_dir`.
pub fn open(kind: BackendKind, data_dir: &Path) -> anyhow::Result<Box<dyn Backend>> {
    Ok(match kind {
        BackendKind::Relational => Box::new(RelationalBackend::open(&data_dir.join("songs.sqlite"))?),
        BackendKind::Document => Box::new(DocumentBackend::open(&data_dir.join("songs"))?),
    })
}
