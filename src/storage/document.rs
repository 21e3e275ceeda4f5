use anyhow::Context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{Backend, BackendError, RecordKey, Result, SongRecord, StoredSong};

/// 12-byte document id: creation second, per-process random bytes and a
/// counter. The logical song id is the low 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static PROCESS_BYTES: Lazy<[u8; 5]> = Lazy::new(|| {
    let b = rand::random::<u64>().to_be_bytes();
    [b[3], b[4], b[5], b[6], b[7]]
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(rand::random::<u32>()));

impl ObjectId {
    pub fn generate() -> Self {
        let secs = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
        let count = COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_BYTES);
        bytes[9..].copy_from_slice(&count[1..]);
        Self(bytes)
    }

    pub fn logical_id(&self) -> i64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[4..]);
        i64::from_be_bytes(low)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "_id")]
    oid: String,
    #[serde(default)]
    id: i64,
    #[serde(flatten)]
    record: SongRecord,
}

/// One JSON document per song in a directory, named `<object id>.json`.
pub struct DocumentBackend {
    dir: PathBuf,
}

impl DocumentBackend {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, oid: &ObjectId) -> PathBuf {
        self.dir.join(format!("{oid}.json"))
    }

    /// Ids of every document in the directory, oldest first.
    fn object_ids(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(oid) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ObjectId>().ok())
            {
                ids.push(oid);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read(&self, oid: ObjectId) -> Result<StoredSong> {
        let raw = fs::read_to_string(self.path_for(&oid))?;
        let doc: Document =
            serde_json::from_str(&raw).map_err(|e| BackendError::corrupt(oid, e))?;
        Ok(StoredSong {
            key: RecordKey::Document(oid),
            record: doc.record,
        })
    }

    fn write(&self, oid: ObjectId, record: &SongRecord) -> Result<()> {
        let doc = Document {
            oid: oid.to_hex(),
            id: oid.logical_id(),
            record: record.clone(),
        };
        let path = self.path_for(&oid);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&doc)?)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write every record through `write`, deleting this batch's documents
    /// again if one of them fails.
    fn write_batch<F>(&self, records: &[SongRecord], mut write: F) -> Result<Vec<i64>>
    where
        F: FnMut(&Self, ObjectId, &SongRecord) -> Result<()>,
    {
        let mut written = Vec::with_capacity(records.len());
        for record in records {
            let oid = ObjectId::generate();
            if let Err(err) = write(self, oid, record) {
                for oid in &written {
                    let _ = fs::remove_file(self.path_for(oid));
                }
                return Err(err);
            }
            written.push(oid);
        }
        Ok(written.iter().map(ObjectId::logical_id).collect())
    }

    fn find_oid(&self, id: i64) -> Result<Option<ObjectId>> {
        Ok(self
            .object_ids()?
            .into_iter()
            .find(|oid| oid.logical_id() == id))
    }
}

impl Backend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    fn list_all(&mut self) -> Result<Vec<Result<StoredSong>>> {
        Ok(self
            .object_ids()?
            .into_iter()
            .map(|oid| self.read(oid))
            .collect())
    }

    fn insert(&mut self, record: &SongRecord) -> Result<i64> {
        let oid = ObjectId::generate();
        self.write(oid, record)?;
        Ok(oid.logical_id())
    }

    fn insert_all(&mut self, records: &[SongRecord]) -> Result<Vec<i64>> {
        self.write_batch(records, Self::write)
    }

    fn update_by_identity(&mut self, id: i64, record: &SongRecord) -> Result<usize> {
        match self.find_oid(id)? {
            Some(oid) => {
                self.write(oid, record)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_by_identities(&mut self, keys: &[RecordKey]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            let RecordKey::Document(oid) = key else {
                continue;
            };
            match fs::remove_file(self.path_for(oid)) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    fn find_by_identity(&mut self, id: i64) -> Result<Option<StoredSong>> {
        match self.find_oid(id)? {
            Some(oid) => self.read(oid).map(Some),
            None => Ok(None),
        }
    }

    fn locate(&mut self, id: i64) -> Result<Option<RecordKey>> {
        Ok(self.find_oid(id)?.map(RecordKey::Document))
    }

    /// The new document is written before the old one is unlinked; if the
    /// unlink fails the new document is dropped again.
    fn replace(&mut self, key: &RecordKey, record: &SongRecord) -> Result<i64> {
        let RecordKey::Document(old) = key else {
            return Err(BackendError::Fatal(format!("{key:?} is not a document key").into()));
        };
        let new = ObjectId::generate();
        self.write(new, record)?;
        match fs::remove_file(self.path_for(old)) {
            Ok(()) => Ok(new.logical_id()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(new.logical_id()),
            Err(e) => {
                let _ = fs::remove_file(self.path_for(&new));
                Err(e.into())
            }
        }
    }
}
