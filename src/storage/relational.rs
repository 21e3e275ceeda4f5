use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

use super::{Backend, BackendError, RecordKey, Result, SongRecord, StoredSong};

const COLUMNS: &str = "id, title, author, lyrics, ccli, copyright, year, publisher, \
                       song_key, capo, info, sequence, translations_json, theme_json";

/// Songs in a single SQLite table, keyed by an autoincrement row id.
pub struct RelationalBackend {
    conn: Connection,
}

impl RelationalBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        let s = Self { conn };
        s.init_schema()?;
        Ok(s)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        let s = Self { conn };
        s.init_schema()?;
        Ok(s)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                r#"
CREATE TABLE IF NOT EXISTS songs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  author TEXT,
  lyrics TEXT,
  ccli TEXT,
  copyright TEXT,
  year TEXT,
  publisher TEXT,
  song_key TEXT,
  capo TEXT,
  info TEXT,
  sequence TEXT,
  translations_json TEXT,
  theme_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_songs_title ON songs(title COLLATE NOCASE);
"#,
            )
            .context("init schema")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn insert_row(conn: &Connection, r: &SongRecord) -> Result<i64> {
    let translations = serde_json::to_string(&r.translations)?;
    let theme = r.theme.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        r#"
INSERT INTO songs(title, author, lyrics, ccli, copyright, year, publisher,
                  song_key, capo, info, sequence, translations_json, theme_json)
VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
"#,
        params![
            r.title,
            r.author,
            r.lyrics,
            r.ccli,
            r.copyright,
            r.year,
            r.publisher,
            r.key,
            r.capo,
            r.info,
            r.sequence,
            translations,
            theme,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn corrupt(id: i64, err: impl std::fmt::Display) -> BackendError {
    BackendError::corrupt(format!("songs/{id}"), err)
}

/// Nullable text columns read as "".
fn text(row: &Row<'_>, idx: usize, id: i64) -> Result<String> {
    row.get::<_, Option<String>>(idx)
        .map(Option::unwrap_or_default)
        .map_err(|e| corrupt(id, e))
}

fn decode_row(row: &Row<'_>) -> Result<StoredSong> {
    let id: i64 = row.get(0).map_err(|e| BackendError::corrupt("songs/?", e))?;

    let translations = match row.get::<_, Option<String>>(12).map_err(|e| corrupt(id, e))? {
        Some(json) => serde_json::from_str(&json).map_err(|e| corrupt(id, e))?,
        None => Default::default(),
    };
    let theme = match row.get::<_, Option<String>>(13).map_err(|e| corrupt(id, e))? {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| corrupt(id, e))?),
        None => None,
    };

    let record = SongRecord {
        title: row.get(1).map_err(|e| corrupt(id, e))?,
        author: text(row, 2, id)?,
        lyrics: text(row, 3, id)?,
        ccli: text(row, 4, id)?,
        copyright: text(row, 5, id)?,
        year: text(row, 6, id)?,
        publisher: text(row, 7, id)?,
        key: text(row, 8, id)?,
        capo: text(row, 9, id)?,
        info: text(row, 10, id)?,
        sequence: text(row, 11, id)?,
        translations,
        theme,
    };
    Ok(StoredSong {
        key: RecordKey::Row(id),
        record,
    })
}

impl Backend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn list_all(&mut self) -> Result<Vec<Result<StoredSong>>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM songs ORDER BY id"))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_row(row));
        }
        Ok(out)
    }

    fn insert(&mut self, record: &SongRecord) -> Result<i64> {
        insert_row(&self.conn, record)
    }

    fn insert_all(&mut self, records: &[SongRecord]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_row(&tx, record)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    fn update_by_identity(&mut self, id: i64, r: &SongRecord) -> Result<usize> {
        let translations = serde_json::to_string(&r.translations)?;
        let theme = r.theme.as_ref().map(serde_json::to_string).transpose()?;
        let changed = self.conn.execute(
            r#"
UPDATE songs SET
  title=?1, author=?2, lyrics=?3, ccli=?4, copyright=?5, year=?6, publisher=?7,
  song_key=?8, capo=?9, info=?10, sequence=?11, translations_json=?12, theme_json=?13
WHERE id=?14
"#,
            params![
                r.title,
                r.author,
                r.lyrics,
                r.ccli,
                r.copyright,
                r.year,
                r.publisher,
                r.key,
                r.capo,
                r.info,
                r.sequence,
                translations,
                theme,
                id,
            ],
        )?;
        Ok(changed)
    }

    fn delete_by_identities(&mut self, keys: &[RecordKey]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        for key in keys {
            if let RecordKey::Row(id) = key {
                deleted += tx.execute("DELETE FROM songs WHERE id=?1", params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn find_by_identity(&mut self, id: i64) -> Result<Option<StoredSong>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM songs WHERE id=?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn replace(&mut self, key: &RecordKey, record: &SongRecord) -> Result<i64> {
        let RecordKey::Row(old) = key else {
            return Err(BackendError::Fatal(format!("{key:?} is not a row key").into()));
        };
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM songs WHERE id=?1", params![old])?;
        let id = insert_row(&tx, record)?;
        tx.commit()?;
        Ok(id)
    }

    fn locate(&mut self, id: i64) -> Result<Option<RecordKey>> {
        let found = self
            .conn
            .query_row("SELECT id FROM songs WHERE id=?1", params![id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(found.map(RecordKey::Row))
    }
}
