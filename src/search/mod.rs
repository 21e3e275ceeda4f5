//! Full-text lookup over titles and lyrics.

use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::song::Song;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SearchField {
    Title,
    Lyrics,
    #[default]
    Any,
}

/// Search index over persisted songs, keyed by song id.
pub trait SearchIndex: Send {
    fn add(&mut self, song: &Song);

    fn add_all(&mut self, songs: &[Song]) {
        for song in songs {
            self.add(song);
        }
    }

    fn remove(&mut self, id: i64);

    fn clear(&mut self);

    /// Ids of matching songs; title matches rank ahead of lyric matches.
    fn search(&mut self, query: &str, field: SearchField) -> Vec<i64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Entry {
    title: String,
    lyrics: String,
}

/// Case-insensitive substring index held in memory. Recent query results
/// are memoised until the next change.
pub struct MemoryIndex {
    entries: BTreeMap<i64, Entry>,
    recent: LruCache<(SearchField, String), Vec<i64>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// `capacity` is the number of memoised queries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            recent: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIndex for MemoryIndex {
    fn add(&mut self, song: &Song) {
        self.recent.clear();
        self.entries.insert(
            song.id(),
            Entry {
                title: song.title().to_lowercase(),
                lyrics: song.lyrics(false, false, false).to_lowercase(),
            },
        );
    }

    fn remove(&mut self, id: i64) {
        self.recent.clear();
        self.entries.remove(&id);
    }

    fn clear(&mut self) {
        self.recent.clear();
        self.entries.clear();
    }

    fn search(&mut self, query: &str, field: SearchField) -> Vec<i64> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let key = (field, needle);
        if let Some(hit) = self.recent.get(&key) {
            return hit.clone();
        }

        let needle = &key.1;
        let titles = self
            .entries
            .iter()
            .filter(|(_, e)| field != SearchField::Lyrics && e.title.contains(needle.as_str()))
            .map(|(id, _)| *id);
        let lyrics = self
            .entries
            .iter()
            .filter(|(_, e)| {
                field != SearchField::Title
                    && e.lyrics.contains(needle.as_str())
                    && !(field == SearchField::Any && e.title.contains(needle.as_str()))
            })
            .map(|(id, _)| *id);
        let ids: Vec<i64> = titles.chain(lyrics).collect();

        self.recent.put(key, ids.clone());
        ids
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
