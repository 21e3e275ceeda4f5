use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::song::Song;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a loaded snapshot stays valid. `None` keeps it until the next
    /// change.
    pub ttl: Option<Duration>,
    /// Larger libraries are not kept in memory between calls.
    pub max_songs: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            max_songs: 20_000,
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    songs: Arc<Vec<Song>>,
    stored_at: Instant,
}

/// Sorted snapshot of every song, shared with callers until invalidated.
#[derive(Debug)]
pub struct SongCache {
    policy: CachePolicy,
    snapshot: Option<Snapshot>,
}

impl SongCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            snapshot: None,
        }
    }

    fn expired(&self, snapshot: &Snapshot) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| snapshot.stored_at.elapsed() >= ttl)
    }

    pub fn get(&mut self) -> Option<Arc<Vec<Song>>> {
        let snapshot = self.snapshot.as_ref()?;
        if self.expired(snapshot) {
            debug!("song cache expired");
            self.snapshot = None;
            return None;
        }
        Some(Arc::clone(&snapshot.songs))
    }

    /// Keep `songs` as the current snapshot when the policy allows it.
    pub fn store(&mut self, songs: Vec<Song>) -> Arc<Vec<Song>> {
        let songs = Arc::new(songs);
        if songs.len() <= self.policy.max_songs {
            self.snapshot = Some(Snapshot {
                songs: Arc::clone(&songs),
                stored_at: Instant::now(),
            });
        } else {
            debug!(count = songs.len(), max = self.policy.max_songs, "too many songs to cache");
            self.snapshot = None;
        }
        songs
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    pub fn is_populated(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| !self.expired(s))
    }
}
