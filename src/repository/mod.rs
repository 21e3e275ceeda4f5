//! Song repository
//!
//! Single entry point for reading and changing the song library. It keeps
//! a backend, a search index and a sorted snapshot of every song in step.
//! One lock covers all three so that a change is seen completely or not
//! at all; listeners are told about changes after the lock is released.

mod cache;

pub use cache::{CachePolicy, SongCache};

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::search::{MemoryIndex, SearchField, SearchIndex};
use crate::song::{Song, Theme};
use crate::storage::{self, Backend, BackendError, SongRecord, StoredSong};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Told after the library changed.
pub trait DatabaseListener: Send + Sync {
    fn database_changed(&self);
}

impl<F: Fn() + Send + Sync> DatabaseListener for F {
    fn database_changed(&self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProgress {
    /// Fraction of records decoded so far, in `0.0..1.0`.
    Loading(f64),
    Done,
}

#[derive(Debug)]
enum UpdateOutcome {
    Updated,
    NotFound,
    Failed(BackendError),
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryOptions {
    pub cache: CachePolicy,
    /// Licence number printed in every footer when set.
    pub church_ccli: Option<String>,
}

pub struct SongRepository {
    state: Mutex<State>,
    listeners: Mutex<Vec<Arc<dyn DatabaseListener>>>,
}

struct State {
    backend: Box<dyn Backend>,
    index: Box<dyn SearchIndex>,
    index_is_clear: bool,
    cache: SongCache,
    church_ccli: Option<String>,
}

impl SongRepository {
    pub fn new(
        backend: Box<dyn Backend>,
        index: Box<dyn SearchIndex>,
        options: RepositoryOptions,
    ) -> Self {
        info!(backend = backend.name(), "opening song repository");
        Self {
            state: Mutex::new(State {
                backend,
                index,
                index_is_clear: true,
                cache: SongCache::new(options.cache),
                church_ccli: options.church_ccli,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Open the configured backend with an in-memory search index.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let backend = storage::open(config.storage.backend, &config.storage.data_dir)?;
        Ok(Self::new(
            backend,
            Box::new(MemoryIndex::new()),
            RepositoryOptions {
                cache: config.cache.policy(),
                church_ccli: config.lyrics.church_ccli.clone(),
            },
        ))
    }

    pub fn register_listener(&self, listener: impl DatabaseListener + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Notify every listener, in registration order.
    pub fn fire_update(&self) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.database_changed();
        }
    }

    /// Every song, sorted for display. Records that fail to decode are
    /// skipped.
    pub fn get_all(&self) -> Result<Arc<Vec<Song>>> {
        self.state.lock().load(None)
    }

    /// Like [`SongRepository::get_all`], reporting progress while records
    /// are read from the backend.
    pub fn get_all_with_progress(
        &self,
        progress: &UnboundedSender<LoadProgress>,
    ) -> Result<Arc<Vec<Song>>> {
        self.state.lock().load(Some(progress))
    }

    pub fn find(&self, id: i64) -> Result<Option<Song>> {
        let songs = self.state.lock().load(None)?;
        Ok(songs.iter().find(|s| s.id() == id).cloned())
    }

    pub fn search(&self, query: &str, field: SearchField) -> Result<Vec<Song>> {
        let mut state = self.state.lock();
        let songs = state.load(None)?;
        let ids = state.index.search(query, field);
        Ok(ids
            .into_iter()
            .filter_map(|id| songs.iter().find(|s| s.id() == id).cloned())
            .collect())
    }

    /// Store new songs and write the assigned ids back into them.
    ///
    /// Songs without sections, or marked as not persistable, are left out.
    /// Returns false when nothing was stored.
    pub fn add(&self, songs: &mut [Song], notify: bool) -> Result<bool> {
        let added = self.state.lock().add(songs)?;
        if added && notify {
            self.fire_update();
        }
        Ok(added)
    }

    /// Write the song's current state over its stored record.
    ///
    /// A song with no stored record is added instead when `add_if_missing`
    /// is set. When the backend fails transiently the stored record is
    /// replaced once in a single backend step; false means that did not work
    /// either and the stored record is unchanged.
    pub fn update(&self, song: &mut Song, add_if_missing: bool) -> Result<bool> {
        let updated = self.state.lock().update(song, add_if_missing)?;
        if updated {
            self.fire_update();
        }
        Ok(updated)
    }

    /// Delete the stored records of `songs`. False when none matched.
    pub fn remove(&self, songs: &[Song]) -> Result<bool> {
        let removed = self.state.lock().remove(songs);
        if removed {
            self.fire_update();
        }
        Ok(removed)
    }

    /// Give an unsaved song the id of a stored song with the same content.
    pub fn match_identity(&self, song: &mut Song) -> Result<bool> {
        if song.is_persisted() || !song.is_persistable() {
            return Ok(false);
        }
        let songs = self.state.lock().load(None)?;
        match songs.iter().find(|s| s.matches_content(song)) {
            Some(stored) => {
                debug!(id = stored.id(), title = stored.title(), "matched stored song");
                song.set_id(stored.id());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn evict_cache(&self) {
        self.state.lock().cache.clear();
    }

    pub fn cache_populated(&self) -> bool {
        self.state.lock().cache.is_populated()
    }

    pub fn index_len(&self) -> usize {
        self.state.lock().index.len()
    }
}

fn song_from_stored(stored: StoredSong, church_ccli: Option<&str>) -> Song {
    let id = stored.id();
    let r = stored.record;
    let theme = Arc::new(r.theme.unwrap_or_else(Theme::default));
    let mut song = Song::builder(r.title, r.author)
        .id(id)
        .ccli(r.ccli)
        .year(r.year)
        .publisher(r.publisher)
        .copyright(r.copyright)
        .key(r.key)
        .capo(r.capo)
        .info(r.info)
        .sequence(r.sequence)
        .translations(r.translations)
        .theme(Arc::clone(&theme))
        .church_ccli(church_ccli.map(str::to_string))
        .lyrics(r.lyrics)
        .build();
    song.apply_theme(theme);
    song
}

impl State {
    fn clear_index(&mut self) {
        self.index.clear();
        self.index_is_clear = true;
    }

    fn load(&mut self, progress: Option<&UnboundedSender<LoadProgress>>) -> Result<Arc<Vec<Song>>> {
        if let Some(songs) = self.cache.get() {
            if let Some(tx) = progress {
                let _ = tx.send(LoadProgress::Done);
            }
            return Ok(songs);
        }

        let records = self.backend.list_all()?;
        let total = records.len();
        let mut songs = Vec::with_capacity(total);
        for (i, record) in records.into_iter().enumerate() {
            if let Some(tx) = progress {
                let _ = tx.send(LoadProgress::Loading(i as f64 / total as f64));
            }
            match record {
                Ok(stored) => songs.push(song_from_stored(stored, self.church_ccli.as_deref())),
                Err(err) => warn!(error = %err, "skipping song that failed to load"),
            }
        }
        if let Some(tx) = progress {
            let _ = tx.send(LoadProgress::Done);
        }

        songs.sort_by(Song::display_cmp);
        if self.index_is_clear {
            debug!(count = songs.len(), "filling search index");
            self.index.add_all(&songs);
            self.index_is_clear = false;
        }
        Ok(self.cache.store(songs))
    }

    fn add(&mut self, songs: &mut [Song]) -> Result<bool> {
        self.cache.clear();
        self.clear_index();

        let mut batch: Vec<&mut Song> = songs
            .iter_mut()
            .filter(|song| {
                if song.sections().is_empty() {
                    warn!(title = song.title(), "not adding song without lyrics");
                    false
                } else if !song.is_persistable() {
                    debug!(title = song.title(), "not adding song kept out of the library");
                    false
                } else {
                    true
                }
            })
            .collect();
        if batch.is_empty() {
            return Ok(false);
        }

        let records: Vec<SongRecord> = batch.iter().map(|song| SongRecord::from(&**song)).collect();
        let ids = match self.backend.insert_all(&records) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, count = records.len(), "couldn't add songs");
                return Ok(false);
            }
        };
        for (song, id) in batch.iter_mut().zip(ids) {
            song.set_id(id);
        }
        info!(count = records.len(), "added songs");

        self.load(None)?;
        Ok(true)
    }

    fn try_update(&mut self, song: &Song) -> UpdateOutcome {
        if !song.is_persisted() {
            return UpdateOutcome::NotFound;
        }
        match self.backend.find_by_identity(song.id()) {
            Ok(Some(_)) => {}
            Ok(None) => return UpdateOutcome::NotFound,
            Err(err) => return UpdateOutcome::Failed(err),
        }
        match self
            .backend
            .update_by_identity(song.id(), &SongRecord::from(song))
        {
            Ok(0) => UpdateOutcome::NotFound,
            Ok(_) => UpdateOutcome::Updated,
            Err(err) => UpdateOutcome::Failed(err),
        }
    }

    fn update(&mut self, song: &mut Song, add_if_missing: bool) -> Result<bool> {
        if !song.is_persistable() {
            debug!(title = song.title(), "not updating song kept out of the library");
            return Ok(false);
        }
        self.index.remove(song.id());

        match self.try_update(song) {
            UpdateOutcome::Updated => {
                self.cache.clear();
                self.index.add(song);
                debug!(id = song.id(), "updated song");
                Ok(true)
            }
            UpdateOutcome::NotFound if add_if_missing => {
                info!(title = song.title(), "song not stored yet, adding it");
                self.add(std::slice::from_mut(song))
            }
            UpdateOutcome::NotFound => {
                warn!(id = song.id(), "no stored song to update");
                self.cache.clear();
                Ok(false)
            }
            UpdateOutcome::Failed(err) if err.is_transient() => {
                warn!(error = %err, id = song.id(), "update failed, replacing the stored song");
                Ok(self.repair(song))
            }
            UpdateOutcome::Failed(err) => {
                self.cache.clear();
                Err(err.into())
            }
        }
    }

    /// Swap the stored record for the song's current state in one backend
    /// step. On failure the stored record is left as it was.
    fn repair(&mut self, song: &mut Song) -> bool {
        self.cache.clear();
        let old_id = song.id();
        let key = match self.backend.locate(old_id) {
            Ok(Some(key)) => key,
            Ok(None) => {
                warn!(id = old_id, "stored song disappeared before it could be replaced");
                return false;
            }
            Err(err) => {
                warn!(error = %err, id = old_id, "couldn't look up song to replace");
                self.clear_index();
                return false;
            }
        };

        match self.backend.replace(&key, &SongRecord::from(&*song)) {
            Ok(new_id) => {
                song.set_id(new_id);
                self.index.add(song);
                info!(old_id, new_id, "replaced stored song");
                true
            }
            Err(err) => {
                warn!(error = %err, id = old_id, "couldn't replace stored song");
                // The index lost this song when the update started.
                self.clear_index();
                false
            }
        }
    }

    fn remove(&mut self, songs: &[Song]) -> bool {
        self.cache.clear();

        let mut keys = Vec::with_capacity(songs.len());
        for song in songs {
            match self.backend.locate(song.id()) {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => debug!(id = song.id(), "song not stored"),
                Err(err) => {
                    warn!(error = %err, id = song.id(), "couldn't look up song to remove");
                    return false;
                }
            }
        }
        if keys.is_empty() {
            warn!(count = songs.len(), "no stored songs to remove");
            return false;
        }

        match self.backend.delete_by_identities(&keys) {
            Ok(0) => {
                warn!("no stored songs were removed");
                false
            }
            Ok(deleted) => {
                for song in songs {
                    self.index.remove(song.id());
                }
                info!(count = deleted, "removed songs");
                true
            }
            Err(err) => {
                warn!(error = %err, "couldn't remove songs");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentBackend, RecordKey, RelationalBackend};
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeState {
        rows: BTreeMap<i64, SongRecord>,
        corrupt: Vec<i64>,
        next_id: i64,
        insert_calls: usize,
        list_calls: usize,
        transient_updates: usize,
        fail_inserts: bool,
        fail_deletes: bool,
    }

    /// Backend whose state the test keeps a handle on.
    #[derive(Clone, Default)]
    struct FakeBackend(Arc<Mutex<FakeState>>);

    fn transient() -> BackendError {
        BackendError::Transient("connection reset".into())
    }

    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn list_all(&mut self) -> storage::Result<Vec<storage::Result<StoredSong>>> {
            let mut s = self.0.lock();
            s.list_calls += 1;
            let mut out: Vec<_> = s
                .rows
                .iter()
                .map(|(id, record)| {
                    Ok(StoredSong {
                        key: RecordKey::Row(*id),
                        record: record.clone(),
                    })
                })
                .collect();
            for id in &s.corrupt {
                out.push(Err(BackendError::corrupt(id, "bad lyrics column")));
            }
            Ok(out)
        }

        fn insert(&mut self, record: &SongRecord) -> storage::Result<i64> {
            let mut s = self.0.lock();
            s.insert_calls += 1;
            if s.fail_inserts {
                return Err(transient());
            }
            s.next_id += 1;
            let id = s.next_id;
            s.rows.insert(id, record.clone());
            Ok(id)
        }

        fn update_by_identity(&mut self, id: i64, record: &SongRecord) -> storage::Result<usize> {
            let mut s = self.0.lock();
            if s.transient_updates > 0 {
                s.transient_updates -= 1;
                return Err(transient());
            }
            match s.rows.get_mut(&id) {
                Some(row) => {
                    *row = record.clone();
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn delete_by_identities(&mut self, keys: &[RecordKey]) -> storage::Result<usize> {
            let mut s = self.0.lock();
            if s.fail_deletes {
                return Err(transient());
            }
            Ok(keys
                .iter()
                .filter(|key| s.rows.remove(&key.logical_id()).is_some())
                .count())
        }

        fn find_by_identity(&mut self, id: i64) -> storage::Result<Option<StoredSong>> {
            let s = self.0.lock();
            Ok(s.rows.get(&id).map(|record| StoredSong {
                key: RecordKey::Row(id),
                record: record.clone(),
            }))
        }

        fn locate(&mut self, id: i64) -> storage::Result<Option<RecordKey>> {
            let s = self.0.lock();
            Ok(s.rows.contains_key(&id).then_some(RecordKey::Row(id)))
        }

        fn replace(&mut self, key: &RecordKey, record: &SongRecord) -> storage::Result<i64> {
            let mut s = self.0.lock();
            if s.fail_deletes || s.fail_inserts {
                return Err(transient());
            }
            s.rows.remove(&key.logical_id());
            s.next_id += 1;
            let id = s.next_id;
            s.rows.insert(id, record.clone());
            Ok(id)
        }
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn repo_with(backend: FakeBackend, cache: CachePolicy) -> SongRepository {
        SongRepository::new(
            Box::new(backend),
            Box::new(MemoryIndex::new()),
            RepositoryOptions {
                cache,
                church_ccli: None,
            },
        )
    }

    fn repo() -> (SongRepository, FakeBackend) {
        let backend = FakeBackend::default();
        (repo_with(backend.clone(), CachePolicy::default()), backend)
    }

    fn song(title: &str) -> Song {
        Song::builder(title, "Anon")
            .lyrics(format!("Verse 1\n{title} first line\n\nChorus\n{title} refrain"))
            .build()
    }

    #[test]
    fn test_corrupt_records_are_skipped() {
        let (repo, backend) = repo();
        let mut songs: Vec<Song> = (0..10).map(|i| song(&format!("Song {i}"))).collect();
        assert!(repo.add(&mut songs, false).unwrap());
        backend.0.lock().corrupt.push(99);
        repo.evict_cache();

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let all = tracing::subscriber::with_default(subscriber, || repo.get_all().unwrap());
        assert_eq!(all.len(), 10);

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let skipped: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("skipping song that failed to load"))
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].contains("WARN"));
        assert!(skipped[0].contains("99"));
    }

    #[test]
    fn test_get_all_sorted_with_ids() {
        let (repo, _) = repo();
        let mut songs = vec![song("b song"), song("A song"), song("a song")];
        assert!(repo.add(&mut songs, false).unwrap());
        assert!(songs.iter().all(Song::is_persisted));

        let all = repo.get_all().unwrap();
        let titles: Vec<&str> = all.iter().map(Song::title).collect();
        assert_eq!(titles, ["A song", "a song", "b song"]);
    }

    #[test]
    fn test_add_rejects_songs_without_sections() {
        let (repo, backend) = repo();
        let mut songs = vec![Song::new("Empty", "Nobody")];
        assert!(!repo.add(&mut songs, true).unwrap());
        assert_eq!(backend.0.lock().insert_calls, 0);
        assert!(!songs[0].is_persisted());
    }

    #[test]
    fn test_add_filters_mixed_batch() {
        let (repo, backend) = repo();
        let mut quick = song("Quick");
        quick.set_quick_insert();
        let mut songs = vec![song("Kept"), Song::new("Empty", ""), quick];
        assert!(repo.add(&mut songs, false).unwrap());
        assert_eq!(backend.0.lock().rows.len(), 1);
        assert!(songs[0].is_persisted());
        assert!(!songs[2].is_persisted());
    }

    #[test]
    fn test_add_reports_backend_rejection() {
        let (repo, backend) = repo();
        backend.0.lock().fail_inserts = true;
        assert!(!repo.add(&mut [song("Refused")], true).unwrap());
    }

    #[test]
    fn test_update_missing_song_falls_back_to_add() {
        let (repo, backend) = repo();
        let mut fresh = song("Fresh");
        assert!(repo.update(&mut fresh, true).unwrap());
        assert!(fresh.is_persisted());
        assert_eq!(backend.0.lock().insert_calls, 1);
        assert_eq!(repo.find(fresh.id()).unwrap().unwrap().title(), "Fresh");
    }

    #[test]
    fn test_update_missing_song_without_fallback() {
        let (repo, backend) = repo();
        let mut fresh = song("Fresh");
        assert!(!repo.update(&mut fresh, false).unwrap());
        assert_eq!(backend.0.lock().insert_calls, 0);
    }

    #[test]
    fn test_update_skips_unpersistable_songs() {
        let (repo, backend) = repo();
        let mut songs = vec![song("Local")];
        assert!(repo.add(&mut songs, false).unwrap());
        let mut local = songs.remove(0);
        local.set_no_db_update();
        local.set_author("Changed");
        assert!(!repo.update(&mut local, true).unwrap());
        let stored = backend.0.lock().rows[&local.id()].clone();
        assert_eq!(stored.author, "Anon");
    }

    #[test]
    fn test_transient_update_failure_is_repaired() {
        let (repo, backend) = repo();
        let mut songs = vec![song("Shaky")];
        assert!(repo.add(&mut songs, false).unwrap());
        let old_id = songs[0].id();

        backend.0.lock().transient_updates = 1;
        songs[0].set_author("New Author");
        assert!(repo.update(&mut songs[0], false).unwrap());

        let s = backend.0.lock();
        assert_eq!(s.rows.len(), 1);
        assert!(!s.rows.contains_key(&old_id));
        assert_eq!(s.rows[&songs[0].id()].author, "New Author");
    }

    #[test]
    fn test_failed_repair_keeps_stored_song() {
        let (repo, backend) = repo();
        let mut songs = vec![song("Shaky")];
        assert!(repo.add(&mut songs, false).unwrap());

        let old_id = songs[0].id();
        {
            let mut s = backend.0.lock();
            s.transient_updates = 1;
            s.fail_inserts = true;
        }
        songs[0].set_author("Lost Edit");
        assert!(!repo.update(&mut songs[0], false).unwrap());
        assert_eq!(songs[0].id(), old_id);

        {
            let s = backend.0.lock();
            assert_eq!(s.rows.len(), 1);
            assert_eq!(s.rows[&old_id].author, "Anon");
        }
        backend.0.lock().fail_inserts = false;
        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].author(), "Anon");
        assert_eq!(repo.search("shaky", SearchField::Title).unwrap().len(), 1);
    }

    #[test]
    fn test_repair_stops_when_delete_fails() {
        let (repo, backend) = repo();
        let mut songs = vec![song("Shaky")];
        assert!(repo.add(&mut songs, false).unwrap());
        let old_id = songs[0].id();

        {
            let mut s = backend.0.lock();
            s.transient_updates = 1;
            s.fail_deletes = true;
        }
        songs[0].set_author("New Author");
        assert!(!repo.update(&mut songs[0], false).unwrap());

        let s = backend.0.lock();
        assert_eq!(s.rows.len(), 1);
        assert_eq!(s.rows[&old_id].author, "Anon");
        drop(s);
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_repair_on_real_backends_keeps_one_copy() {
        let dir = tempfile::tempdir().unwrap();
        let backends: Vec<Box<dyn Backend>> = vec![
            Box::new(RelationalBackend::open_in_memory().unwrap()),
            Box::new(DocumentBackend::open(dir.path()).unwrap()),
        ];
        for backend in backends {
            let mut state = State {
                backend,
                index: Box::new(MemoryIndex::new()),
                index_is_clear: true,
                cache: SongCache::new(CachePolicy::default()),
                church_ccli: None,
            };
            let mut songs = vec![song("Steady")];
            assert!(state.add(&mut songs).unwrap());
            songs[0].set_author("Replaced");
            assert!(state.repair(&mut songs[0]));

            let all = state.load(None).unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].author(), "Replaced");
            assert_eq!(all[0].id(), songs[0].id());
        }
    }

    #[test]
    fn test_changes_are_visible_through_cache_and_index() {
        let (repo, _) = repo();
        let mut songs = vec![song("Morning Has Broken")];
        assert!(repo.add(&mut songs, false).unwrap());
        assert_eq!(repo.get_all().unwrap()[0].title(), "Morning Has Broken");

        let mut edited = songs[0].clone();
        edited.set_title("Evening Has Come");
        assert!(repo.update(&mut edited, false).unwrap());
        assert_eq!(repo.get_all().unwrap()[0].title(), "Evening Has Come");
        assert!(repo.search("morning", SearchField::Title).unwrap().is_empty());
        assert_eq!(repo.search("evening", SearchField::Title).unwrap().len(), 1);

        assert!(repo.remove(&[edited]).unwrap());
        assert!(repo.get_all().unwrap().is_empty());
        assert!(repo.search("evening", SearchField::Any).unwrap().is_empty());
        assert_eq!(repo.index_len(), 0);
    }

    #[test]
    fn test_cache_states() {
        let (repo, backend) = repo();
        assert!(repo.add(&mut [song("One")], false).unwrap());
        assert!(repo.cache_populated());

        repo.get_all().unwrap();
        let calls = backend.0.lock().list_calls;
        repo.get_all().unwrap();
        assert_eq!(backend.0.lock().list_calls, calls);

        repo.evict_cache();
        assert!(!repo.cache_populated());
        assert_eq!(repo.get_all().unwrap().len(), 1);
        assert_eq!(backend.0.lock().list_calls, calls + 1);
    }

    #[test]
    fn test_cache_ttl_forces_reload() {
        let backend = FakeBackend::default();
        let repo = repo_with(
            backend.clone(),
            CachePolicy {
                ttl: Some(Duration::ZERO),
                max_songs: 100,
            },
        );
        assert!(repo.add(&mut [song("One")], false).unwrap());
        let calls = backend.0.lock().list_calls;
        repo.get_all().unwrap();
        repo.get_all().unwrap();
        assert_eq!(backend.0.lock().list_calls, calls + 2);
    }

    #[test]
    fn test_remove_without_matches() {
        let (repo, _) = repo();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        repo.register_listener(move || *counter.lock() += 1);

        assert!(!repo.remove(&[song("Never stored")]).unwrap());
        assert_eq!(*fired.lock(), 0);
    }

    #[test]
    fn test_listeners_fire_in_order() {
        let (repo, _) = repo();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for n in 1..=2 {
            let calls = Arc::clone(&calls);
            repo.register_listener(move || calls.lock().push(n));
        }

        assert!(repo.add(&mut [song("Quiet")], false).unwrap());
        assert!(calls.lock().is_empty());

        assert!(repo.add(&mut [song("Loud")], true).unwrap());
        assert_eq!(*calls.lock(), [1, 2]);
    }

    #[test]
    fn test_listener_can_read_repository() {
        let repo = Arc::new(repo().0);
        let seen = Arc::new(Mutex::new(0));
        {
            let weak = Arc::downgrade(&repo);
            let seen = Arc::clone(&seen);
            repo.register_listener(move || {
                if let Some(repo) = weak.upgrade() {
                    *seen.lock() = repo.get_all().unwrap().len();
                }
            });
        }
        assert!(repo.add(&mut [song("Reentrant")], true).unwrap());
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_progress_reports() {
        let (repo, _) = repo();
        assert!(repo.add(&mut [song("A"), song("B")], false).unwrap());
        repo.evict_cache();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(repo.get_all_with_progress(&tx).unwrap().len(), 2);
        drop(tx);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            [
                LoadProgress::Loading(0.0),
                LoadProgress::Loading(0.5),
                LoadProgress::Done
            ]
        );
    }

    #[test]
    fn test_match_identity() {
        let (repo, _) = repo();
        let mut stored = vec![song("Twin")];
        assert!(repo.add(&mut stored, false).unwrap());

        let mut copy = song("Twin");
        assert!(repo.match_identity(&mut copy).unwrap());
        assert_eq!(copy.id(), stored[0].id());

        let mut other = song("Other");
        assert!(!repo.match_identity(&mut other).unwrap());
        assert!(!other.is_persisted());
    }

    #[test]
    fn test_church_licence_reaches_footers() {
        let backend = FakeBackend::default();
        let repo = SongRepository::new(
            Box::new(backend),
            Box::new(MemoryIndex::new()),
            RepositoryOptions {
                cache: CachePolicy::default(),
                church_ccli: Some("12345".into()),
            },
        );
        assert!(repo.add(&mut [song("Licensed")], false).unwrap());
        let all = repo.get_all().unwrap();
        let footer = all[0].sections()[0].footer();
        assert_eq!(footer.last().map(String::as_str), Some("CCLI Licence #12345"));
    }

    #[test]
    fn test_stored_theme_reaches_every_section() {
        let (repo, _) = repo();
        let theme = Arc::new(Theme {
            name: "Night".into(),
            background: "#101010".into(),
            ..Theme::default()
        });
        let mut themed = song("Themed");
        themed.apply_theme(Arc::clone(&theme));
        assert!(repo.add(&mut [themed], false).unwrap());

        let all = repo.get_all().unwrap();
        assert_eq!(**all[0].theme(), *theme);
        assert!(all[0].sections().iter().all(|s| **s.theme() == *theme));
    }

    #[test]
    fn test_concurrent_changes_keep_cache_and_index_in_step() {
        let repo = Arc::new(repo().0);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    let mut songs: Vec<Song> =
                        (0..5).map(|i| song(&format!("Thread {t} song {i}"))).collect();
                    assert!(repo.add(&mut songs, true).unwrap());
                    assert!(repo.remove(&songs[..2]).unwrap());
                    songs[2].set_author(format!("Author {t}"));
                    assert!(repo.update(&mut songs[2], false).unwrap());
                    repo.get_all().unwrap().len()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 8 * 3);
        assert_eq!(repo.index_len(), 8 * 3);
        assert_eq!(repo.search("song", SearchField::Title).unwrap().len(), 8 * 3);
    }

    fn exercise_backend(backend: Box<dyn Backend>) {
        let repo = SongRepository::new(backend, Box::new(MemoryIndex::new()), Default::default());
        let mut songs = vec![song("Great Is Thy Faithfulness"), song("Abide With Me")];
        assert!(repo.add(&mut songs, false).unwrap());

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title(), "Abide With Me");
        assert_eq!(all[1].sections().len(), 2);

        songs[0].set_sequence("C V1 C");
        assert!(repo.update(&mut songs[0], false).unwrap());
        let reloaded = repo.find(songs[0].id()).unwrap().unwrap();
        assert_eq!(reloaded.sequence(), "C V1 C");
        assert_eq!(reloaded.sections_in_sequence().len(), 3);

        assert!(repo.remove(&songs[1..]).unwrap());
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_relational_backend_end_to_end() {
        exercise_backend(Box::new(RelationalBackend::open_in_memory().unwrap()));
    }

    #[test]
    fn test_document_backend_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        exercise_backend(Box::new(DocumentBackend::open(dir.path()).unwrap()));
    }
}
