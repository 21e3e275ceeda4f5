//! Song library: lyric parsing, playback sequences, XML exchange and a
//! repository over interchangeable storage backends.

pub mod config;
pub mod lyrics;
pub mod repository;
pub mod search;
pub mod song;
pub mod storage;

pub use repository::{DatabaseListener, LoadProgress, RepositoryError, SongRepository};
pub use search::{SearchField, SearchIndex};
pub use song::{Section, Song, Theme};
