//! Lyrics text handling
//!
//! This module provides:
//! - Line classification (title / chords / comment / lyric)
//! - Parsing of blank-line separated lyrics into sections
//! - Playback order resolution from a sequence string

pub mod classifier;
pub mod parser;
pub mod sequence;

pub use classifier::{LineKind, classify};
pub use parser::{FooterFields, ParsedLyrics, footer_lines};
