//! Song entity
//!
//! A song owns its metadata, its sections in edit order, the sequence string
//! that derives the playback order, any translations and a theme reference.
//! The playback order is derived lazily and thrown away by every mutation, so
//! a stale order can never be observed.

mod section;
mod theme;
pub mod xml;

pub use section::Section;
pub use theme::Theme;
pub use xml::XmlError;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::lyrics::{FooterFields, LineKind, classify, footer_lines, parser, sequence};

/// Identity of a song that has never been persisted.
pub const UNSAVED_ID: i64 = -1;

#[derive(Debug)]
pub struct Song {
    id: i64,
    title: String,
    author: String,
    ccli: String,
    year: String,
    publisher: String,
    copyright: String,
    key: String,
    capo: String,
    info: String,
    sequence: String,
    sections: Vec<Section>,
    in_sequence: OnceCell<Vec<Section>>,
    translations: BTreeMap<String, String>,
    active_translation: Option<String>,
    theme: Arc<Theme>,
    church_ccli: Option<String>,
    persist_immediately: bool,
    quick_insert: bool,
    /// Uniform font sizes computed by the display layer, keyed by canvas size.
    font_sizes: Mutex<HashMap<(u32, u32), f64>>,
}

impl Song {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            title: title.into(),
            author: author.into(),
            ccli: String::new(),
            year: String::new(),
            publisher: String::new(),
            copyright: String::new(),
            key: String::new(),
            capo: String::new(),
            info: String::new(),
            sequence: String::new(),
            sections: Vec::new(),
            in_sequence: OnceCell::new(),
            translations: BTreeMap::new(),
            active_translation: None,
            theme: Arc::new(Theme::default()),
            church_ccli: None,
            persist_immediately: true,
            quick_insert: false,
            font_sizes: Mutex::new(HashMap::new()),
        }
    }

    pub fn builder(title: impl Into<String>, author: impl Into<String>) -> SongBuilder {
        SongBuilder {
            song: Song::new(title, author),
            lyrics: None,
        }
    }

    /// Drop everything derived from the sections: the playback order and
    /// cached layout data.
    fn invalidate(&mut self) {
        self.in_sequence.take();
        self.font_sizes.get_mut().clear();
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNSAVED_ID
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn ccli(&self) -> &str {
        &self.ccli
    }

    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    pub fn copyright(&self) -> &str {
        &self.copyright
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capo(&self) -> &str {
        &self.capo
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn church_ccli(&self) -> Option<&str> {
        self.church_ccli.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.refresh_footers();
    }

    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = author.into();
        self.refresh_footers();
    }

    pub fn set_ccli(&mut self, ccli: impl Into<String>) {
        self.ccli = ccli.into();
        self.refresh_footers();
    }

    pub fn set_copyright(&mut self, copyright: impl Into<String>) {
        self.copyright = copyright.into();
        self.refresh_footers();
    }

    pub fn set_church_ccli(&mut self, church_ccli: Option<String>) {
        self.church_ccli = church_ccli;
        self.refresh_footers();
    }

    pub fn set_year(&mut self, year: impl Into<String>) {
        self.year = year.into();
        self.invalidate();
    }

    pub fn set_publisher(&mut self, publisher: impl Into<String>) {
        self.publisher = publisher.into();
        self.invalidate();
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
        self.invalidate();
    }

    pub fn set_capo(&mut self, capo: impl Into<String>) {
        self.capo = capo.into();
        self.invalidate();
    }

    pub fn set_info(&mut self, info: impl Into<String>) {
        self.info = info.into();
        self.invalidate();
    }

    pub fn set_sequence(&mut self, sequence: impl Into<String>) {
        self.sequence = sequence.into();
        self.invalidate();
    }

    fn footer_fields(&self) -> FooterFields<'_> {
        FooterFields {
            title: &self.title,
            author: &self.author,
            ccli: &self.ccli,
            copyright: &self.copyright,
            church_ccli: self.church_ccli.as_deref(),
        }
    }

    /// Footer lines a section of this song gets with the current metadata.
    pub fn footer(&self) -> Vec<String> {
        footer_lines(&self.footer_fields())
    }

    fn refresh_footers(&mut self) {
        let footer = self.footer();
        self.sections = self.sections.iter().map(|s| s.with_footer(footer.clone())).collect();
        self.invalidate();
    }

    /// Sections in edit order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Sections in playback order, as given by the sequence string.
    pub fn sections_in_sequence(&self) -> &[Section] {
        self.in_sequence
            .get_or_init(|| sequence::resolve(&self.sections, &self.sequence))
    }

    /// A section with this song's footer and theme.
    pub fn new_section(&self, title: Option<String>, lines: Vec<String>) -> Section {
        Section::new(title, lines, self.footer(), Arc::clone(&self.theme))
    }

    pub fn add_section(&mut self, section: Section) {
        self.sections.push(section);
        self.invalidate();
    }

    pub fn insert_section(&mut self, index: usize, section: Section) {
        let index = index.min(self.sections.len());
        self.sections.insert(index, section);
        self.invalidate();
    }

    pub fn replace_section(&mut self, index: usize, section: Section) -> Option<Section> {
        let slot = self.sections.get_mut(index)?;
        let old = std::mem::replace(slot, section);
        self.invalidate();
        Some(old)
    }

    pub fn remove_section(&mut self, index: usize) -> Option<Section> {
        if index >= self.sections.len() {
            return None;
        }
        let removed = self.sections.remove(index);
        self.invalidate();
        Some(removed)
    }

    /// Keep only the first occurrence of each section.
    pub fn remove_duplicate_sections(&mut self) {
        let mut kept: Vec<Section> = Vec::with_capacity(self.sections.len());
        for section in self.sections.drain(..) {
            if !kept.contains(&section) {
                kept.push(section);
            }
        }
        self.sections = kept;
        self.invalidate();
    }

    /// Replace all sections by parsing `lyrics`.
    ///
    /// When the song has no title yet, the first lyric line becomes the title.
    pub fn set_lyrics(&mut self, lyrics: &str) {
        let parsed = parser::parse(lyrics, &self.footer_fields(), &self.theme);
        self.title = parsed.title;
        self.sections = parsed.sections;
        self.invalidate();
    }

    /// Lyrics as text that [`Song::set_lyrics`] parses back into the same
    /// sections.
    pub fn lyrics(&self, chords: bool, comments: bool, in_sequence: bool) -> String {
        let sections: &[Section] = if in_sequence {
            self.sections_in_sequence()
        } else {
            &self.sections
        };

        let mut out = String::new();
        for section in sections {
            if let Some(title) = section.title() {
                out.push_str(title);
                out.push('\n');
            }
            for line in section.text(chords, comments) {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    /// Re-parse the song's own lyrics so titles and footers reflect the
    /// current metadata. Sections keep the theme of the last section.
    pub fn refresh_lyrics(&mut self) {
        let theme = self
            .sections_in_sequence()
            .last()
            .map(|s| Arc::clone(s.theme()))
            .unwrap_or_else(|| Arc::clone(&self.theme));
        let text = self.lyrics(true, true, false);
        self.set_lyrics(&text);
        for section in &mut self.sections {
            section.set_theme(Arc::clone(&theme));
        }
        self.invalidate();
    }

    pub fn has_chords(&self) -> bool {
        self.sections
            .iter()
            .flat_map(|s| s.lines())
            .any(|line| classify(line) == LineKind::Chords)
    }

    pub fn theme(&self) -> &Arc<Theme> {
        &self.theme
    }

    pub fn set_theme(&mut self, theme: Arc<Theme>) {
        self.theme = theme;
        self.invalidate();
    }

    /// Set the theme on the song and every section.
    pub fn apply_theme(&mut self, theme: Arc<Theme>) {
        for section in &mut self.sections {
            section.set_theme(Arc::clone(&theme));
        }
        self.set_theme(theme);
    }

    pub fn translations(&self) -> &BTreeMap<String, String> {
        &self.translations
    }

    pub fn set_translations(&mut self, translations: BTreeMap<String, String>) {
        self.translations = translations;
        self.invalidate();
    }

    pub fn add_translation(&mut self, name: impl Into<String>, lyrics: &str) {
        self.translations.insert(name.into(), lyrics.trim().to_string());
        self.invalidate();
    }

    /// Choose which translation is shown next to the lyrics. It should name a
    /// key of [`Song::translations`].
    pub fn set_active_translation(&mut self, name: Option<String>) {
        self.active_translation = name;
    }

    pub fn active_translation_lyrics(&self) -> Option<&str> {
        let name = self.active_translation.as_ref()?;
        self.translations.get(name).map(String::as_str)
    }

    /// Name of the active translation, only if it resolves to lyrics.
    pub fn active_translation_name(&self) -> Option<&str> {
        self.active_translation_lyrics()?;
        self.active_translation.as_deref()
    }

    /// The paragraph of the active translation that belongs to the section at
    /// `index` in playback order.
    pub fn translation_for_section(&self, index: usize) -> Option<String> {
        let lyrics = self.active_translation_lyrics()?;
        let section = self.sections_in_sequence().get(index)?;
        let position = self.sections.iter().position(|s| s == section)?;
        lyrics
            .split("\n\n")
            .nth(position)
            .map(|part| part.trim().to_string())
    }

    /// Keep changes to this song out of the database.
    pub fn set_no_db_update(&mut self) {
        self.persist_immediately = false;
    }

    pub fn persist_immediately(&self) -> bool {
        self.persist_immediately
    }

    /// Mark as entered through quick insert: shown, never stored.
    pub fn set_quick_insert(&mut self) {
        self.quick_insert = true;
    }

    pub fn is_quick_insert(&self) -> bool {
        self.quick_insert
    }

    /// Whether changes to this instance may reach a backend.
    pub fn is_persistable(&self) -> bool {
        self.persist_immediately && !self.quick_insert
    }

    pub fn cached_font_size(&self, width: u32, height: u32) -> Option<f64> {
        self.font_sizes.lock().get(&(width, height)).copied()
    }

    pub fn set_cached_font_size(&self, width: u32, height: u32, size: f64) {
        self.font_sizes.lock().insert((width, height), size);
    }

    /// Two-line summary for song lists.
    pub fn preview_text(&self) -> String {
        match self.active_translation_name() {
            Some(name) => format!("{} (+ {})\n{}", self.title, name, self.author),
            None => format!("{}\n{}", self.title, self.author),
        }
    }

    /// Presentation order: title, then author, then the lyrics text.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        collate(&self.title, &other.title)
            .then_with(|| collate(&self.author, &other.author))
            .then_with(|| {
                collate(
                    &self.lyrics(false, false, false),
                    &other.lyrics(false, false, false),
                )
            })
    }

    /// Same title, author and stored lyrics text.
    pub fn matches_content(&self, other: &Self) -> bool {
        self.title == other.title
            && self.author == other.author
            && self.lyrics(true, true, false) == other.lyrics(true, true, false)
    }
}

/// Primary collation key: decomposed, accents dropped, lowercased.
/// `Ébène` sorts with `ebene`, not after `Z`.
fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Letters first, ignoring accents and case; then accents; then case.
fn collate(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

impl Clone for Song {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            title: self.title.clone(),
            author: self.author.clone(),
            ccli: self.ccli.clone(),
            year: self.year.clone(),
            publisher: self.publisher.clone(),
            copyright: self.copyright.clone(),
            key: self.key.clone(),
            capo: self.capo.clone(),
            info: self.info.clone(),
            sequence: self.sequence.clone(),
            sections: self.sections.clone(),
            in_sequence: self.in_sequence.clone(),
            translations: self.translations.clone(),
            active_translation: self.active_translation.clone(),
            theme: Arc::clone(&self.theme),
            church_ccli: self.church_ccli.clone(),
            persist_immediately: self.persist_immediately,
            quick_insert: self.quick_insert,
            font_sizes: Mutex::new(HashMap::new()),
        }
    }
}

// Identity is deliberately left out: a freshly parsed song equals its stored copy.
impl PartialEq for Song {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.author == other.author
            && self.sections == other.sections
            && self.theme == other.theme
    }
}

impl Eq for Song {}

impl Hash for Song {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
        self.author.hash(state);
        self.sections.hash(state);
        self.theme.hash(state);
    }
}

/// Builder for songs loaded from storage or import files.
///
/// Lyrics are parsed in [`SongBuilder::build`], after every other field is
/// set, so footers see the final metadata.
#[derive(Debug)]
pub struct SongBuilder {
    song: Song,
    lyrics: Option<String>,
}

impl SongBuilder {
    pub fn id(mut self, id: i64) -> Self {
        self.song.id = id;
        self
    }

    pub fn ccli(mut self, ccli: impl Into<String>) -> Self {
        self.song.ccli = ccli.into();
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.song.year = year.into();
        self
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.song.publisher = publisher.into();
        self
    }

    pub fn copyright(mut self, copyright: impl Into<String>) -> Self {
        self.song.copyright = copyright.into();
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.song.key = key.into();
        self
    }

    pub fn capo(mut self, capo: impl Into<String>) -> Self {
        self.song.capo = capo.into();
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.song.info = info.into();
        self
    }

    pub fn sequence(mut self, sequence: impl Into<String>) -> Self {
        self.song.sequence = sequence.into();
        self
    }

    pub fn translations(mut self, translations: BTreeMap<String, String>) -> Self {
        self.song.translations = translations;
        self
    }

    pub fn theme(mut self, theme: Arc<Theme>) -> Self {
        self.song.theme = theme;
        self
    }

    pub fn church_ccli(mut self, church_ccli: Option<String>) -> Self {
        self.song.church_ccli = church_ccli;
        self
    }

    pub fn lyrics(mut self, lyrics: impl Into<String>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }

    pub fn build(mut self) -> Song {
        if let Some(lyrics) = self.lyrics.take() {
            self.song.set_lyrics(&lyrics);
        }
        self.song
    }
}
