//! Plain-text lyrics parser
//!
//! Lyrics are stored as blocks separated by blank lines:
//! ```text
//! Verse 1
//! Amazing grace how sweet the sound
//! That saved a wretch like me
//!
//! Chorus
//! ...
//! ```
//! A block whose first line looks like a section heading gets that line as its
//! title. Every section carries the small-print footer built from the song's
//! metadata at parse time.

use std::sync::Arc;

use super::classifier::{LineKind, classify};
use crate::song::{Section, Theme};

/// Older exports protect literal spaces with this marker.
pub const SPACE_SURROGATE: &str = "<>";

/// Label used in front of the church licence number in footers.
pub const CCLI_LICENCE_LABEL: &str = "CCLI Licence";

/// Song-level fields that feed each section's footer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FooterFields<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub ccli: &'a str,
    pub copyright: &'a str,
    /// The church's own licence number; switches the footer style when set.
    pub church_ccli: Option<&'a str>,
}

/// Result of parsing a lyrics text.
#[derive(Debug, Clone)]
pub struct ParsedLyrics {
    /// Song title after parsing: the known title, or the first lyric line
    /// when no title was known.
    pub title: String,
    pub sections: Vec<Section>,
}

/// Build the footer lines for a section.
pub fn footer_lines(fields: &FooterFields<'_>) -> Vec<String> {
    let church = fields.church_ccli.map(str::trim).filter(|n| !n.is_empty());
    let Some(licence) = church else {
        let credit = if fields.ccli.is_empty() {
            format!("{} ", fields.author)
        } else {
            format!("{} ({})", fields.author, fields.ccli)
        };
        return vec![fields.title.to_string(), credit];
    };

    let mut first = format!("\"{}\"", fields.title);
    if !fields.author.trim().is_empty() {
        first.push_str(" by ");
        first.push_str(fields.author);
    }

    let mut lines = vec![first];
    let copyright = fields.copyright.trim();
    if !copyright.is_empty() {
        if copyright.starts_with('©') {
            lines.push(copyright.to_string());
        } else {
            lines.push(format!("©{copyright}"));
        }
    }
    lines.push(format!("{CCLI_LICENCE_LABEL} #{licence}"));
    lines
}

/// Split raw lyrics into sections.
///
/// If `fields.title` is empty the first normal line becomes the song title,
/// and footers of that section onwards use it.
pub fn parse(raw: &str, fields: &FooterFields<'_>, theme: &Arc<Theme>) -> ParsedLyrics {
    let mut title = fields.title.to_string();
    let mut sections = Vec::new();

    for block in blocks(raw) {
        let (section_title, body) = match block.first() {
            Some(first) if classify(first) == LineKind::Title => (Some(first.clone()), &block[1..]),
            Some(_) => (None, &block[..]),
            None => continue,
        };

        if title.is_empty()
            && let Some(line) = block.iter().find(|l| classify(l) == LineKind::Normal)
        {
            title = line.clone();
        }

        let footer = footer_lines(&FooterFields {
            title: &title,
            ..*fields
        });
        sections.push(Section::new(
            section_title,
            body.to_vec(),
            footer,
            Arc::clone(theme),
        ));
    }

    ParsedLyrics { title, sections }
}

/// Group lines into blocks on empty lines. Runs of empty lines count as one
/// separator and both `\n` and `\r\n` endings are accepted.
fn blocks(raw: &str) -> Vec<Vec<String>> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in normalized.split('\n') {
        if line.is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(line.replace(SPACE_SURROGATE, " "));
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
