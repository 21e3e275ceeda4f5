//! Line classification for plain-text lyrics
//!
//! Every line of a lyrics block is one of:
//! - a section title (`Verse 1`, `Chorus`, `[Bridge]`, `Pre-Chorus:`)
//! - a line of chords (`G  D/F#  Em7  Csus2`)
//! - a comment (`// capo 2`, `[softly]`)
//! - a normal lyric line

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Semantic kind of a single lyrics line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Title,
    Chords,
    Comment,
    Normal,
}

/// Words that open a section heading.
static TITLE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "verse",
        "chorus",
        "pre-chorus",
        "prechorus",
        "refrain",
        "bridge",
        "tag",
        "intro",
        "outro",
        "ending",
        "coda",
        "interlude",
        "instrumental",
        "vamp",
        "hook",
        "misc",
    ]
    .into_iter()
    .collect()
});

/// Chord qualities, longest first so `maj` wins over `m`.
const QUALITIES: &[&str] = &[
    "maj", "min", "dim", "aug", "sus", "add", "m", "M", "+", "-", "°", "ø", "Δ",
];

/// Classify one line of lyrics. Pure and position-independent: whether a
/// `Title` line actually opens a section is decided by the caller.
pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Normal;
    }
    if is_title(trimmed) {
        return LineKind::Title;
    }
    if is_comment(trimmed) {
        return LineKind::Comment;
    }
    if trimmed.split_whitespace().all(is_chord_token) {
        return LineKind::Chords;
    }
    LineKind::Normal
}

fn is_title(line: &str) -> bool {
    let inner = line
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .unwrap_or(line);
    let inner = inner.strip_suffix(':').unwrap_or(inner).to_lowercase();

    let mut words = inner.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    // "verse1" is as common as "verse 1"
    let head = first.trim_end_matches(|c: char| c.is_ascii_digit());
    if !TITLE_WORDS.contains(head) {
        return false;
    }

    let rest: Vec<&str> = words.collect();
    rest.len() <= 2 && rest.iter().all(|w| is_title_suffix(w))
}

fn is_title_suffix(word: &str) -> bool {
    let word = word.trim_matches(|c| c == '(' || c == ')');
    if word.is_empty() {
        return false;
    }
    if word.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // repeat markers: x2, x3
    if let Some(n) = word.strip_prefix('x')
        && !n.is_empty()
        && n.chars().all(|c| c.is_ascii_digit())
    {
        return true;
    }
    matches!(word, "i" | "ii" | "iii" | "iv" | "v" | "vi" | "a" | "b" | "c")
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//") || (line.starts_with('[') && line.ends_with(']'))
}

fn is_chord_token(token: &str) -> bool {
    let token = token.trim_matches(|c| c == '(' || c == ')');
    if token.is_empty() {
        return false;
    }
    if matches!(token, "|" | "||" | "/" | "%" | "N.C." | "NC") {
        return true;
    }
    match token.split_once('/') {
        Some((chord, bass)) => is_chord(chord) && matches!(strip_note(bass), Some("")),
        None => is_chord(token),
    }
}

/// Strip a note name (`A`-`G` with an optional accidental), returning the rest.
fn strip_note(s: &str) -> Option<&str> {
    let rest = s.strip_prefix(|c: char| ('A'..='G').contains(&c))?;
    Some(
        rest.strip_prefix('#')
            .or_else(|| rest.strip_prefix('b'))
            .unwrap_or(rest),
    )
}

fn is_chord(s: &str) -> bool {
    let Some(mut rest) = strip_note(s) else {
        return false;
    };
    while !rest.is_empty() {
        if let Some(q) = QUALITIES.iter().find(|q| rest.starts_with(**q)) {
            rest = &rest[q.len()..];
            continue;
        }
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            rest = &rest[digits..];
            continue;
        }
        // altered extensions: b5, #9
        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (Some('#' | 'b'), Some(d)) if d.is_ascii_digit() => rest = &rest[1..],
            _ => return false,
        }
    }
    true
}
