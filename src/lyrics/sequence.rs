//! Playback order from a sequence string such as `"V1 C V2 C B C"`.
//!
//! Each token is matched against the acronym of every section title
//! (`Verse 1` -> `V1`, `Pre Chorus` -> `PC`). A token may match several
//! sections, a section may be played several times, and unknown tokens are
//! dropped.

use crate::song::Section;

/// First character of every word in `title`.
pub fn acronym(title: &str) -> String {
    title
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .collect()
}

/// Indices into `sections` in playback order.
pub fn resolve_indices(sections: &[Section], sequence: &str) -> Vec<usize> {
    if sequence.trim().is_empty() {
        return (0..sections.len()).collect();
    }

    let acronyms: Vec<Option<String>> = sections
        .iter()
        .map(|s| s.title().map(acronym).filter(|a| !a.is_empty()))
        .collect();

    let mut order = Vec::new();
    for token in sequence.split_whitespace() {
        for (i, a) in acronyms.iter().enumerate() {
            if a.as_deref() == Some(token) {
                order.push(i);
            }
        }
    }
    order
}

/// Sections in playback order.
pub fn resolve(sections: &[Section], sequence: &str) -> Vec<Section> {
    resolve_indices(sections, sequence)
        .into_iter()
        .map(|i| sections[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Theme;
    use std::sync::Arc;

    fn section(title: &str) -> Section {
        let title = (!title.is_empty()).then(|| title.to_string());
        Section::new(title, vec!["line".into()], vec![], Arc::new(Theme::default()))
    }

    fn titles(sections: &[Section]) -> Vec<&str> {
        sections.iter().map(|s| s.title().unwrap_or("")).collect()
    }

    #[test]
    fn test_acronym() {
        assert_eq!(acronym("Verse 1"), "V1");
        assert_eq!(acronym("Pre  Chorus"), "PC");
        assert_eq!(acronym(""), "");
    }

    #[test]
    fn test_repeats_allowed() {
        let sections = [section("Verse 1"), section("Chorus"), section("Verse 2")];
        let ordered = resolve(&sections, "V1 C V1");
        assert_eq!(titles(&ordered), ["Verse 1", "Chorus", "Verse 1"]);
    }

    #[test]
    fn test_empty_sequence_is_identity() {
        let sections = [section("Verse 1"), section(""), section("Chorus")];
        assert_eq!(resolve(&sections, ""), sections);
        assert_eq!(resolve(&sections, "   "), sections);
    }

    #[test]
    fn test_unknown_tokens_and_untitled_sections_are_skipped() {
        let sections = [section(""), section("Chorus"), section("Bridge")];
        let ordered = resolve(&sections, "X C B Q");
        assert_eq!(titles(&ordered), ["Chorus", "Bridge"]);
    }

    #[test]
    fn test_token_matching_several_sections() {
        let sections = [section("Chorus"), section("Coda"), section("Verse")];
        assert_eq!(resolve_indices(&sections, "C"), [0, 1]);
    }
}
