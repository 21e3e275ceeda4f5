use std::sync::Arc;

use super::Theme;
use crate::lyrics::{LineKind, classify};

/// A titled block of lyric lines plus its small-print footer.
///
/// Sections are immutable once built; only the theme can be reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Section {
    title: Option<String>,
    lines: Vec<String>,
    footer: Vec<String>,
    theme: Arc<Theme>,
}

impl Section {
    /// An empty title is treated as no title.
    pub fn new(
        title: Option<String>,
        lines: Vec<String>,
        footer: Vec<String>,
        theme: Arc<Theme>,
    ) -> Self {
        Self {
            title: title.filter(|t| !t.is_empty()),
            lines,
            footer,
            theme,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn footer(&self) -> &[String] {
        &self.footer
    }

    pub fn theme(&self) -> &Arc<Theme> {
        &self.theme
    }

    pub fn set_theme(&mut self, theme: Arc<Theme>) {
        self.theme = theme;
    }

    /// Body lines, optionally without chord and comment lines.
    pub fn text(&self, chords: bool, comments: bool) -> Vec<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|line| match classify(line) {
                LineKind::Chords => chords,
                LineKind::Comment => comments,
                _ => true,
            })
            .collect()
    }

    /// Copy of this section with a different footer.
    pub fn with_footer(&self, footer: Vec<String>) -> Self {
        Self {
            footer,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_filters() {
        let section = Section::new(
            Some("Verse 1".into()),
            vec!["G  C".into(), "// quietly".into(), "Be thou my vision".into()],
            vec![],
            Arc::new(Theme::default()),
        );
        assert_eq!(section.text(true, true).len(), 3);
        assert_eq!(section.text(false, true), ["// quietly", "Be thou my vision"]);
        assert_eq!(section.text(false, false), ["Be thou my vision"]);
    }

    #[test]
    fn test_empty_title_is_none() {
        let section = Section::new(Some(String::new()), vec![], vec![], Arc::default());
        assert_eq!(section.title(), None);
    }
}
