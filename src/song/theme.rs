use serde::{Deserialize, Serialize};

/// Display theme shared by a song and its sections.
///
/// Songs only hold a reference to a theme; computing fonts and backgrounds
/// from it is the display layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub name: String,
    pub font: String,
    pub font_color: String,
    pub translate_font: String,
    pub translate_font_color: String,
    /// A colour (`#000000`) or an image path.
    pub background: String,
    pub shadow: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            font: "Noto Sans".to_string(),
            font_color: "#FFFFFF".to_string(),
            translate_font: "Noto Sans".to_string(),
            translate_font_color: "#F5F5DC".to_string(),
            background: "#000000".to_string(),
            shadow: true,
        }
    }
}
