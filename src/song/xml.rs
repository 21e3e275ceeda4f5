//! XML import/export format
//!
//! ```xml
//! <song>
//!   <updateInDB>true</updateInDB>
//!   <title>..</title><author>..</author><ccli>..</ccli><copyright>..</copyright>
//!   <year>..</year><publisher>..</publisher><key>..</key><capo>..</capo>
//!   <notes>..</notes><sequence>..</sequence>
//!   <theme name=".." font=".." .. />
//!   <lyrics>
//!     <section title="Verse 1">
//!       <theme .. /><smalllines><line>..</line></smalllines><lyrics>..</lyrics>
//!     </section>
//!   </lyrics>
//!   <translation><name>..</name><tlyrics>..</tlyrics></translation>
//!   <translationoptions><lang>..</lang><lyrics>..</lyrics></translationoptions>
//! </song>
//! ```
//! Missing elements read as empty strings. Footers are rebuilt from the song
//! fields on import.

use std::collections::BTreeMap;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use super::{Section, Song, Theme};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Malformed(#[from] quick_xml::Error),
    #[error("expected a <song> element, found <{0}>")]
    NotASong(String),
    #[error("element <{0}> is never closed")]
    Unclosed(String),
    #[error("document has no root element")]
    Empty,
}

impl Song {
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<song>");
        push_element(
            &mut xml,
            "updateInDB",
            if self.persist_immediately { "true" } else { "false" },
        );
        push_element(&mut xml, "title", &self.title);
        push_element(&mut xml, "author", &self.author);
        push_element(&mut xml, "ccli", &self.ccli);
        push_element(&mut xml, "copyright", &self.copyright);
        push_element(&mut xml, "year", &self.year);
        push_element(&mut xml, "publisher", &self.publisher);
        push_element(&mut xml, "key", &self.key);
        push_element(&mut xml, "capo", &self.capo);
        push_element(&mut xml, "notes", &self.info);
        push_element(&mut xml, "sequence", &self.sequence);
        push_theme(&mut xml, &self.theme);

        xml.push_str("<lyrics>");
        for section in &self.sections {
            push_section(&mut xml, section);
        }
        xml.push_str("</lyrics>");

        if let (Some(name), Some(lyrics)) =
            (self.active_translation_name(), self.active_translation_lyrics())
        {
            xml.push_str("<translation>");
            push_element(&mut xml, "name", name);
            push_element(&mut xml, "tlyrics", lyrics);
            xml.push_str("</translation>");
        }

        xml.push_str("<translationoptions>");
        for (lang, lyrics) in &self.translations {
            push_element(&mut xml, "lang", lang);
            push_element(&mut xml, "lyrics", lyrics);
        }
        xml.push_str("</translationoptions>");

        xml.push_str("</song>");
        xml
    }

    /// Parse a song exported by [`Song::to_xml`]. The result is unsaved.
    pub fn from_xml(xml: &str, church_ccli: Option<&str>) -> Result<Song, XmlError> {
        let root = read_tree(xml)?;
        if root.name != "song" {
            return Err(XmlError::NotASong(root.name));
        }

        let theme = root
            .child("theme")
            .map(read_theme)
            .or_else(|| {
                root.child("lyrics")
                    .and_then(|l| l.child("section"))
                    .and_then(|s| s.child("theme"))
                    .map(read_theme)
            })
            .map(Arc::new)
            .unwrap_or_default();

        let mut song = Song::new(root.child_text("title"), root.child_text("author"));
        song.theme = Arc::clone(&theme);
        song.church_ccli = church_ccli.map(str::to_string);
        song.persist_immediately = root.child_text("updateInDB") != "false";
        song.ccli = root.child_text("ccli");
        song.copyright = root.child_text("copyright");
        song.year = root.child_text("year");
        song.publisher = root.child_text("publisher");
        song.key = root.child_text("key");
        song.capo = root.child_text("capo");
        song.info = root.child_text("notes");
        song.sequence = root.child_text("sequence");

        if let Some(lyrics) = root.child("lyrics") {
            song.sections = lyrics
                .children
                .iter()
                .filter(|c| c.name == "section")
                .map(|c| read_section(c, &theme))
                .collect();
        }

        let mut translations = BTreeMap::new();
        if let Some(options) = root.child("translationoptions") {
            let mut lang = None;
            for child in &options.children {
                match child.name.as_str() {
                    "lang" => lang = Some(child.text.clone()),
                    "lyrics" => {
                        if let Some(lang) = lang.take() {
                            translations.insert(lang, child.text.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        song.translations = translations;

        if let Some(translation) = root.child("translation") {
            let name = translation.child_text("name");
            if !name.is_empty() {
                song.add_translation(name.clone(), &translation.child_text("tlyrics"));
                song.active_translation = Some(name);
            }
        }

        song.refresh_footers();
        Ok(song)
    }
}

fn push_element(xml: &mut String, name: &str, text: &str) {
    xml.push('<');
    xml.push_str(name);
    xml.push('>');
    xml.push_str(&escape(text));
    xml.push_str("</");
    xml.push_str(name);
    xml.push('>');
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    xml.push(' ');
    xml.push_str(name);
    xml.push_str("=\"");
    xml.push_str(&escape(value));
    xml.push('"');
}

fn push_theme(xml: &mut String, theme: &Theme) {
    xml.push_str("<theme");
    push_attr(xml, "name", &theme.name);
    push_attr(xml, "font", &theme.font);
    push_attr(xml, "fontcolor", &theme.font_color);
    push_attr(xml, "translatefont", &theme.translate_font);
    push_attr(xml, "translatefontcolor", &theme.translate_font_color);
    push_attr(xml, "background", &theme.background);
    push_attr(xml, "shadow", if theme.shadow { "true" } else { "false" });
    xml.push_str("/>");
}

fn push_section(xml: &mut String, section: &Section) {
    xml.push_str("<section");
    if let Some(title) = section.title() {
        push_attr(xml, "title", title);
    }
    xml.push('>');
    push_theme(xml, section.theme());
    xml.push_str("<smalllines>");
    for line in section.footer() {
        push_element(xml, "line", line);
    }
    xml.push_str("</smalllines>");
    push_element(xml, "lyrics", &section.lines().join("\n"));
    xml.push_str("</section>");
}

fn read_theme(el: &Element) -> Theme {
    let defaults = Theme::default();
    let attr = |name: &str, fallback: String| el.attr(name).map(str::to_string).unwrap_or(fallback);
    Theme {
        name: attr("name", defaults.name),
        font: attr("font", defaults.font),
        font_color: attr("fontcolor", defaults.font_color),
        translate_font: attr("translatefont", defaults.translate_font),
        translate_font_color: attr("translatefontcolor", defaults.translate_font_color),
        background: attr("background", defaults.background),
        shadow: el.attr("shadow").map_or(defaults.shadow, |v| v == "true"),
    }
}

fn read_section(el: &Element, song_theme: &Arc<Theme>) -> Section {
    let theme = el
        .child("theme")
        .map(|t| Arc::new(read_theme(t)))
        .unwrap_or_else(|| Arc::clone(song_theme));
    let footer = el
        .child("smalllines")
        .map(|s| s.children.iter().map(|l| l.text.clone()).collect())
        .unwrap_or_default();
    let text = el.child_text("lyrics");
    let lines = if text.is_empty() {
        Vec::new()
    } else {
        text.lines().map(str::to_string).collect()
    };
    Section::new(el.attr("title").map(str::to_string), lines, footer, theme)
}

/// Minimal element tree; the song format has no mixed content.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut el = Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            el.attrs.push((key, value));
        }
        Ok(el)
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> String {
        self.child(name).map(|c| c.text.clone()).unwrap_or_default()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn read_tree(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let el = Element::open(&start)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::Empty)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}
