//! Markup Walk - Element/Attribute Events
//!
//! Lenient event-based walk over emitted markup. Only start tags and their
//! attributes are of interest; text and unbalanced end tags are tolerated.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Malformed markup at byte {position}: {message}")]
pub struct MarkupError {
    pub position: usize,
    pub message: String,
}

/// A start (or self-closing) tag as seen in the source markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementTag {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Byte offset just past the tag name; attributes may be spliced in here.
    pub name_end: usize,
    pub self_closing: bool,
}

impl ElementTag {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug)]
pub enum MarkupEvent<'a> {
    Open(&'a ElementTag),
    Close(&'a str),
}

/// Visit every element open/close in document order.
pub fn walk(markup: &str, mut visit: impl FnMut(MarkupEvent<'_>)) -> Result<(), MarkupError> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|err| MarkupError {
            position: reader.buffer_position() as usize,
            message: err.to_string(),
        })?;
        match event {
            Event::Start(e) => {
                let tag = element_tag(markup, before, &e, false);
                visit(MarkupEvent::Open(&tag));
            }
            Event::Empty(e) => {
                let tag = element_tag(markup, before, &e, true);
                visit(MarkupEvent::Open(&tag));
                visit(MarkupEvent::Close(&tag.name));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                visit(MarkupEvent::Close(&name));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn element_tag(markup: &str, before: usize, e: &BytesStart<'_>, self_closing: bool) -> ElementTag {
    let raw_name = e.name();
    let name = String::from_utf8_lossy(raw_name.as_ref()).to_ascii_lowercase();
    // The reader may or may not have consumed the '<' before reporting its position.
    let from = before.saturating_sub(1);
    let open = markup.as_bytes()[from..]
        .iter()
        .position(|&b| b == b'<')
        .map_or(before, |i| from + i);
    let attributes = e
        .html_attributes()
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect();

    ElementTag {
        name,
        attributes,
        name_end: open + 1 + raw_name.as_ref().len(),
        self_closing,
    }
}

/// Every `class` attribute value, in document order.
pub fn class_attributes(markup: &str) -> Result<Vec<String>, MarkupError> {
    let mut classes = vec![];
    walk(markup, |event| {
        if let MarkupEvent::Open(tag) = event {
            if let Some(class) = tag.attr("class") {
                classes.push(class.to_string());
            }
        }
    })?;
    Ok(classes)
}

/// Insert `name="value"` attributes at the given byte offsets.
///
/// Offsets must come from [`ElementTag::name_end`] of the same markup.
pub fn splice_attributes(markup: &str, mut inserts: Vec<(usize, String, String)>) -> String {
    inserts.sort_by_key(|(at, _, _)| *at);
    let mut out = String::with_capacity(markup.len() + inserts.len() * 16);
    let mut cursor = 0;
    for (at, name, value) in inserts {
        out.push_str(&markup[cursor..at]);
        out.push(' ');
        out.push_str(&name);
        out.push_str("=\"");
        out.push_str(&escape_attr(&value));
        out.push('"');
        cursor = at;
    }
    out.push_str(&markup[cursor..]);
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_attributes_in_order() {
        let html = r#"<div class="a b"><p class="is-style-rounded">x</p><img src="i.png" class="c"></div>"#;
        let classes = class_attributes(html).unwrap();
        assert_eq!(classes, vec!["a b", "is-style-rounded", "c"]);
    }

    #[test]
    fn test_tolerates_unbalanced_html() {
        let html = r#"<figure class="x"><img src="a.png"><figcaption>Hi</figcaption></figure></div>"#;
        let mut opened = vec![];
        walk(html, |event| {
            if let MarkupEvent::Open(tag) = event {
                opened.push(tag.name.clone());
            }
        })
        .unwrap();
        assert_eq!(opened, vec!["figure", "img", "figcaption"]);
    }

    #[test]
    fn test_splice_after_tag_name() {
        let html = "<p>a</p><figure class=\"x\">b</figure>";
        let mut at = 0;
        walk(html, |event| {
            if let MarkupEvent::Open(tag) = event {
                if tag.name == "figure" {
                    at = tag.name_end;
                }
            }
        })
        .unwrap();
        let out = splice_attributes(html, vec![(at, "data-id".into(), "7".into())]);
        assert_eq!(out, "<p>a</p><figure data-id=\"7\" class=\"x\">b</figure>");
    }
}
