//! Minimal XML document tree for licence and configuration files.
//!
//! Licence signatures are computed over a pretty-printed serialisation of
//! the document, so the tree keeps the raw `text` and `tail` of every
//! element and the canonical writer reproduces the signer's output byte for
//! byte: CRLF line endings, two spaces per nesting level, no XML
//! declaration, and `<Tag />` for childless elements with no text.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::{LicenceError, LicenceResult};

/// One XML element with its text content and trailing text (`tail`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub tail: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: None,
            tail: None,
            children: Vec::new(),
        }
    }

    /// Append a child element.
    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// First direct child with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Text of a direct child, if the child exists and has text.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|c| c.text.as_deref())
    }
}

fn element_from_start(start: &BytesStart<'_>) -> LicenceResult<Element> {
    let name = String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|e| LicenceError::Document(format!("invalid element name: {e}")))?;
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| LicenceError::Document(format!("invalid attribute: {e}")))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| LicenceError::Document(format!("invalid attribute value: {e}")))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn append_text(stack: &mut [Element], value: &str) {
    // Text before the root element carries no meaning.
    let Some(current) = stack.last_mut() else {
        return;
    };
    if let Some(last_child) = current.children.last_mut() {
        match &mut last_child.tail {
            Some(tail) => tail.push_str(value),
            None => last_child.tail = Some(value.to_string()),
        }
    } else {
        match &mut current.text {
            Some(text) => text.push_str(value),
            None => current.text = Some(value.to_string()),
        }
    }
}

/// Parse an XML document into its root element.
///
/// Comments, processing instructions and the declaration are skipped;
/// whitespace inside the root is preserved.
pub fn parse(xml: &str) -> LicenceResult<Element> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| LicenceError::Document(format!("malformed XML: {e}")))?;
        match event {
            Event::Start(ref start) => {
                stack.push(element_from_start(start)?);
            }
            Event::Empty(ref start) => {
                let element = element_from_start(start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(LicenceError::Document(
                            "multiple root elements".to_string(),
                        ))
                    }
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| LicenceError::Document("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(LicenceError::Document(
                            "multiple root elements".to_string(),
                        ))
                    }
                }
            }
            Event::Text(ref text) => {
                let value = text
                    .unescape()
                    .map_err(|e| LicenceError::Document(format!("invalid text: {e}")))?;
                append_text(&mut stack, &value);
            }
            Event::CData(ref data) => {
                let value = String::from_utf8_lossy(data).into_owned();
                append_text(&mut stack, &value);
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    root.ok_or_else(|| LicenceError::Document("document has no root element".to_string()))
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn indent(level: usize) -> String {
    let mut padding = String::from("\r\n");
    for _ in 0..level {
        padding.push_str("  ");
    }
    padding
}

/// Apply the licence layout in place: CRLF line endings and two spaces per
/// nesting level, leaving non-whitespace text untouched.
///
/// For a non-leaf element the opening tag is followed by a break at
/// `level + 1`, and its final child's tail drops back to `level - 1`. A
/// leaf below the root gets a tail break at its own level.
pub fn apply_licence_layout(element: &mut Element, level: usize) {
    if !element.children.is_empty() {
        if is_blank(&element.text) {
            element.text = Some(indent(level + 1));
        }
        for child in &mut element.children {
            apply_licence_layout(child, level + 1);
        }
        if let Some(last) = element.children.last_mut() {
            if is_blank(&last.tail) {
                last.tail = Some(indent(level.saturating_sub(1)));
            }
        }
    } else if level > 0 && is_blank(&element.tail) {
        element.tail = Some(indent(level));
    }
}

fn escape_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#09;"),
            other => out.push(other),
        }
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }
    let has_text = element.text.as_deref().is_some_and(|t| !t.is_empty());
    if has_text || !element.children.is_empty() {
        out.push('>');
        if let Some(text) = &element.text {
            escape_text(text, out);
        }
        for child in &element.children {
            write_element(child, out);
        }
        out.push_str("</");
        out.push_str(&element.name);
        out.push('>');
    } else {
        out.push_str(" />");
    }
    if let Some(tail) = &element.tail {
        escape_text(tail, out);
    }
}

/// Serialise a tree to UTF-8 bytes without an XML declaration.
pub fn to_bytes(element: &Element) -> Vec<u8> {
    let mut out = String::new();
    write_element(element, &mut out);
    out.into_bytes()
}
