//! Owned element tree over quick-xml events.
//!
//! The codec works on this tree rather than on the raw event stream so a
//! device element can be consumed field by field and whatever is left over
//! kept verbatim. Reading drops whitespace-only text between elements;
//! writing regenerates it with two-space indentation.

use crate::error::AppError;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    DocType(String),
    Declaration(XmlDecl),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, XmlNode::Text(t) if t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDecl {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    pub fn element(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated character data of the direct children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    pub fn has_element_children(&self) -> bool {
        self.children
            .iter()
            .any(|c| matches!(c, XmlNode::Element(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    /// Declaration, comments and doctype ahead of the root element.
    pub prolog: Vec<XmlNode>,
    pub root: XmlElement,
    /// Comments and processing instructions after the root element.
    pub epilog: Vec<XmlNode>,
}

fn malformed(reader: &Reader<&[u8]>, msg: impl std::fmt::Display) -> AppError {
    AppError::MalformedXml(format!("{msg} (at byte {})", reader.buffer_position()))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

fn element_from_start(e: &BytesStart) -> Result<XmlElement, AppError> {
    let mut el = XmlElement::new(lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr?;
        let key = lossy(attr.key.as_ref());
        let value = attr.unescape_value()?.to_string();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn decl_from_event(e: &BytesDecl) -> Result<XmlDecl, AppError> {
    let version = lossy(&e.version()?);
    let encoding = e.encoding().transpose()?.map(|v| lossy(&v));
    let standalone = e.standalone().transpose()?.map(|v| lossy(&v));
    Ok(XmlDecl {
        version,
        encoding,
        standalone,
    })
}

/// Drop whitespace-only text once an element turns out to hold child elements.
fn close_element(mut el: XmlElement) -> XmlElement {
    if el.has_element_children() {
        el.children.retain(|c| !c.is_blank_text());
    }
    el
}

struct TreeBuilder {
    stack: Vec<XmlElement>,
    prolog: Vec<XmlNode>,
    root: Option<XmlElement>,
    epilog: Vec<XmlNode>,
}

impl TreeBuilder {
    fn attach(&mut self, node: XmlNode) -> Result<(), String> {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match node {
            XmlNode::Element(el) => {
                if self.root.is_some() {
                    return Err(format!("second root element <{}>", el.name));
                }
                self.root = Some(el);
            }
            XmlNode::Text(t) | XmlNode::CData(t) => {
                if !t.trim().is_empty() {
                    return Err("character data outside the root element".to_string());
                }
            }
            other => {
                if self.root.is_some() {
                    self.epilog.push(other);
                } else {
                    self.prolog.push(other);
                }
            }
        }
        Ok(())
    }
}

pub fn parse_document(text: &str) -> Result<XmlDocument, AppError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut tree = TreeBuilder {
        stack: Vec::new(),
        prolog: Vec::new(),
        root: None,
        epilog: Vec::new(),
    };

    loop {
        let node = match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let el = element_from_start(e)?;
                tree.stack.push(el);
                continue;
            }
            Ok(Event::Empty(ref e)) => XmlNode::Element(element_from_start(e)?),
            Ok(Event::End(ref e)) => {
                let el = tree.stack.pop().ok_or_else(|| {
                    malformed(
                        &reader,
                        format!("unexpected closing tag </{}>", lossy(e.name().as_ref())),
                    )
                })?;
                XmlNode::Element(close_element(el))
            }
            Ok(Event::Text(ref e)) => {
                let t = e.unescape().map_err(|err| malformed(&reader, err))?;
                XmlNode::Text(t.to_string())
            }
            Ok(Event::CData(ref e)) => XmlNode::CData(lossy(e)),
            Ok(Event::Comment(ref e)) => XmlNode::Comment(lossy(e)),
            Ok(Event::Decl(ref e)) => XmlNode::Declaration(decl_from_event(e)?),
            Ok(Event::PI(ref e)) => XmlNode::ProcessingInstruction(lossy(e)),
            Ok(Event::DocType(ref e)) => XmlNode::DocType(lossy(e)),
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(&reader, e)),
        };
        tree.attach(node).map_err(|msg| malformed(&reader, msg))?;
    }

    if let Some(open) = tree.stack.last() {
        return Err(malformed(&reader, format!("unclosed element <{}>", open.name)));
    }
    let root = tree
        .root
        .ok_or_else(|| AppError::MalformedXml("document has no root element".to_string()))?;

    Ok(XmlDocument {
        prolog: tree.prolog,
        root,
        epilog: tree.epilog,
    })
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), AppError> {
    writer
        .write_event(event)
        .map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<(), AppError> {
    match node {
        XmlNode::Element(el) => write_element(writer, el),
        XmlNode::Text(t) => emit(writer, Event::Text(BytesText::from_escaped(partial_escape(t.as_str())))),
        XmlNode::CData(t) => emit(writer, Event::CData(BytesCData::new(t.as_str()))),
        XmlNode::Comment(t) => emit(writer, Event::Comment(BytesText::from_escaped(t.as_str()))),
        XmlNode::DocType(t) => emit(writer, Event::DocType(BytesText::from_escaped(t.as_str()))),
        XmlNode::ProcessingInstruction(t) => emit(writer, Event::PI(BytesPI::new(t.as_str()))),
        XmlNode::Declaration(d) => emit(
            writer,
            Event::Decl(BytesDecl::new(
                &d.version,
                d.encoding.as_deref(),
                d.standalone.as_deref(),
            )),
        ),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &XmlElement) -> Result<(), AppError> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if el.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for child in &el.children {
        write_node(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(el.name.as_str())))
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String, AppError> {
    let mut out = String::from_utf8(writer.into_inner())
        .map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))?;
    out.push('\n');
    Ok(out)
}

pub fn write_document(doc: &XmlDocument) -> Result<String, AppError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    for node in &doc.prolog {
        write_node(&mut writer, node)?;
    }
    write_element(&mut writer, &doc.root)?;
    for node in &doc.epilog {
        write_node(&mut writer, node)?;
    }
    finish(writer)
}

pub fn write_fragment(el: &XmlElement) -> Result<String, AppError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_element(&mut writer, el)?;
    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_layout_whitespace_but_keeps_leaf_text() {
        let doc = parse_document("<a>\n  <b> x </b>\n  <c/>\n</a>").unwrap();
        assert_eq!(doc.root.children.len(), 2);
        assert_eq!(doc.root.element("b").unwrap().text(), " x ");
    }

    #[test]
    fn writes_two_space_indented_output() {
        let doc = parse_document(r#"<a k="v"><b>text</b><c/></a>"#).unwrap();
        let out = write_document(&doc).unwrap();
        assert_eq!(out, "<a k=\"v\">\n  <b>text</b>\n  <c/>\n</a>\n");
    }

    #[test]
    fn unclosed_tag_is_malformed() {
        let err = parse_document("<domain><devices>").unwrap_err();
        assert!(err.is_malformed_xml());
    }

    #[test]
    fn mismatched_tag_is_malformed() {
        let err = parse_document("<a><b></a></b>").unwrap_err();
        assert!(err.is_malformed_xml());
    }

    #[test]
    fn second_root_is_malformed() {
        assert!(parse_document("<a/><b/>").unwrap_err().is_malformed_xml());
        assert!(parse_document("   ").unwrap_err().is_malformed_xml());
    }

    #[test]
    fn prolog_and_comments_survive() {
        let src = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!-- managed -->\n<a>\n  <!-- note -->\n  <b/>\n</a>\n";
        let doc = parse_document(src).unwrap();
        assert_eq!(doc.prolog.len(), 2);
        assert_eq!(write_document(&doc).unwrap(), src);
    }

    #[test]
    fn processing_instructions_keep_their_own_line() {
        let src = "<?xml version=\"1.0\"?>\n<?xml-stylesheet type=\"text/xsl\" href=\"domain.xsl\"?>\n<a>\n  <b/>\n</a>\n";
        let doc = parse_document(src).unwrap();
        assert!(matches!(&doc.prolog[1], XmlNode::ProcessingInstruction(t) if t.starts_with("xml-stylesheet")));
        assert_eq!(write_document(&doc).unwrap(), src);
    }

    #[test]
    fn escapes_special_characters() {
        let doc = parse_document(r#"<a v="x &amp; &quot;y&quot;">1 &lt; 2</a>"#).unwrap();
        assert_eq!(doc.root.attr("v"), Some("x & \"y\""));
        assert_eq!(doc.root.text(), "1 < 2");
        let out = write_document(&doc).unwrap();
        assert_eq!(out, "<a v=\"x &amp; &quot;y&quot;\">1 &lt; 2</a>\n");
    }
}
