// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Minimal XML tree and writer used by the CVAT document codec.
//!
//! Documents are small enough to be held in memory, so parsing produces a
//! tree of [`XmlNode`]s. A single child and repeated children are accessed
//! the same way through [`XmlNode::children_named`].

use crate::Error;
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(e: &BytesStart) -> Result<Self, Error> {
        let mut node = XmlNode {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in e.attributes() {
            let attr = attr?;
            node.attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()?.into_owned(),
            ));
        }
        Ok(node)
    }

    /// Parses a document and returns its root element.
    pub fn parse(xml: &str) -> Result<XmlNode, Error> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = vec![];
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => stack.push(XmlNode::from_start(e)?),
                Event::Empty(ref e) => {
                    let node = XmlNode::from_start(e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Text(ref e) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(node) = stack.last_mut() {
                        let text = e.into_inner();
                        node.text.push_str(&String::from_utf8_lossy(&text));
                    }
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::InvalidXml("unbalanced end tag".to_owned()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::InvalidXml("unexpected end of document".to_owned()));
        }

        root.ok_or_else(|| Error::InvalidXml("document has no root element".to_owned()))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn require_attr(&self, name: &str) -> Result<&str, Error> {
        self.attr(name).ok_or_else(|| {
            Error::InvalidXml(format!("<{}> is missing attribute '{}'", self.name, name))
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Every child with the given name, whether there is one or many.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Trimmed text of a child element.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.trim())
    }
}

/// Indented XML writer over an in-memory buffer.
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Result<Self, Error> {
        let mut writer = XmlWriter {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        writer.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        Ok(writer)
    }

    fn write(&mut self, event: Event) -> Result<(), Error> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::XmlError(e.into()))
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, String)]) -> Result<(), Error> {
        let mut start = BytesStart::new(name);
        for (key, value) in attributes {
            start.push_attribute((*key, value.as_str()));
        }
        self.write(Event::Start(start))
    }

    pub fn end(&mut self, name: &str) -> Result<(), Error> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// `<name>text</name>`, or `<name/>` for empty text.
    pub fn element(&mut self, name: &str, text: &str) -> Result<(), Error> {
        if text.is_empty() {
            return self.write(Event::Empty(BytesStart::new(name)));
        }
        self.write(Event::Start(BytesStart::new(name)))?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Element with attributes and text content.
    pub fn element_with_attributes(
        &mut self,
        name: &str,
        attributes: &[(&str, String)],
        text: &str,
    ) -> Result<(), Error> {
        self.start(name, attributes)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub fn finish(self) -> Result<String, Error> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|_| Error::InvalidXml("invalid UTF-8 in XML output".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_and_repeated_children() {
        let root = XmlNode::parse(
            r#"<?xml version="1.0"?>
            <annotations>
              <image id="0" name="a.jpg"><box label="cat" xtl="1"/></image>
              <image id="1" name="b &amp; c.jpg">
                <box label="dog"/>
                <box label="dog"><attribute name="color">brown</attribute></box>
              </image>
            </annotations>"#,
        )
        .unwrap();

        let images: Vec<&XmlNode> = root.children_named("image").collect();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].children_named("box").count(), 1);
        assert_eq!(images[1].children_named("box").count(), 2);
        assert_eq!(images[1].attr("name"), Some("b & c.jpg"));

        let attribute = images[1].children[1].child("attribute").unwrap();
        assert_eq!(attribute.attr("name"), Some("color"));
        assert_eq!(attribute.text, "brown");
        assert!(images[0].children[0].require_attr("ytl").is_err());
    }

    #[test]
    fn test_writer_output_parses_back() {
        let mut writer = XmlWriter::new().unwrap();
        writer.start("labels", &[]).unwrap();
        writer.element("name", "a < b").unwrap();
        writer.element("overlap", "").unwrap();
        writer
            .element_with_attributes("attribute", &[("name", "x".to_string())], "1")
            .unwrap();
        writer.end("labels").unwrap();
        let xml = writer.finish().unwrap();

        assert!(xml.starts_with("<?xml"));
        let root = XmlNode::parse(&xml).unwrap();
        assert_eq!(root.child_text("name"), Some("a < b"));
        assert_eq!(root.child("overlap").map(|n| n.text.as_str()), Some(""));
        assert_eq!(
            root.child("attribute").and_then(|n| n.attr("name")),
            Some("x")
        );
    }

    #[test]
    fn test_rejects_truncated_documents() {
        assert!(XmlNode::parse("<annotations><image>").is_err());
        assert!(XmlNode::parse("").is_err());
    }
}
