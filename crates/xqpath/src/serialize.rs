//! XML rendering of result sequences.
//!
//! Adjacent atomic values are separated by a single space; nodes are written as markup with
//! the namespace declarations their names need in the output.

use std::fmt;

use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesPI, BytesStart, BytesText, Event};

use crate::consts::{XML_URI, XMLNS_URI};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Node, NodeKind, QName};
use crate::xdm::XdmItem;

fn write_err(e: impl fmt::Display) -> Error {
    Error::from_code(ErrorCode::FOER0000, format!("serialization failed: {e}"))
}

/// In-scope bindings while writing, innermost last. `None` prefix is the default namespace.
#[derive(Default)]
struct Scope {
    bindings: Vec<(Option<String>, String)>,
    marks: Vec<usize>,
}

impl Scope {
    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings.iter().rev().find(|(p, _)| p.as_deref() == prefix).map(|(_, u)| u.as_str())
    }

    fn enter(&mut self) {
        self.marks.push(self.bindings.len());
    }

    fn leave(&mut self) {
        if let Some(m) = self.marks.pop() {
            self.bindings.truncate(m);
        }
    }

    /// Records `prefix -> uri` and reports whether a declaration has to be written.
    fn require(&mut self, prefix: Option<&str>, uri: &str) -> bool {
        if prefix == Some("xml") {
            return false;
        }
        let current = self.lookup(prefix).unwrap_or("");
        if current == uri {
            return false;
        }
        self.bindings.push((prefix.map(str::to_string), uri.to_string()));
        true
    }
}

fn declare(scope: &mut Scope, start: &mut BytesStart<'_>, prefix: Option<&str>, uri: &str) {
    if scope.require(prefix, uri) {
        match prefix {
            Some(p) => start.push_attribute((format!("xmlns:{p}").as_str(), uri)),
            None => start.push_attribute(("xmlns", uri)),
        }
    }
}

fn lexical(name: &QName) -> String {
    match &name.prefix {
        Some(p) => format!("{p}:{}", name.local),
        None => name.local.to_string(),
    }
}

struct Serializer {
    writer: Writer<Vec<u8>>,
    scope: Scope,
}

impl Serializer {
    fn new() -> Self {
        Self { writer: Writer::new(Vec::new()), scope: Scope::default() }
    }

    fn text(&mut self, s: &str) -> Result<(), Error> {
        self.writer.write_event(Event::Text(BytesText::new(s))).map_err(write_err)?;
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), Error> {
        match node.kind() {
            NodeKind::Document => {
                for child in node.children() {
                    self.node(&child)?;
                }
            }
            NodeKind::Element => self.element(node)?,
            NodeKind::Attribute => {
                // A lone attribute renders as its `name="value"` pair.
                let name = node.name().map(lexical).unwrap_or_default();
                let pair = format!("{name}=\"{}\"", escape(&node.string_value()));
                self.writer.get_mut().extend_from_slice(pair.as_bytes());
            }
            NodeKind::Text => self.text(node.content().unwrap_or_default())?,
            NodeKind::Comment => {
                self.writer
                    .write_event(Event::Comment(BytesText::from_escaped(node.content().unwrap_or_default())))
                    .map_err(write_err)?;
            }
            NodeKind::ProcessingInstruction => {
                let target = node.name().map(|n| n.local.to_string()).unwrap_or_default();
                let data = node.content().unwrap_or_default();
                let body = if data.is_empty() { target } else { format!("{target} {data}") };
                self.writer.write_event(Event::PI(BytesPI::new(body))).map_err(write_err)?;
            }
            NodeKind::Namespace => self.text(node.content().unwrap_or_default())?,
        }
        Ok(())
    }

    fn element(&mut self, node: &Node) -> Result<(), Error> {
        let Some(name) = node.name() else {
            return Err(write_err("element without a name"));
        };
        let tag = lexical(name);
        self.scope.enter();
        let mut start = BytesStart::new(tag.as_str());
        for ns in node.namespaces() {
            let prefix = ns.name().map(|n| n.local.to_string()).filter(|p| !p.is_empty());
            declare(&mut self.scope, &mut start, prefix.as_deref(), ns.content().unwrap_or_default());
        }
        declare(&mut self.scope, &mut start, name.prefix.as_deref(), name.ns_uri.as_deref().unwrap_or(""));
        for attr in node.attributes() {
            let Some(an) = attr.name() else { continue };
            if let (Some(p), Some(uri)) = (an.prefix.as_deref(), an.ns_uri.as_deref())
                && uri != XML_URI
                && uri != XMLNS_URI
            {
                declare(&mut self.scope, &mut start, Some(p), uri);
            }
        }
        for attr in node.attributes() {
            let an = attr.name().map(lexical).unwrap_or_default();
            let value = attr.string_value();
            start.push_attribute((an.as_str(), value.as_str()));
        }
        if node.has_children() {
            self.writer.write_event(Event::Start(start)).map_err(write_err)?;
            for child in node.children() {
                self.node(&child)?;
            }
            self.writer.write_event(Event::End(BytesEnd::new(tag.as_str()))).map_err(write_err)?;
        } else {
            self.writer.write_event(Event::Empty(start)).map_err(write_err)?;
        }
        self.scope.leave();
        Ok(())
    }

    fn finish(self) -> Result<String, Error> {
        String::from_utf8(self.writer.into_inner()).map_err(write_err)
    }
}

/// Renders a result sequence as XML text.
pub fn serialize_sequence(items: &[XdmItem]) -> Result<String, Error> {
    let mut ser = Serializer::new();
    let mut previous_atomic = false;
    for item in items {
        match item {
            XdmItem::Atomic(a) => {
                if previous_atomic {
                    ser.text(" ")?;
                }
                ser.text(&a.canonical_string())?;
                previous_atomic = true;
            }
            XdmItem::Node(n) => {
                ser.node(n)?;
                previous_atomic = false;
            }
        }
    }
    ser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build::{attr, comment, doc, elem, ns, pi, text};
    use crate::xdm::XdmAtomicValue;

    #[test]
    fn atomics_are_space_separated() {
        let items = vec![XdmAtomicValue::Integer(1).into(), XdmAtomicValue::String("a<b".into()).into()];
        assert_eq!(serialize_sequence(&items).unwrap(), "1 a&lt;b");
    }

    #[test]
    fn element_tree_with_namespaces() {
        let d = doc()
            .child(
                elem("p:root")
                    .namespace(ns("p", "urn:p"))
                    .attr(attr("id", "1"))
                    .child(elem("p:leaf").child(text("x & y")))
                    .child(comment("note"))
                    .child(pi("go", "now")),
            )
            .build();
        assert_eq!(
            serialize_sequence(&[d.into()]).unwrap(),
            r#"<p:root xmlns:p="urn:p" id="1"><p:leaf>x &amp; y</p:leaf><!--note--><?go now?></p:root>"#
        );
    }
}
