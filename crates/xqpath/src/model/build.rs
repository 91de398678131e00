//! Fixture builders for quick tree creation in tests and benches.
//!
//! ```
//! use xqpath::model::build::{attr, doc, elem, ns, text};
//!
//! // <root xmlns:p="urn:one" id="r"><p:child>Hello</p:child></root>
//! let document = doc()
//!     .child(
//!         elem("root")
//!             .namespace(ns("p", "urn:one"))
//!             .attr(attr("id", "r"))
//!             .child(elem("p:child").child(text("Hello"))),
//!     )
//!     .build();
//! let root = document.children().next().unwrap();
//! assert_eq!(root.string_value(), "Hello");
//! let child = root.children().next().unwrap();
//! assert_eq!(child.name().unwrap().ns_uri.as_deref(), Some("urn:one"));
//! ```
//!
//! Prefixed names resolve against namespaces declared on the node or its ancestors in the
//! same builder; unknown prefixes leave the name without a namespace.

use super::{Node, NodeKind, QName, TreeBuilder};

#[derive(Debug, Clone)]
pub struct NodeSpec {
    kind: NodeKind,
    name: Option<String>,
    value: Option<String>,
    namespaces: Vec<NodeSpec>,
    attributes: Vec<NodeSpec>,
    children: Vec<NodeSpec>,
}

impl NodeSpec {
    fn new(kind: NodeKind, name: Option<&str>, value: Option<&str>) -> Self {
        Self {
            kind,
            name: name.map(str::to_string),
            value: value.map(str::to_string),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children<I: IntoIterator<Item = NodeSpec>>(mut self, it: I) -> Self {
        self.children.extend(it);
        self
    }

    pub fn attr(mut self, attr: NodeSpec) -> Self {
        debug_assert!(attr.kind == NodeKind::Attribute);
        self.attributes.push(attr);
        self
    }

    pub fn namespace(mut self, ns: NodeSpec) -> Self {
        debug_assert!(ns.kind == NodeKind::Namespace);
        self.namespaces.push(ns);
        self
    }

    pub fn build(self) -> Node {
        let mut builder = TreeBuilder::new();
        let mut scope: Vec<(String, String)> = Vec::new();
        self.emit(&mut builder, &mut scope);
        builder.finish()
    }

    fn emit(&self, b: &mut TreeBuilder, scope: &mut Vec<(String, String)>) {
        let value = self.value.as_deref().unwrap_or_default();
        match self.kind {
            NodeKind::Document => {
                b.start_document();
                for c in &self.children {
                    c.emit(b, scope);
                }
                b.end_document();
            }
            NodeKind::Element => {
                let mark = scope.len();
                for n in &self.namespaces {
                    scope.push((n.name.clone().unwrap_or_default(), n.value.clone().unwrap_or_default()));
                }
                b.start_element(resolve(self.name.as_deref().unwrap_or_default(), scope, true));
                for n in &self.namespaces {
                    let prefix = n.name.as_deref().filter(|p| !p.is_empty());
                    b.append_namespace(prefix, n.value.as_deref().unwrap_or_default());
                }
                for a in &self.attributes {
                    let name = resolve(a.name.as_deref().unwrap_or_default(), scope, false);
                    b.append_attribute(name, a.value.as_deref().unwrap_or_default());
                }
                for c in &self.children {
                    c.emit(b, scope);
                }
                b.end_element();
                scope.truncate(mark);
            }
            NodeKind::Attribute => {
                let name = resolve(self.name.as_deref().unwrap_or_default(), scope, false);
                b.append_attribute(name, value);
            }
            NodeKind::Namespace => {
                b.append_namespace(self.name.as_deref().filter(|p| !p.is_empty()), value);
            }
            NodeKind::Text => {
                if b.is_empty() {
                    b.text_node(value);
                } else {
                    b.text(value);
                }
            }
            NodeKind::Comment => b.comment(value),
            NodeKind::ProcessingInstruction => {
                b.processing_instruction(self.name.as_deref().unwrap_or_default(), value);
            }
        }
    }
}

fn resolve(lexical: &str, scope: &[(String, String)], use_default: bool) -> QName {
    let lookup = |prefix: &str| scope.iter().rev().find(|(p, _)| p == prefix).map(|(_, u)| u.as_str());
    match lexical.split_once(':') {
        Some((prefix, local)) => QName::new(Some(prefix), local, lookup(prefix)),
        None if use_default => QName::new(None, lexical, lookup("")),
        None => QName::local(lexical),
    }
}

pub fn doc() -> NodeSpec {
    NodeSpec::new(NodeKind::Document, None, None)
}

pub fn elem(name: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Element, Some(name), None)
}

pub fn attr(name: &str, value: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Attribute, Some(name), Some(value))
}

pub fn text(value: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Text, None, Some(value))
}

pub fn comment(value: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Comment, None, Some(value))
}

pub fn pi(target: &str, data: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::ProcessingInstruction, Some(target), Some(data))
}

/// Namespace declaration; an empty prefix declares the default element namespace.
pub fn ns(prefix: &str, uri: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Namespace, Some(prefix), Some(uri))
}
