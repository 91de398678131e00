//! Node model: an arena-backed, immutable tree with stable identity and document order.

use core::fmt;

use string_cache::DefaultAtom;

use crate::xdm::ExpandedName;

pub mod build;
mod tree;
pub mod xml;

pub use tree::{Node, NodeId, Tree, TreeBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Document => "document-node",
            NodeKind::Element => "element",
            NodeKind::Attribute => "attribute",
            NodeKind::Text => "text",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing-instruction",
            NodeKind::Namespace => "namespace-node",
        }
    }
}

/// Node name as stored in the tree. The prefix is kept for serialization and `fn:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<DefaultAtom>,
    pub local: DefaultAtom,
    pub ns_uri: Option<DefaultAtom>,
}

impl QName {
    pub fn local(local: &str) -> Self {
        Self { prefix: None, local: DefaultAtom::from(local), ns_uri: None }
    }

    pub fn new(prefix: Option<&str>, local: &str, ns_uri: Option<&str>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(DefaultAtom::from),
            local: DefaultAtom::from(local),
            ns_uri: ns_uri.filter(|u| !u.is_empty()).map(DefaultAtom::from),
        }
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName {
            ns_uri: self.ns_uri.as_ref().map(|u| u.to_string()),
            local: self.local.to_string(),
        }
    }

    /// Compares namespace and local name, ignoring the prefix.
    pub fn matches(&self, name: &ExpandedName) -> bool {
        self.local.as_ref() == name.local && self.ns_uri.as_deref() == name.ns_uri.as_deref()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{p}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}
