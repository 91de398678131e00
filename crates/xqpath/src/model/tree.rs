use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use compact_str::CompactString;
use smallvec::SmallVec;
use string_cache::DefaultAtom;

use super::{NodeKind, QName};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::XdmAtomicValue;

pub type NodeId = u32;

static NEXT_TREE_ORDINAL: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<CompactString>,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
    attributes: SmallVec<[NodeId; 2]>,
    namespaces: SmallVec<[NodeId; 1]>,
    /// One past the last node of this node's subtree (attributes included).
    end: NodeId,
}

/// Nodes of one tree, stored in document order.
///
/// Attribute and namespace nodes directly follow their element, so the preorder index is
/// the document-order key and a subtree is a contiguous index range.
#[derive(Debug)]
pub struct Tree {
    ordinal: u64,
    nodes: Vec<NodeData>,
    base_uri: Option<String>,
}

impl Tree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Handle to a node: shared tree plus index. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    tree: Arc<Tree>,
    id: NodeId,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.tree, &other.tree)
    }
}
impl Eq for Node {}

impl core::hash::Hash for Node {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.tree.ordinal.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        let mut d = f.debug_struct("Node");
        d.field("kind", &data.kind).field("id", &self.id);
        if let Some(name) = &data.name {
            d.field("name", &name.to_string());
        }
        if let Some(value) = &data.value {
            d.field("value", value);
        }
        d.finish()
    }
}

impl Node {
    fn data(&self) -> &NodeData {
        &self.tree.nodes[self.id as usize]
    }

    pub(crate) fn at(&self, id: NodeId) -> Node {
        Node { tree: Arc::clone(&self.tree), id }
    }

    pub(crate) fn kind_at(&self, id: NodeId) -> NodeKind {
        self.tree.nodes[id as usize].kind
    }

    pub(crate) fn parent_id_at(&self, id: NodeId) -> Option<NodeId> {
        self.tree.nodes[id as usize].parent
    }

    pub(crate) fn subtree_end(&self) -> NodeId {
        self.data().end
    }

    pub(crate) fn tree_len(&self) -> NodeId {
        self.tree.nodes.len() as NodeId
    }

    pub(crate) fn child_ids(&self) -> &[NodeId] {
        &self.data().children
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn kind(&self) -> NodeKind {
        self.data().kind
    }

    pub fn name(&self) -> Option<&QName> {
        self.data().name.as_ref()
    }

    pub fn parent(&self) -> Option<Node> {
        self.data().parent.map(|p| self.at(p))
    }

    pub fn root(&self) -> Node {
        // The root is always the first node of its tree.
        self.at(0)
    }

    pub fn children(&self) -> NodeRefs<'_> {
        NodeRefs { tree: &self.tree, ids: self.data().children.iter() }
    }

    pub fn attributes(&self) -> NodeRefs<'_> {
        NodeRefs { tree: &self.tree, ids: self.data().attributes.iter() }
    }

    pub fn namespaces(&self) -> NodeRefs<'_> {
        NodeRefs { tree: &self.tree, ids: self.data().namespaces.iter() }
    }

    pub fn has_children(&self) -> bool {
        !self.data().children.is_empty()
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.tree.base_uri.as_deref()
    }

    /// Raw content of text, comment, PI, attribute and namespace nodes.
    pub fn content(&self) -> Option<&str> {
        self.data().value.as_deref()
    }

    pub fn string_value(&self) -> String {
        let data = self.data();
        match data.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                for id in (self.id + 1)..data.end {
                    let n = &self.tree.nodes[id as usize];
                    if n.kind == NodeKind::Text
                        && let Some(v) = &n.value
                    {
                        out.push_str(v);
                    }
                }
                out
            }
            _ => data.value.as_deref().unwrap_or_default().to_string(),
        }
    }

    pub fn typed_value(&self) -> XdmAtomicValue {
        match self.kind() {
            NodeKind::Comment | NodeKind::ProcessingInstruction | NodeKind::Namespace => {
                XdmAtomicValue::String(self.string_value())
            }
            _ => XdmAtomicValue::UntypedAtomic(self.string_value()),
        }
    }

    /// Total document-order key: tree creation ordinal, then preorder index.
    pub fn doc_order_key(&self) -> (u64, NodeId) {
        (self.tree.ordinal, self.id)
    }

    pub fn compare_document_order(&self, other: &Node) -> Ordering {
        self.doc_order_key().cmp(&other.doc_order_key())
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) && self.id < other.id && other.id < self.data().end
    }

    /// Namespace URI bound to `prefix` on this node or its nearest ancestor declaring it.
    pub fn lookup_namespace_uri(&self, prefix: Option<&str>) -> Option<String> {
        let mut cur = Some(self.clone());
        while let Some(n) = cur {
            for ns in n.namespaces() {
                let declared = ns.name().map(|q| q.local.as_ref()).filter(|p| !p.is_empty());
                if declared == prefix {
                    return ns.content().filter(|u| !u.is_empty()).map(str::to_string);
                }
            }
            cur = n.parent();
        }
        if prefix == Some("xml") {
            return Some(crate::consts::XML_URI.to_string());
        }
        None
    }

    /// In-scope namespace bindings of an element, nearest declaration winning.
    pub fn in_scope_namespaces(&self) -> Vec<(Option<String>, String)> {
        let mut out: Vec<(Option<String>, String)> = vec![(Some("xml".to_string()), crate::consts::XML_URI.to_string())];
        let mut cur = Some(self.clone());
        while let Some(n) = cur {
            for ns in n.namespaces() {
                let prefix = ns.name().map(|q| q.local.to_string()).filter(|p| !p.is_empty());
                if !out.iter().any(|(p, _)| *p == prefix) {
                    out.push((prefix, ns.content().unwrap_or_default().to_string()));
                }
            }
            cur = n.parent();
        }
        if let Some(QName { prefix, ns_uri: Some(uri), .. }) = self.name()
            && self.kind() == NodeKind::Element
        {
            let prefix = prefix.as_ref().map(|p| p.to_string());
            if !out.iter().any(|(p, _)| *p == prefix) {
                out.push((prefix, uri.to_string()));
            }
        }
        out.retain(|(_, uri)| !uri.is_empty());
        out
    }
}

/// Iterator over a list of node ids of one tree.
pub struct NodeRefs<'a> {
    tree: &'a Arc<Tree>,
    ids: core::slice::Iter<'a, NodeId>,
}

impl Iterator for NodeRefs<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        self.ids.next().map(|&id| Node { tree: Arc::clone(self.tree), id })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl DoubleEndedIterator for NodeRefs<'_> {
    fn next_back(&mut self) -> Option<Node> {
        self.ids.next_back().map(|&id| Node { tree: Arc::clone(self.tree), id })
    }
}

impl ExactSizeIterator for NodeRefs<'_> {}

/// Event-style builder producing one immutable tree.
///
/// Nodes are appended in document order; attributes and namespace nodes must be added
/// before the first child of their element.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
    open: Vec<NodeId>,
    base_uri: Option<String>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, kind: NodeKind, name: Option<QName>, value: Option<CompactString>) -> NodeId {
        let id = self.nodes.len() as NodeId;
        let parent = self.open.last().copied();
        self.nodes.push(NodeData {
            kind,
            name,
            value,
            parent,
            children: SmallVec::new(),
            attributes: SmallVec::new(),
            namespaces: SmallVec::new(),
            end: id + 1,
        });
        if let Some(p) = parent {
            let pd = &mut self.nodes[p as usize];
            match kind {
                NodeKind::Attribute => pd.attributes.push(id),
                NodeKind::Namespace => pd.namespaces.push(id),
                _ => pd.children.push(id),
            }
        }
        id
    }

    fn open_has_children(&self) -> bool {
        self.open.last().is_some_and(|&p| !self.nodes[p as usize].children.is_empty())
    }

    pub fn start_document(&mut self) {
        let id = self.push(NodeKind::Document, None, None);
        self.open.push(id);
    }

    pub fn end_document(&mut self) {
        self.close();
    }

    pub fn start_element(&mut self, name: QName) {
        let id = self.push(NodeKind::Element, Some(name), None);
        self.open.push(id);
    }

    pub fn end_element(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(id) = self.open.pop() {
            let end = self.nodes.len() as NodeId;
            self.nodes[id as usize].end = end;
        }
    }

    /// Adds an attribute to the open element (or as a parentless root when nothing is open).
    ///
    /// Fails with `XQTY0024` once the element has children and with `XQDY0025` when an
    /// attribute with the same expanded name already exists.
    pub fn attribute(&mut self, name: QName, value: &str) -> Result<(), Error> {
        if self.open_has_children() {
            return Err(Error::from_code(
                ErrorCode::XQTY0024,
                format!("attribute {name} follows element content"),
            ));
        }
        if let Some(&p) = self.open.last() {
            let duplicate = self.nodes[p as usize].attributes.iter().any(|&a| {
                self.nodes[a as usize]
                    .name
                    .as_ref()
                    .is_some_and(|n| n.local == name.local && n.ns_uri == name.ns_uri)
            });
            if duplicate {
                return Err(Error::from_code(ErrorCode::XQDY0025, format!("duplicate attribute {name}")));
            }
        }
        self.append_attribute(name, value);
        Ok(())
    }

    pub(crate) fn append_attribute(&mut self, name: QName, value: &str) {
        self.push(NodeKind::Attribute, Some(name), Some(CompactString::from(value)));
    }

    /// Declares a namespace on the open element; redundant declarations are ignored.
    pub fn namespace(&mut self, prefix: Option<&str>, uri: &str) -> Result<(), Error> {
        if self.open_has_children() {
            return Err(Error::from_code(ErrorCode::XQTY0024, "namespace node follows element content"));
        }
        let prefix_atom = DefaultAtom::from(prefix.unwrap_or_default());
        if let Some(&p) = self.open.last() {
            for &existing in &self.nodes[p as usize].namespaces {
                let data = &self.nodes[existing as usize];
                if data.name.as_ref().is_some_and(|n| n.local == prefix_atom) {
                    if data.value.as_deref() == Some(uri) {
                        return Ok(());
                    }
                    return Err(Error::from_code(
                        ErrorCode::XQDY0102,
                        format!("conflicting bindings for prefix '{}'", prefix.unwrap_or_default()),
                    ));
                }
            }
        }
        self.append_namespace(prefix, uri);
        Ok(())
    }

    pub(crate) fn append_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        let name = QName { prefix: None, local: DefaultAtom::from(prefix.unwrap_or_default()), ns_uri: None };
        self.push(NodeKind::Namespace, Some(name), Some(CompactString::from(uri)));
    }

    /// Appends text, merging with a directly preceding text sibling. Empty text is dropped.
    pub fn text(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let parent = self.open.last().copied();
        if let Some(last) = self.nodes.last_mut()
            && last.kind == NodeKind::Text
            && last.parent == parent
            && parent.is_some()
            && let Some(v) = &mut last.value
        {
            v.push_str(value);
            return;
        }
        self.push(NodeKind::Text, None, Some(CompactString::from(value)));
    }

    /// Appends a text node even when empty (used for parentless text roots).
    pub(crate) fn text_node(&mut self, value: &str) {
        self.push(NodeKind::Text, None, Some(CompactString::from(value)));
    }

    pub fn comment(&mut self, value: &str) {
        self.push(NodeKind::Comment, None, Some(CompactString::from(value)));
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) {
        self.push(NodeKind::ProcessingInstruction, Some(QName::local(target)), Some(CompactString::from(data)));
    }

    /// Deep copy of `node` into the open element. Documents contribute their children.
    pub fn copy_of(&mut self, node: &Node) -> Result<(), Error> {
        match node.kind() {
            NodeKind::Document => {
                for child in node.children() {
                    self.copy_of(&child)?;
                }
            }
            NodeKind::Element => {
                if let Some(name) = node.name() {
                    self.start_element(name.clone());
                }
                for ns in node.namespaces() {
                    let prefix = ns.name().map(|q| q.local.to_string()).filter(|p| !p.is_empty());
                    self.append_namespace(prefix.as_deref(), ns.content().unwrap_or_default());
                }
                for attr in node.attributes() {
                    if let Some(name) = attr.name() {
                        self.append_attribute(name.clone(), attr.content().unwrap_or_default());
                    }
                }
                for child in node.children() {
                    self.copy_of(&child)?;
                }
                self.end_element();
            }
            NodeKind::Attribute => {
                if let Some(name) = node.name() {
                    self.attribute(name.clone(), node.content().unwrap_or_default())?;
                }
            }
            NodeKind::Namespace => {
                let prefix = node.name().map(|q| q.local.to_string()).filter(|p| !p.is_empty());
                self.namespace(prefix.as_deref(), node.content().unwrap_or_default())?;
            }
            NodeKind::Text => self.text(node.content().unwrap_or_default()),
            NodeKind::Comment => self.comment(node.content().unwrap_or_default()),
            NodeKind::ProcessingInstruction => {
                let target = node.name().map(|q| q.local.to_string()).unwrap_or_default();
                self.processing_instruction(&target, node.content().unwrap_or_default());
            }
        }
        Ok(())
    }

    /// Copies an element carrying all of its in-scope namespaces onto the copy.
    pub(crate) fn copy_element_inheriting(&mut self, node: &Node) -> Result<(), Error> {
        let Some(name) = node.name() else {
            return self.copy_of(node);
        };
        self.start_element(name.clone());
        for (prefix, uri) in node.in_scope_namespaces() {
            if prefix.as_deref() != Some("xml") {
                self.append_namespace(prefix.as_deref(), &uri);
            }
        }
        for attr in node.attributes() {
            if let Some(name) = attr.name() {
                self.append_attribute(name.clone(), attr.content().unwrap_or_default());
            }
        }
        for child in node.children() {
            self.copy_of(&child)?;
        }
        self.end_element();
        Ok(())
    }

    /// Closes open nodes and returns the root. An empty builder yields an empty document.
    pub fn finish(mut self) -> Node {
        if self.nodes.is_empty() {
            self.start_document();
        }
        while !self.open.is_empty() {
            self.close();
        }
        let tree = Tree {
            ordinal: NEXT_TREE_ORDINAL.fetch_add(1, AtomicOrdering::Relaxed),
            nodes: self.nodes,
            base_uri: self.base_uri,
        };
        Node { tree: Arc::new(tree), id: 0 }
    }
}
