//! Axis navigation over the arena tree.
//!
//! Every axis is a lazy iterator over node ids of one tree. Forward axes yield document
//! order, reverse axes yield reverse document order (nearest node first).

use smallvec::SmallVec;

use crate::compiler::ir::AxisIR;
use crate::model::{Node, NodeId, NodeKind};

/// Nodes reachable from a context node along one axis.
pub struct AxisIter {
    node: Node,
    state: State,
}

enum State {
    Done,
    One(NodeId),
    /// Explicit id list (children, attributes, namespaces, siblings), consumed in order.
    List(std::vec::IntoIter<NodeId>),
    /// Preorder scan over `[next, end)`, skipping attribute and namespace nodes.
    Scan { next: NodeId, end: NodeId },
    Ancestors(Option<NodeId>),
    /// Reverse preorder scan from `next` down to the root, skipping ancestors.
    Preceding { next: Option<NodeId>, ancestors: SmallVec<[NodeId; 16]> },
}

impl AxisIter {
    pub fn new(node: &Node, axis: AxisIR) -> Self {
        let id = node.id();
        let state = match axis {
            AxisIR::SelfAxis => State::One(id),
            AxisIR::Child => State::List(node.child_ids().to_vec().into_iter()),
            AxisIR::Attribute => State::List(node.attributes().map(|a| a.id()).collect::<Vec<_>>().into_iter()),
            AxisIR::Namespace => State::List(node.namespaces().map(|n| n.id()).collect::<Vec<_>>().into_iter()),
            AxisIR::Parent => match node.parent_id_at(id) {
                Some(p) => State::One(p),
                None => State::Done,
            },
            AxisIR::Descendant if is_leaf_kind(node.kind()) => State::Done,
            AxisIR::Descendant => State::Scan { next: id + 1, end: node.subtree_end() },
            AxisIR::DescendantOrSelf if is_leaf_kind(node.kind()) => State::One(id),
            AxisIR::DescendantOrSelf => State::Scan { next: id, end: node.subtree_end() },
            AxisIR::Following => State::Scan { next: node.subtree_end(), end: node.tree_len() },
            AxisIR::Ancestor => State::Ancestors(node.parent_id_at(id)),
            AxisIR::AncestorOrSelf => State::Ancestors(Some(id)),
            AxisIR::FollowingSibling => siblings(node, false),
            AxisIR::PrecedingSibling => siblings(node, true),
            AxisIR::Preceding => {
                let mut ancestors = SmallVec::new();
                let mut cur = node.parent_id_at(id);
                while let Some(a) = cur {
                    ancestors.push(a);
                    cur = node.parent_id_at(a);
                }
                State::Preceding { next: id.checked_sub(1), ancestors }
            }
        };
        Self { node: node.clone(), state }
    }
}

// Attribute, namespace, text, comment and PI nodes have no descendants.
fn is_leaf_kind(kind: NodeKind) -> bool {
    !matches!(kind, NodeKind::Document | NodeKind::Element)
}

fn siblings(node: &Node, preceding: bool) -> State {
    if matches!(node.kind(), NodeKind::Attribute | NodeKind::Namespace) {
        return State::Done;
    }
    let Some(parent) = node.parent() else {
        return State::Done;
    };
    let ids = parent.child_ids();
    let Some(pos) = ids.iter().position(|&c| c == node.id()) else {
        return State::Done;
    };
    let list: Vec<NodeId> = if preceding {
        ids[..pos].iter().rev().copied().collect()
    } else {
        ids[pos + 1..].to_vec()
    };
    State::List(list.into_iter())
}

impl Iterator for AxisIter {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let id = match &mut self.state {
            State::Done => return None,
            State::One(id) => {
                let id = *id;
                self.state = State::Done;
                id
            }
            State::List(ids) => ids.next()?,
            State::Scan { next, end } => loop {
                if *next >= *end {
                    return None;
                }
                let id = *next;
                *next += 1;
                if !matches!(self.node.kind_at(id), NodeKind::Attribute | NodeKind::Namespace) {
                    break id;
                }
            },
            State::Ancestors(cur) => {
                let id = (*cur)?;
                *cur = self.node.parent_id_at(id);
                id
            }
            State::Preceding { next, ancestors } => loop {
                let id = (*next)?;
                *next = id.checked_sub(1);
                if ancestors.contains(&id) || matches!(self.node.kind_at(id), NodeKind::Attribute | NodeKind::Namespace) {
                    continue;
                }
                break id;
            },
        };
        Some(self.node.at(id))
    }
}

/// Convenience wrapper around [`AxisIter::new`].
pub fn axis(node: &Node, axis: AxisIR) -> AxisIter {
    AxisIter::new(node, axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build::{attr, doc, elem, text};

    fn names(it: AxisIter) -> Vec<String> {
        it.map(|n| match n.name() {
            Some(q) => q.to_string(),
            None => format!("#{}", n.kind().as_str()),
        })
        .collect()
    }

    fn fixture() -> Node {
        // <r><a id="1"><b/><c/></a><d/></r>
        doc()
            .child(
                elem("r")
                    .child(elem("a").attr(attr("id", "1")).child(elem("b")).child(elem("c")))
                    .child(elem("d").child(text("t"))),
            )
            .build()
    }

    fn find(root: &Node, name: &str) -> Node {
        axis(root, AxisIR::Descendant)
            .find(|n| n.name().is_some_and(|q| q.local.as_ref() == name))
            .unwrap()
    }

    #[test]
    fn descendant_skips_attributes() {
        let root = fixture();
        assert_eq!(names(axis(&root, AxisIR::Descendant)), ["r", "a", "b", "c", "d", "#text"]);
    }

    #[test]
    fn reverse_axes_start_nearest() {
        let root = fixture();
        let c = find(&root, "c");
        assert_eq!(names(axis(&c, AxisIR::Ancestor)), ["a", "r", "#document-node"]);
        assert_eq!(names(axis(&c, AxisIR::PrecedingSibling)), ["b"]);
        let d = find(&root, "d");
        assert_eq!(names(axis(&d, AxisIR::Preceding)), ["c", "b", "a"]);
    }

    #[test]
    fn attribute_has_parent_but_no_siblings() {
        let root = fixture();
        let a = find(&root, "a");
        let id = axis(&a, AxisIR::Attribute).next().unwrap();
        assert_eq!(names(axis(&id, AxisIR::Parent)), ["a"]);
        assert_eq!(axis(&id, AxisIR::FollowingSibling).count(), 0);
        assert_eq!(names(axis(&id, AxisIR::Following)), ["b", "c", "d", "#text"]);
    }
}
