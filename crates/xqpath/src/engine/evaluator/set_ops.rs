//! Document-order normalization and the node set operators.

use std::collections::HashSet;

use crate::engine::runtime::{Error, ErrorCode};
use crate::model::Node;
use crate::xdm::{XdmItem, XdmSequence};

/// Sorts nodes into document order and removes duplicates.
pub(crate) fn sort_distinct(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by_key(Node::doc_order_key);
    nodes.dedup();
    nodes
}

fn nodes_of(seq: XdmSequence, op: &str) -> Result<Vec<Node>, Error> {
    seq.into_iter()
        .map(|item| match item {
            XdmItem::Node(n) => Ok(n),
            XdmItem::Atomic(a) => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("operand of {op} contains {}, expected nodes only", a.type_name()),
            )),
        })
        .collect()
}

fn into_sequence(nodes: Vec<Node>) -> XdmSequence {
    nodes.into_iter().map(XdmItem::Node).collect()
}

pub(crate) fn union(lhs: XdmSequence, rhs: XdmSequence) -> Result<XdmSequence, Error> {
    let mut nodes = nodes_of(lhs, "union")?;
    nodes.extend(nodes_of(rhs, "union")?);
    Ok(into_sequence(sort_distinct(nodes)))
}

pub(crate) fn intersect(lhs: XdmSequence, rhs: XdmSequence) -> Result<XdmSequence, Error> {
    let left = nodes_of(lhs, "intersect")?;
    let right: HashSet<Node> = nodes_of(rhs, "intersect")?.into_iter().collect();
    Ok(into_sequence(sort_distinct(left.into_iter().filter(|n| right.contains(n)).collect())))
}

pub(crate) fn except(lhs: XdmSequence, rhs: XdmSequence) -> Result<XdmSequence, Error> {
    let left = nodes_of(lhs, "except")?;
    let right: HashSet<Node> = nodes_of(rhs, "except")?.into_iter().collect();
    Ok(into_sequence(sort_distinct(left.into_iter().filter(|n| !right.contains(n)).collect())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build::{doc, elem};
    use crate::xdm::XdmAtomicValue;

    fn children(root: &Node) -> Vec<Node> {
        root.children().next().unwrap().children().collect()
    }

    #[test]
    fn union_is_ordered_and_distinct() {
        let root = doc().child(elem("r").child(elem("a")).child(elem("b"))).build();
        let c = children(&root);
        let out = union(vec![c[1].clone().into(), c[0].clone().into()], vec![c[1].clone().into()]).unwrap();
        assert_eq!(out, vec![XdmItem::Node(c[0].clone()), XdmItem::Node(c[1].clone())]);
    }

    #[test]
    fn except_removes_right_nodes() {
        let root = doc().child(elem("r").child(elem("a")).child(elem("b"))).build();
        let c = children(&root);
        let out = except(vec![c[0].clone().into(), c[1].clone().into()], vec![c[0].clone().into()]).unwrap();
        assert_eq!(out, vec![XdmItem::Node(c[1].clone())]);
    }

    #[test]
    fn atomic_operand_is_type_error() {
        let err = intersect(vec![XdmAtomicValue::Integer(1).into()], Vec::new()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }
}
