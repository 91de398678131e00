//! Step evaluation: axis traversal, node tests and predicate filtering.

use crate::compiler::ir::{AxisIR, NameOrWildcard, NodeTestIR};
use crate::engine::axes::axis;
use crate::engine::runtime::{Error, ErrorCode, Focus};
use crate::model::{Node, NodeKind};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

/// One axis step: axis, node test and the (opaque) predicate expressions.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a, P> {
    pub axis: AxisIR,
    pub test: &'a NodeTestIR,
    pub predicates: &'a [P],
}

/// Evaluates `step` from the context node of `focus`.
///
/// Predicates are evaluated through `eval_predicate` with a fresh focus per candidate,
/// positions counted in axis order. The result is in document order.
pub fn evaluate_step<P, F>(focus: &Focus, step: Step<'_, P>, mut eval_predicate: F) -> Result<Vec<Node>, Error>
where
    F: FnMut(&P, &Focus) -> Result<XdmSequence, Error>,
{
    let node = focus.context_node()?;
    let candidates: Vec<Node> = axis(node, step.axis).filter(|n| matches_test(n, step.axis, step.test)).collect();
    let mut selected = filter_by_predicates(candidates, step.predicates, &mut eval_predicate)?;
    if step.axis.is_reverse() {
        selected.reverse();
    }
    Ok(selected)
}

/// Applies bracketed predicates left to right; each narrows the input of the next.
pub fn filter_by_predicates<T, P, F>(mut items: Vec<T>, predicates: &[P], eval_predicate: &mut F) -> Result<Vec<T>, Error>
where
    T: Clone + Into<XdmItem>,
    F: FnMut(&P, &Focus) -> Result<XdmSequence, Error>,
{
    for predicate in predicates {
        let size = items.len();
        let mut kept = Vec::with_capacity(size);
        for (index, item) in items.into_iter().enumerate() {
            let focus = Focus::new(item.clone().into(), index + 1, size);
            let result = eval_predicate(predicate, &focus)?;
            if predicate_truth(&result, index + 1)? {
                kept.push(item);
            }
        }
        items = kept;
    }
    Ok(items)
}

/// A single numeric value selects by position; anything else by effective boolean value.
pub fn predicate_truth(result: &[XdmItem], position: usize) -> Result<bool, Error> {
    if let [XdmItem::Atomic(a)] = result {
        let numeric = match a {
            XdmAtomicValue::Integer(i) => return Ok(usize::try_from(*i).is_ok_and(|i| i == position)),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Some(*d),
            XdmAtomicValue::Float(f) => Some(f64::from(*f)),
            _ => None,
        };
        if let Some(n) = numeric {
            return Ok(n == position as f64);
        }
    }
    effective_boolean_value(result)
}

pub fn effective_boolean_value(seq: &[XdmItem]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => {
                Ok(!s.is_empty())
            }
            XdmAtomicValue::Integer(i) => Ok(*i != 0),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            XdmAtomicValue::Float(f) => Ok(*f != 0.0 && !f.is_nan()),
            XdmAtomicValue::QName { .. } => Err(Error::from_code(
                ErrorCode::FORG0006,
                "effective boolean value is not defined for xs:QName",
            )),
        },
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of two or more atomic values",
        )),
    }
}

fn principal_kind(axis: AxisIR) -> NodeKind {
    match axis {
        AxisIR::Attribute => NodeKind::Attribute,
        AxisIR::Namespace => NodeKind::Namespace,
        _ => NodeKind::Element,
    }
}

/// Node test as applied on `axis`; name tests only match the axis' principal node kind.
pub fn matches_test(node: &Node, axis: AxisIR, test: &NodeTestIR) -> bool {
    match test {
        NodeTestIR::Name(name_test) => {
            if node.kind() != principal_kind(axis) {
                return false;
            }
            node.name().is_some_and(|q| name_test.matches(q.ns_uri.as_deref(), &q.local))
        }
        other => matches_kind(node, other),
    }
}

/// Kind tests, independent of any axis (also used by `instance of`).
pub fn matches_kind(node: &Node, test: &NodeTestIR) -> bool {
    match test {
        NodeTestIR::AnyKind => true,
        NodeTestIR::Name(name_test) => {
            matches!(node.kind(), NodeKind::Element | NodeKind::Attribute)
                && node.name().is_some_and(|q| name_test.matches(q.ns_uri.as_deref(), &q.local))
        }
        NodeTestIR::KindText => node.kind() == NodeKind::Text,
        NodeTestIR::KindComment => node.kind() == NodeKind::Comment,
        NodeTestIR::KindNamespace => node.kind() == NodeKind::Namespace,
        NodeTestIR::KindProcessingInstruction(target) => {
            node.kind() == NodeKind::ProcessingInstruction
                && target.as_ref().is_none_or(|t| node.name().is_some_and(|q| q.local.as_ref() == t.as_str()))
        }
        NodeTestIR::KindDocument(inner) => {
            if node.kind() != NodeKind::Document {
                return false;
            }
            let Some(inner) = inner else { return true };
            let mut elements = node.children().filter(|c| c.kind() == NodeKind::Element);
            let has_text = node.children().any(|c| c.kind() == NodeKind::Text);
            match (elements.next(), elements.next()) {
                (Some(e), None) if !has_text => matches_kind(&e, inner),
                _ => false,
            }
        }
        NodeTestIR::KindElement { name, type_matches } => {
            node.kind() == NodeKind::Element && *type_matches && name_matches(node, name.as_ref())
        }
        NodeTestIR::KindAttribute { name, type_matches } => {
            node.kind() == NodeKind::Attribute && *type_matches && name_matches(node, name.as_ref())
        }
    }
}

fn name_matches(node: &Node, name: Option<&NameOrWildcard>) -> bool {
    match name {
        None | Some(NameOrWildcard::Any) => true,
        Some(NameOrWildcard::Name(expected)) => node.name().is_some_and(|q| q.matches(expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eqname::NameTest;
    use crate::model::build::{attr, doc, elem};
    use crate::xdm::ExpandedName;

    fn employees() -> Node {
        let people = [("a", "m"), ("b", "f"), ("c", "f"), ("d", "m"), ("e", "f")];
        doc()
            .child(elem("staff").children(
                people.iter().map(|(n, g)| elem("employee").attr(attr("name", n)).attr(attr("gender", g))),
            ))
            .build()
    }

    fn name_test(local: &str) -> NodeTestIR {
        NodeTestIR::Name(NameTest::Name(ExpandedName::local(local)))
    }

    #[test]
    fn reverse_axis_positions_count_from_nearest() {
        let root = employees();
        let staff = root.children().next().unwrap();
        let last = staff.children().last().unwrap();
        let test = name_test("employee");
        let preds = [1_i64];
        let step = Step { axis: AxisIR::PrecedingSibling, test: &test, predicates: &preds };
        let out = evaluate_step(&Focus::of(last), step, |p, _| Ok(vec![XdmAtomicValue::Integer(*p).into()])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].attributes().next().unwrap().content(), Some("d"));
    }

    #[test]
    fn last_is_size_of_current_input() {
        let root = employees();
        let staff = root.children().next().unwrap();
        let test = name_test("employee");
        let preds = [()];
        let step = Step { axis: AxisIR::Child, test: &test, predicates: &preds };
        let out = evaluate_step(&Focus::of(staff), step, |_, f| {
            Ok(vec![XdmAtomicValue::Boolean(f.position == f.size).into()])
        })
        .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn atomic_context_is_type_error() {
        let test = NodeTestIR::AnyKind;
        let step: Step<'_, ()> = Step { axis: AxisIR::Child, test: &test, predicates: &[] };
        let err = evaluate_step(&Focus::of(XdmAtomicValue::Integer(1)), step, |_, _| Ok(vec![])).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0020);
    }

    #[test]
    fn ebv_of_multiple_atomics_is_error() {
        let seq: XdmSequence = vec![XdmAtomicValue::Integer(1).into(), XdmAtomicValue::Integer(2).into()];
        assert_eq!(effective_boolean_value(&seq).unwrap_err().code_enum(), ErrorCode::FORG0006);
    }
}
