use itertools::{EitherOrBoth, Itertools};

use super::common::{boolean, count_of, integer_arg, opt_atomic};
use crate::engine::evaluator::comparison::{atomic_equal, compare_atomic};
use crate::compiler::ir::ComparisonOp;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::{Node, NodeKind};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub(super) fn empty_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(args[0].is_empty()))
}

pub(super) fn exists_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(!args[0].is_empty()))
}

pub(super) fn count_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(count_of(args[0].len()))
}

pub(super) fn reverse_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(args[0].iter().rev().cloned().collect())
}

pub(super) fn head_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(args[0].first().cloned().into_iter().collect())
}

pub(super) fn tail_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(args[0].iter().skip(1).cloned().collect())
}

pub(super) fn unordered_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(args[0].clone())
}

/// Items at 1-based positions `p` with `round(start) <= p < round(start) + round(length)`.
pub(super) fn subsequence_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let number = |seq: &XdmSequence| -> Result<f64, Error> {
        match opt_atomic(seq, "fn:subsequence")? {
            Some(XdmAtomicValue::Integer(i)) => Ok(i as f64),
            Some(XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d)) => Ok(d),
            Some(XdmAtomicValue::Float(f)) => Ok(f64::from(f)),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "fn:subsequence expects numeric positions")),
        }
    };
    let round = |d: f64| (d + 0.5).floor();
    let start = round(number(&args[1])?);
    let end = match args.get(2) {
        Some(len) => start + round(number(len)?),
        None => f64::INFINITY,
    };
    Ok(args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, item)| item.clone())
        .collect())
}

pub(super) fn distinct_values_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let mut seen: Vec<XdmAtomicValue> = Vec::new();
    for item in &args[0] {
        let v = match item.atomize() {
            XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
            other => other,
        };
        if !seen.iter().any(|s| atomic_equal(s, &v)) {
            seen.push(v);
        }
    }
    Ok(seen.into_iter().map(XdmItem::Atomic).collect())
}

pub(super) fn index_of_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let Some(search) = opt_atomic(&args[1], "fn:index-of")? else {
        return Err(Error::from_code(ErrorCode::XPTY0004, "fn:index-of expects a search value"));
    };
    let as_string = |v: XdmAtomicValue| match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    };
    let search = as_string(search);
    Ok(args[0]
        .iter()
        .enumerate()
        .filter(|(_, item)| compare_atomic(ComparisonOp::Eq, &as_string(item.atomize()), &search).unwrap_or(false))
        .map(|(i, _)| XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(i + 1).unwrap_or(i64::MAX))))
        .collect())
}

pub(super) fn insert_before_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let pos = integer_arg(&args[1], "fn:insert-before")?;
    let at = usize::try_from(pos.max(1) - 1).unwrap_or(usize::MAX).min(args[0].len());
    let mut out = args[0].clone();
    out.splice(at..at, args[2].iter().cloned());
    Ok(out)
}

pub(super) fn remove_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let pos = integer_arg(&args[1], "fn:remove")?;
    Ok(args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| i64::try_from(i + 1).ok() != Some(pos))
        .map(|(_, item)| item.clone())
        .collect())
}

pub(super) fn zero_or_one_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    if args[0].len() > 1 {
        return Err(Error::from_code(ErrorCode::FORG0003, "fn:zero-or-one called with more than one item"));
    }
    Ok(args[0].clone())
}

pub(super) fn one_or_more_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    if args[0].is_empty() {
        return Err(Error::from_code(ErrorCode::FORG0004, "fn:one-or-more called with an empty sequence"));
    }
    Ok(args[0].clone())
}

pub(super) fn exactly_one_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    if args[0].len() != 1 {
        return Err(Error::from_code(
            ErrorCode::FORG0005,
            format!("fn:exactly-one called with {} items", args[0].len()),
        ));
    }
    Ok(args[0].clone())
}

pub(super) fn deep_equal_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(sequences_deep_equal(&args[0], &args[1])))
}

pub(crate) fn sequences_deep_equal(a: &[XdmItem], b: &[XdmItem]) -> bool {
    a.iter().zip_longest(b).all(|pair| match pair {
        EitherOrBoth::Both(x, y) => items_deep_equal(x, y),
        _ => false,
    })
}

fn items_deep_equal(a: &XdmItem, b: &XdmItem) -> bool {
    match (a, b) {
        (XdmItem::Atomic(x), XdmItem::Atomic(y)) => atomic_equal(x, y),
        (XdmItem::Node(x), XdmItem::Node(y)) => nodes_deep_equal(x, y),
        _ => false,
    }
}

fn significant_children(n: &Node) -> impl Iterator<Item = Node> + '_ {
    n.children().filter(|c| !matches!(c.kind(), NodeKind::Comment | NodeKind::ProcessingInstruction))
}

fn nodes_deep_equal(a: &Node, b: &Node) -> bool {
    if a.kind() != b.kind() {
        return false;
    }
    let same_name = match (a.name(), b.name()) {
        (Some(x), Some(y)) => x.local == y.local && x.ns_uri == y.ns_uri,
        (None, None) => true,
        _ => false,
    };
    if !same_name {
        return false;
    }
    match a.kind() {
        NodeKind::Document => significant_children(a).zip_longest(significant_children(b)).all(|p| match p {
            EitherOrBoth::Both(x, y) => nodes_deep_equal(&x, &y),
            _ => false,
        }),
        NodeKind::Element => {
            let attrs_equal = a.attributes().count() == b.attributes().count()
                && a.attributes().all(|x| b.attributes().any(|y| nodes_deep_equal(&x, &y)));
            attrs_equal
                && significant_children(a).zip_longest(significant_children(b)).all(|p| match p {
                    EitherOrBoth::Both(x, y) => nodes_deep_equal(&x, &y),
                    _ => false,
                })
        }
        _ => a.string_value() == b.string_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build::{attr, comment, elem, text};

    #[test]
    fn deep_equal_ignores_comments_and_attribute_order() {
        let a = elem("e").attr(attr("x", "1")).attr(attr("y", "2")).child(text("t")).build();
        let b = elem("e").attr(attr("y", "2")).attr(attr("x", "1")).child(comment("c")).child(text("t")).build();
        assert!(sequences_deep_equal(&[a.clone().into()], &[b.into()]));
        let c = elem("e").attr(attr("x", "1")).child(text("t")).build();
        assert!(!sequences_deep_equal(&[a.into()], &[c.into()]));
    }

    #[test]
    fn deep_equal_compares_lengths() {
        let one: XdmItem = XdmAtomicValue::Integer(1).into();
        assert!(!sequences_deep_equal(&[one.clone()], &[one.clone(), one]));
    }
}
