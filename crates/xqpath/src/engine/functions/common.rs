//! Argument and result helpers shared by the function modules.

use crate::engine::evaluator::casting::cast_atomic;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::eqname::NamespaceTable;
use crate::model::Node;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub(super) fn boolean(b: bool) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

pub(super) fn string(s: impl Into<String>) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::String(s.into()))]
}

pub(super) fn integer(i: i64) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Integer(i))]
}

pub(super) fn count_of(n: usize) -> XdmSequence {
    integer(i64::try_from(n).unwrap_or(i64::MAX))
}

/// The single argument of a zero-or-one parameter, atomized.
pub(super) fn opt_atomic(seq: &[XdmItem], what: &str) -> Result<Option<XdmAtomicValue>, Error> {
    match seq {
        [] => Ok(None),
        [item] => Ok(Some(item.atomize())),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects at most one item, got {}", seq.len()),
        )),
    }
}

/// `xs:string?` parameter; the empty sequence becomes the zero-length string.
pub(super) fn string_arg(seq: &[XdmItem], what: &str) -> Result<String, Error> {
    Ok(opt_atomic(seq, what)?.map(|a| a.canonical_string()).unwrap_or_default())
}

/// `xs:integer` parameter; untyped values are cast.
pub(super) fn integer_arg(seq: &[XdmItem], what: &str) -> Result<i64, Error> {
    match opt_atomic(seq, what)? {
        Some(XdmAtomicValue::Integer(i)) => Ok(i),
        Some(v @ XdmAtomicValue::UntypedAtomic(_)) => match cast_atomic(&v, "integer", &NamespaceTable::empty())? {
            XdmAtomicValue::Integer(i) => Ok(i),
            _ => unreachable!("cast to xs:integer yields an integer"),
        },
        Some(other) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects xs:integer, got {}", other.type_name()),
        )),
        None => Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects xs:integer, got an empty sequence"))),
    }
}

/// `xs:double` parameter (numeric values are promoted, untyped values cast).
pub(super) fn double_arg(seq: &[XdmItem], what: &str) -> Result<Option<f64>, Error> {
    let Some(v) = opt_atomic(seq, what)? else { return Ok(None) };
    match v {
        XdmAtomicValue::Integer(i) => Ok(Some(i as f64)),
        XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Ok(Some(d)),
        XdmAtomicValue::Float(f) => Ok(Some(f64::from(f))),
        XdmAtomicValue::UntypedAtomic(_) => match cast_atomic(&v, "double", &NamespaceTable::empty())? {
            XdmAtomicValue::Double(d) => Ok(Some(d)),
            _ => unreachable!("cast to xs:double yields a double"),
        },
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects a numeric value, got {}", other.type_name()),
        )),
    }
}

/// Argument of a function whose argument defaults to the context item (`fn:name()`).
pub(super) fn arg_or_context(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    match args.first() {
        Some(seq) => Ok(seq.clone()),
        None => Ok(vec![ctx.focus.context_item()?.clone()]),
    }
}

/// `node()?` parameter.
pub(super) fn opt_node(seq: &[XdmItem], what: &str) -> Result<Option<Node>, Error> {
    match seq {
        [] => Ok(None),
        [XdmItem::Node(n)] => Ok(Some(n.clone())),
        [XdmItem::Atomic(a)] => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects a node, got {}", a.type_name()),
        )),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects at most one node"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_arg_of_empty_is_zero_length() {
        assert_eq!(string_arg(&[], "fn:test").unwrap(), "");
    }

    #[test]
    fn integer_arg_casts_untyped() {
        let seq = vec![XdmAtomicValue::UntypedAtomic(" 12 ".into()).into()];
        assert_eq!(integer_arg(&seq, "fn:test").unwrap(), 12);
    }
}
