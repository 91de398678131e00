//! Value and general comparisons.

use core::cmp::Ordering;

use crate::compiler::ir::ComparisonOp;
use crate::engine::runtime::{Error, ErrorCode};
use crate::eqname::NamespaceTable;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

use super::casting::cast_atomic;
use super::numeric::{NumKind, classify, unify_numeric};

fn incomparable(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("cannot compare {} with {}", a.type_name(), b.type_name()))
}

fn string_like(v: &XdmAtomicValue) -> Option<&str> {
    match v {
        XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => Some(s),
        _ => None,
    }
}

fn numeric_ordering(a: NumKind, b: NumKind) -> Option<Ordering> {
    match unify_numeric(a, b) {
        (NumKind::Int(x), NumKind::Int(y)) => Some(x.cmp(&y)),
        (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
    }
}

/// Ordering of two atomic values of comparable types.
///
/// `Ok(None)` when either side is NaN. `xs:QName` and `xs:boolean` only support equality
/// checks through [`compare_atomic`]; booleans also order (`false < true`).
pub(crate) fn atomic_ordering(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Option<Ordering>, Error> {
    if let (Some(x), Some(y)) = (classify(a), classify(b)) {
        return Ok(numeric_ordering(x, y));
    }
    if let (Some(x), Some(y)) = (string_like(a), string_like(b)) {
        return Ok(Some(x.cmp(y)));
    }
    match (a, b) {
        (XdmAtomicValue::Boolean(x), XdmAtomicValue::Boolean(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(a, b)),
    }
}

pub(crate) fn compare_atomic(op: ComparisonOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<bool, Error> {
    if let (
        XdmAtomicValue::QName { ns_uri: u1, local: l1, .. },
        XdmAtomicValue::QName { ns_uri: u2, local: l2, .. },
    ) = (a, b)
    {
        let equal = u1 == u2 && l1 == l2;
        return match op {
            ComparisonOp::Eq => Ok(equal),
            ComparisonOp::Ne => Ok(!equal),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "xs:QName values are not ordered")),
        };
    }
    let Some(ord) = atomic_ordering(a, b)? else {
        return Ok(op == ComparisonOp::Ne);
    };
    Ok(match op {
        ComparisonOp::Eq => ord == Ordering::Equal,
        ComparisonOp::Ne => ord != Ordering::Equal,
        ComparisonOp::Lt => ord == Ordering::Less,
        ComparisonOp::Le => ord != Ordering::Greater,
        ComparisonOp::Gt => ord == Ordering::Greater,
        ComparisonOp::Ge => ord != Ordering::Less,
    })
}

/// Equality used by `distinct-values`, `index-of` and `deep-equal`: incomparable values are
/// unequal, NaN equals NaN.
pub(crate) fn atomic_equal(a: &XdmAtomicValue, b: &XdmAtomicValue) -> bool {
    let both_nan = classify(a).zip(classify(b)).is_some_and(|(x, y)| x.to_f64().is_nan() && y.to_f64().is_nan());
    both_nan || compare_atomic(ComparisonOp::Eq, a, b).unwrap_or(false)
}

fn single_atom(seq: XdmSequence, side: &str) -> Result<Option<XdmAtomicValue>, Error> {
    let mut items = seq.into_iter();
    let Some(first) = items.next() else { return Ok(None) };
    if items.next().is_some() {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{side} operand of a value comparison must be a single value"),
        ));
    }
    Ok(Some(untyped_as_string(first.atomize())))
}

fn untyped_as_string(v: XdmAtomicValue) -> XdmAtomicValue {
    match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    }
}

/// `eq`, `ne`, `lt`, ... : empty when either operand is empty.
pub(crate) fn value_compare(op: ComparisonOp, lhs: XdmSequence, rhs: XdmSequence) -> Result<XdmSequence, Error> {
    let (Some(a), Some(b)) = (single_atom(lhs, "left")?, single_atom(rhs, "right")?) else {
        return Ok(Vec::new());
    };
    Ok(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(compare_atomic(op, &a, &b)?))])
}

/// Converts an untyped operand of a general comparison against `other`.
fn general_operand(v: &XdmAtomicValue, other: &XdmAtomicValue, namespaces: &NamespaceTable) -> Result<XdmAtomicValue, Error> {
    let XdmAtomicValue::UntypedAtomic(_) = v else {
        return Ok(v.clone());
    };
    match other {
        _ if other.is_numeric() => cast_atomic(v, "double", namespaces),
        XdmAtomicValue::UntypedAtomic(_) | XdmAtomicValue::String(_) | XdmAtomicValue::AnyUri(_) => {
            cast_atomic(v, "string", namespaces)
        }
        XdmAtomicValue::Boolean(_) => cast_atomic(v, "boolean", namespaces),
        XdmAtomicValue::QName { .. } => cast_atomic(v, "QName", namespaces),
        _ => cast_atomic(v, "string", namespaces),
    }
}

/// `=`, `!=`, `<`, ... : true when some pair of atomized items satisfies the comparison.
pub(crate) fn general_compare(op: ComparisonOp, lhs: &[XdmItem], rhs: &[XdmItem]) -> Result<bool, Error> {
    let namespaces = NamespaceTable::default();
    let right: Vec<XdmAtomicValue> = rhs.iter().map(XdmItem::atomize).collect();
    for item in lhs {
        let a = item.atomize();
        for b in &right {
            let x = general_operand(&a, b, &namespaces)?;
            let y = general_operand(b, &a, &namespaces)?;
            if compare_atomic(op, &x, &y)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untyped(s: &str) -> XdmItem {
        XdmAtomicValue::UntypedAtomic(s.into()).into()
    }

    fn int(i: i64) -> XdmItem {
        XdmAtomicValue::Integer(i).into()
    }

    #[test]
    fn untyped_against_number_compares_numerically() {
        assert!(general_compare(ComparisonOp::Eq, &[untyped("10.0")], &[int(10)]).unwrap());
        assert!(general_compare(ComparisonOp::Lt, &[untyped("9")], &[int(10)]).unwrap());
    }

    #[test]
    fn untyped_not_a_number_is_cast_error() {
        let err = general_compare(ComparisonOp::Eq, &[untyped("abc")], &[int(1)]).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn value_comparison_treats_untyped_as_string() {
        let out = value_compare(ComparisonOp::Lt, vec![untyped("10")], vec![untyped("9")]).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Boolean(true))]);
        let err = value_compare(ComparisonOp::Eq, vec![untyped("1")], vec![int(1)]).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }

    #[test]
    fn nan_is_only_unequal() {
        let nan = XdmAtomicValue::Double(f64::NAN);
        assert!(compare_atomic(ComparisonOp::Ne, &nan, &nan).unwrap());
        assert!(!compare_atomic(ComparisonOp::Eq, &nan, &nan).unwrap());
        assert!(atomic_equal(&nan, &nan));
    }

    #[test]
    fn existential_semantics() {
        assert!(general_compare(ComparisonOp::Eq, &[int(1), int(2)], &[int(2), int(3)]).unwrap());
        assert!(!general_compare(ComparisonOp::Eq, &[], &[int(1)]).unwrap());
    }
}
