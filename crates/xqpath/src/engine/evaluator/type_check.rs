//! Sequence type matching (`instance of`, `treat as`) and the function conversion rules
//! applied to declared variable, parameter and result types.

use crate::compiler::ir::{ItemTypeIR, OccurrenceIR, SeqTypeIR};
use crate::engine::runtime::{Error, ErrorCode};
use crate::engine::step::matches_kind;
use crate::eqname::NamespaceTable;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

use super::casting::cast_atomic;

const CAST_TARGETS: &[&str] =
    &["string", "boolean", "decimal", "integer", "double", "float", "untypedAtomic", "anyURI", "QName"];

/// XML Schema names accepted in type positions that never match an untyped item.
const OTHER_XS_TYPES: &[&str] = &[
    "anyType",
    "untyped",
    "anySimpleType",
    "NOTATION",
    "date",
    "dateTime",
    "dateTimeStamp",
    "time",
    "duration",
    "dayTimeDuration",
    "yearMonthDuration",
    "gYear",
    "gYearMonth",
    "gMonth",
    "gMonthDay",
    "gDay",
    "hexBinary",
    "base64Binary",
    "normalizedString",
    "token",
    "language",
    "Name",
    "NCName",
    "NMTOKEN",
    "NMTOKENS",
    "ID",
    "IDREF",
    "IDREFS",
    "ENTITY",
    "ENTITIES",
    "long",
    "int",
    "short",
    "byte",
    "nonNegativeInteger",
    "nonPositiveInteger",
    "positiveInteger",
    "negativeInteger",
    "unsignedLong",
    "unsignedInt",
    "unsignedShort",
    "unsignedByte",
];

/// Types usable in `cast as` / `castable as` and as constructor functions.
pub fn is_cast_target(local: &str) -> bool {
    CAST_TARGETS.contains(&local)
}

pub fn is_atomic_type(local: &str) -> bool {
    is_cast_target(local) || matches!(local, "anyAtomicType" | "numeric")
}

pub fn is_known_type(local: &str) -> bool {
    is_atomic_type(local) || OTHER_XS_TYPES.contains(&local)
}

pub(crate) fn atomic_matches(value: &XdmAtomicValue, local: &str) -> bool {
    use XdmAtomicValue as V;
    match local {
        "anyAtomicType" => true,
        "numeric" => value.is_numeric(),
        "string" => matches!(value, V::String(_)),
        "boolean" => matches!(value, V::Boolean(_)),
        // xs:integer derives from xs:decimal
        "decimal" => matches!(value, V::Decimal(_) | V::Integer(_)),
        "integer" => matches!(value, V::Integer(_)),
        "double" => matches!(value, V::Double(_)),
        "float" => matches!(value, V::Float(_)),
        "untypedAtomic" => matches!(value, V::UntypedAtomic(_)),
        "anyURI" => matches!(value, V::AnyUri(_)),
        "QName" => matches!(value, V::QName { .. }),
        _ => false,
    }
}

fn item_matches(item: &XdmItem, ty: &ItemTypeIR) -> bool {
    match (ty, item) {
        (ItemTypeIR::AnyItem, _) => true,
        (ItemTypeIR::Atomic(name), XdmItem::Atomic(a)) => atomic_matches(a, &name.local),
        (ItemTypeIR::Kind(test), XdmItem::Node(n)) => matches_kind(n, test),
        _ => false,
    }
}

fn cardinality_matches(len: usize, occ: OccurrenceIR) -> bool {
    match occ {
        OccurrenceIR::One => len == 1,
        OccurrenceIR::ZeroOrOne => len <= 1,
        OccurrenceIR::ZeroOrMore => true,
        OccurrenceIR::OneOrMore => len >= 1,
    }
}

pub(crate) fn instance_of(seq: &[XdmItem], ty: &SeqTypeIR) -> bool {
    match ty {
        SeqTypeIR::EmptySequence => seq.is_empty(),
        SeqTypeIR::Typed { item, occ } => {
            cardinality_matches(seq.len(), *occ) && seq.iter().all(|i| item_matches(i, item))
        }
    }
}

pub(crate) fn describe(ty: &SeqTypeIR) -> String {
    let SeqTypeIR::Typed { item, occ } = ty else {
        return "empty-sequence()".to_string();
    };
    let item = match item {
        ItemTypeIR::AnyItem => "item()".to_string(),
        ItemTypeIR::Atomic(n) => format!("xs:{}", n.local),
        ItemTypeIR::Kind(_) => "node-kind()".to_string(),
    };
    let occ = match occ {
        OccurrenceIR::One => "",
        OccurrenceIR::ZeroOrOne => "?",
        OccurrenceIR::ZeroOrMore => "*",
        OccurrenceIR::OneOrMore => "+",
    };
    format!("{item}{occ}")
}

/// Promotion of one atomized value towards an expected atomic type.
fn convert_atomic(value: XdmAtomicValue, target: &str, namespaces: &NamespaceTable) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    if atomic_matches(&value, target) {
        return Ok(value);
    }
    match (&value, target) {
        (V::UntypedAtomic(_), "numeric") => cast_atomic(&value, "double", namespaces),
        (V::UntypedAtomic(_), _) if is_cast_target(target) => cast_atomic(&value, target, namespaces),
        (V::Integer(_) | V::Decimal(_), "float" | "double") | (V::Float(_), "double") => {
            cast_atomic(&value, target, namespaces)
        }
        (V::AnyUri(s), "string") => Ok(V::String(s.clone())),
        _ => Ok(value),
    }
}

/// Applies the function conversion rules for `ty` to `seq`.
///
/// Items are atomized for atomic item types, untyped values cast to the expected type and
/// numeric values promoted. The converted sequence must match `ty`, `XPTY0004` otherwise.
pub(crate) fn coerce(seq: XdmSequence, ty: &SeqTypeIR, namespaces: &NamespaceTable) -> Result<XdmSequence, Error> {
    let converted = match ty {
        SeqTypeIR::Typed { item: ItemTypeIR::Atomic(name), .. } => seq
            .iter()
            .map(|item| convert_atomic(item.atomize(), &name.local, namespaces).map(XdmItem::Atomic))
            .collect::<Result<XdmSequence, Error>>()?,
        _ => seq,
    };
    if !instance_of(&converted, ty) {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("value of {} item(s) does not match required type {}", converted.len(), describe(ty)),
        ));
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::XS;
    use crate::xdm::ExpandedName;

    fn xs(local: &str, occ: OccurrenceIR) -> SeqTypeIR {
        SeqTypeIR::Typed { item: ItemTypeIR::Atomic(ExpandedName::in_ns(XS, local)), occ }
    }

    #[test]
    fn integer_is_a_decimal() {
        let seq = vec![XdmAtomicValue::Integer(1).into()];
        assert!(instance_of(&seq, &xs("decimal", OccurrenceIR::One)));
        assert!(!instance_of(&seq, &xs("double", OccurrenceIR::One)));
    }

    #[test]
    fn coerce_promotes_and_casts_untyped() {
        let ns = NamespaceTable::default();
        let out = coerce(vec![XdmAtomicValue::Integer(2).into()], &xs("double", OccurrenceIR::One), &ns).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Double(2.0))]);
        let out = coerce(vec![XdmAtomicValue::UntypedAtomic("7".into()).into()], &xs("integer", OccurrenceIR::One), &ns)
            .unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Integer(7))]);
    }

    #[test]
    fn cardinality_mismatch() {
        let ns = NamespaceTable::default();
        let err = coerce(Vec::new(), &xs("string", OccurrenceIR::One), &ns).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
        assert!(coerce(Vec::new(), &xs("string", OccurrenceIR::ZeroOrOne), &ns).unwrap().is_empty());
    }
}
