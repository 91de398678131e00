//! Casting between the supported atomic types.

use crate::engine::runtime::{Error, ErrorCode};
use crate::eqname::{self, NameRole, NamespaceTable};
use crate::xdm::XdmAtomicValue;

use super::numeric::{NumKind, classify};

fn invalid(value: &str, target: &str) -> Error {
    Error::from_code(ErrorCode::FORG0001, format!("cannot cast '{value}' to xs:{target}"))
}

fn not_castable(value: &XdmAtomicValue, target: &str) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("cannot cast {} to xs:{target}", value.type_name()))
}

/// `xs:integer` lexical form: optional sign, digits.
pub(crate) fn parse_integer(s: &str) -> Option<i64> {
    let t = s.trim();
    let digits = t.strip_prefix(['+', '-']).unwrap_or(t);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    t.strip_prefix('+').unwrap_or(t).parse().ok()
}

/// `xs:decimal` lexical form: optional sign, digits with an optional fraction, no exponent.
pub(crate) fn parse_decimal(s: &str) -> Option<f64> {
    let t = s.trim();
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    let valid = (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit());
    if !valid {
        return None;
    }
    t.parse().ok()
}

/// `xs:double` lexical form, including `INF`, `-INF` and `NaN`.
pub(crate) fn parse_double(s: &str) -> Option<f64> {
    let t = s.trim();
    match t {
        "INF" | "+INF" => return Some(f64::INFINITY),
        "-INF" => return Some(f64::NEG_INFINITY),
        "NaN" => return Some(f64::NAN),
        _ => {}
    }
    let (mantissa, exponent) = match t.find(['e', 'E']) {
        Some(i) => (&t[..i], Some(&t[i + 1..])),
        None => (t, None),
    };
    parse_decimal(mantissa)?;
    if let Some(exp) = exponent {
        parse_integer(exp)?;
    }
    t.parse().ok()
}

fn float_to_integer(d: f64) -> Result<i64, Error> {
    if !d.is_finite() {
        return Err(Error::from_code(ErrorCode::FOCA0002, format!("cannot convert {d} to xs:integer")));
    }
    let t = d.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(Error::from_code(ErrorCode::FOCA0002, format!("{d} is out of range for xs:integer")));
    }
    Ok(t as i64)
}

fn string_like(value: &XdmAtomicValue) -> Option<&str> {
    match value {
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => Some(s),
        _ => None,
    }
}

/// Casts `value` to the XML Schema type with local name `target`.
///
/// `namespaces` resolves prefixes when casting strings to `xs:QName`.
pub(crate) fn cast_atomic(
    value: &XdmAtomicValue,
    target: &str,
    namespaces: &NamespaceTable,
) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    Ok(match target {
        "string" => V::String(value.canonical_string()),
        "untypedAtomic" => V::UntypedAtomic(value.canonical_string()),
        "boolean" => match value {
            V::Boolean(b) => V::Boolean(*b),
            V::String(s) | V::UntypedAtomic(s) => match s.trim() {
                "true" | "1" => V::Boolean(true),
                "false" | "0" => V::Boolean(false),
                _ => return Err(invalid(s, target)),
            },
            other => match classify(other) {
                Some(n) => {
                    let d = n.to_f64();
                    V::Boolean(d != 0.0 && !d.is_nan())
                }
                None => return Err(not_castable(other, target)),
            },
        },
        "integer" => match value {
            V::Boolean(b) => V::Integer(i64::from(*b)),
            V::String(s) | V::UntypedAtomic(s) => V::Integer(parse_integer(s).ok_or_else(|| invalid(s, target))?),
            other => match classify(other) {
                Some(NumKind::Int(i)) => V::Integer(i),
                Some(n) => V::Integer(float_to_integer(n.to_f64())?),
                None => return Err(not_castable(other, target)),
            },
        },
        "decimal" => match value {
            V::Boolean(b) => V::Decimal(if *b { 1.0 } else { 0.0 }),
            V::String(s) | V::UntypedAtomic(s) => V::Decimal(parse_decimal(s).ok_or_else(|| invalid(s, target))?),
            other => match classify(other) {
                Some(n) => {
                    let d = n.to_f64();
                    if !d.is_finite() {
                        return Err(Error::from_code(ErrorCode::FOCA0002, format!("cannot convert {d} to xs:decimal")));
                    }
                    V::Decimal(d)
                }
                None => return Err(not_castable(other, target)),
            },
        },
        "double" | "float" => {
            let d = match value {
                V::Boolean(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                V::String(s) | V::UntypedAtomic(s) => parse_double(s).ok_or_else(|| invalid(s, target))?,
                other => classify(other).ok_or_else(|| not_castable(other, target))?.to_f64(),
            };
            if target == "float" { V::Float(d as f32) } else { V::Double(d) }
        }
        "anyURI" => match value {
            V::AnyUri(u) => V::AnyUri(u.clone()),
            other => match string_like(other) {
                Some(s) => V::AnyUri(s.split_whitespace().collect::<Vec<_>>().join(" ")),
                None => return Err(not_castable(other, target)),
            },
        },
        "QName" => match value {
            V::QName { .. } => value.clone(),
            other => {
                let Some(s) = string_like(other) else {
                    return Err(not_castable(other, target));
                };
                let lexical = eqname::parse_eqname(s).map_err(|_| invalid(s, target))?;
                let expanded = namespaces.resolve(&lexical, NameRole::Element).map_err(|_| {
                    Error::from_code(ErrorCode::FONS0004, format!("no namespace binding for prefix in '{s}'"))
                })?;
                V::QName {
                    ns_uri: expanded.ns_uri,
                    prefix: lexical.prefix().map(str::to_string),
                    local: expanded.local,
                }
            }
        },
        _ => {
            return Err(Error::from_code(ErrorCode::XPST0051, format!("xs:{target} is not a supported cast target")));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast(v: XdmAtomicValue, t: &str) -> Result<XdmAtomicValue, Error> {
        cast_atomic(&v, t, &NamespaceTable::default())
    }

    #[test]
    fn double_lexical_forms() {
        assert_eq!(parse_double(" 1e3 "), Some(1000.0));
        assert_eq!(parse_double("-INF"), Some(f64::NEG_INFINITY));
        assert!(parse_double("inf").is_none());
        assert!(parse_double("1e").is_none());
        assert!(parse_double(".").is_none());
    }

    #[test]
    fn string_to_integer() {
        assert_eq!(cast(XdmAtomicValue::String(" +42 ".into()), "integer").unwrap(), XdmAtomicValue::Integer(42));
        let err = cast(XdmAtomicValue::String("4.2".into()), "integer").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn nan_to_integer_fails() {
        let err = cast(XdmAtomicValue::Double(f64::NAN), "integer").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOCA0002);
    }

    #[test]
    fn string_to_qname_uses_prefixes() {
        let q = cast(XdmAtomicValue::String("xs:int".into()), "QName").unwrap();
        assert!(matches!(q, XdmAtomicValue::QName { ref ns_uri, .. } if ns_uri.as_deref() == Some(crate::consts::XS)));
    }
}
