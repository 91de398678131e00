//! Numeric classification, promotion and arithmetic.

use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

use super::casting::parse_double;

/// Numeric classification carrying the promoted value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NumKind {
    Int(i64),
    Dec(f64),
    Float(f32),
    Double(f64),
}

impl NumKind {
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            NumKind::Int(i) => i as f64,
            NumKind::Dec(d) | NumKind::Double(d) => d,
            NumKind::Float(f) => f64::from(f),
        }
    }

    pub(crate) fn into_atomic(self) -> XdmAtomicValue {
        match self {
            NumKind::Int(i) => XdmAtomicValue::Integer(i),
            NumKind::Dec(d) => XdmAtomicValue::Decimal(d),
            NumKind::Float(f) => XdmAtomicValue::Float(f),
            NumKind::Double(d) => XdmAtomicValue::Double(d),
        }
    }
}

pub(crate) fn classify(v: &XdmAtomicValue) -> Option<NumKind> {
    match v {
        XdmAtomicValue::Integer(i) => Some(NumKind::Int(*i)),
        XdmAtomicValue::Decimal(d) => Some(NumKind::Dec(*d)),
        XdmAtomicValue::Float(f) => Some(NumKind::Float(*f)),
        XdmAtomicValue::Double(d) => Some(NumKind::Double(*d)),
        _ => None,
    }
}

/// Promotes two numbers to their common type (integer < decimal < float < double).
pub(crate) fn unify_numeric(a: NumKind, b: NumKind) -> (NumKind, NumKind) {
    use NumKind::*;
    match (a, b) {
        (Double(x), y) => (Double(x), Double(y.to_f64())),
        (y, Double(x)) => (Double(y.to_f64()), Double(x)),
        (Float(x), y) => (Float(x), Float(y.to_f64() as f32)),
        (y, Float(x)) => (Float(y.to_f64() as f32), Float(x)),
        (Dec(x), y) => (Dec(x), Dec(y.to_f64())),
        (y, Dec(x)) => (Dec(y.to_f64()), Dec(x)),
        (Int(x), Int(y)) => (Int(x), Int(y)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

/// Atomizes an arithmetic operand: empty stays empty, untyped values become doubles.
fn operand(seq: XdmSequence, side: &str) -> Result<Option<NumKind>, Error> {
    let mut items = seq.into_iter();
    let Some(first) = items.next() else { return Ok(None) };
    if items.next().is_some() {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{side} operand of arithmetic must be a single value"),
        ));
    }
    let atom = first.atomize();
    if let XdmAtomicValue::UntypedAtomic(s) = &atom {
        return parse_double(s).map(|d| Some(NumKind::Double(d))).ok_or_else(|| {
            Error::from_code(ErrorCode::FORG0001, format!("cannot convert '{s}' to xs:double"))
        });
    }
    classify(&atom).map(Some).ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, format!("arithmetic is not defined for {}", atom.type_name()))
    })
}

pub(crate) fn arithmetic(op: ArithOp, lhs: XdmSequence, rhs: XdmSequence) -> Result<XdmSequence, Error> {
    let (Some(a), Some(b)) = (operand(lhs, "left")?, operand(rhs, "right")?) else {
        return Ok(Vec::new());
    };
    let result = apply(op, a, b)?;
    Ok(vec![XdmItem::Atomic(result.into_atomic())])
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "integer overflow")
}

fn div_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

/// Truncates a finite quotient to `xs:integer`.
fn truncate_to_integer(q: f64) -> Result<NumKind, Error> {
    if !q.is_finite() {
        return Err(Error::from_code(ErrorCode::FOAR0002, "integer division result is not finite"));
    }
    let t = q.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(NumKind::Int(t as i64))
}

pub(crate) fn apply(op: ArithOp, a: NumKind, b: NumKind) -> Result<NumKind, Error> {
    use NumKind::*;
    Ok(match unify_numeric(a, b) {
        (Int(x), Int(y)) => match op {
            ArithOp::Add => Int(x.checked_add(y).ok_or_else(overflow)?),
            ArithOp::Sub => Int(x.checked_sub(y).ok_or_else(overflow)?),
            ArithOp::Mul => Int(x.checked_mul(y).ok_or_else(overflow)?),
            ArithOp::Div => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                Dec(x as f64 / y as f64)
            }
            ArithOp::IDiv => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                Int(x.checked_div(y).ok_or_else(overflow)?)
            }
            ArithOp::Mod => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                Int(x.checked_rem(y).unwrap_or(0))
            }
        },
        (Dec(x), Dec(y)) => match op {
            ArithOp::Add => Dec(x + y),
            ArithOp::Sub => Dec(x - y),
            ArithOp::Mul => Dec(x * y),
            ArithOp::Div | ArithOp::IDiv | ArithOp::Mod if y == 0.0 => return Err(div_by_zero()),
            ArithOp::Div => Dec(x / y),
            ArithOp::IDiv => truncate_to_integer(x / y)?,
            ArithOp::Mod => Dec(x % y),
        },
        (Float(x), Float(y)) => match op {
            ArithOp::Add => Float(x + y),
            ArithOp::Sub => Float(x - y),
            ArithOp::Mul => Float(x * y),
            ArithOp::Div => Float(x / y),
            ArithOp::IDiv if y == 0.0 => return Err(div_by_zero()),
            ArithOp::IDiv => truncate_to_integer(f64::from(x / y))?,
            ArithOp::Mod => Float(x % y),
        },
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            match op {
                ArithOp::Add => Double(x + y),
                ArithOp::Sub => Double(x - y),
                ArithOp::Mul => Double(x * y),
                ArithOp::Div => Double(x / y),
                ArithOp::IDiv if y == 0.0 => return Err(div_by_zero()),
                ArithOp::IDiv => truncate_to_integer(x / y)?,
                ArithOp::Mod => Double(x % y),
            }
        }
    })
}

/// Unary `-` / `+`.
pub(crate) fn unary(seq: XdmSequence, negate: bool) -> Result<XdmSequence, Error> {
    let Some(n) = operand(seq, "unary")? else { return Ok(Vec::new()) };
    let out = if !negate {
        n
    } else {
        match n {
            NumKind::Int(i) => NumKind::Int(i.checked_neg().ok_or_else(overflow)?),
            NumKind::Dec(d) => NumKind::Dec(-d),
            NumKind::Float(f) => NumKind::Float(-f),
            NumKind::Double(d) => NumKind::Double(-d),
        }
    };
    Ok(vec![XdmItem::Atomic(out.into_atomic())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> XdmSequence {
        vec![XdmAtomicValue::Integer(i).into()]
    }

    #[test]
    fn integer_division_yields_decimal() {
        let out = arithmetic(ArithOp::Div, int(7), int(2)).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Decimal(3.5))]);
    }

    #[test]
    fn idiv_by_zero() {
        let err = arithmetic(ArithOp::IDiv, int(1), int(0)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
    }

    #[test]
    fn untyped_operand_promotes_to_double() {
        let lhs = vec![XdmAtomicValue::UntypedAtomic("1.5".into()).into()];
        let out = arithmetic(ArithOp::Add, lhs, int(1)).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Double(2.5))]);
    }

    #[test]
    fn overflow_is_reported() {
        let err = arithmetic(ArithOp::Mul, int(i64::MAX), int(2)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0002);
    }

    #[test]
    fn empty_operand_gives_empty() {
        assert!(arithmetic(ArithOp::Add, Vec::new(), int(1)).unwrap().is_empty());
    }
}
