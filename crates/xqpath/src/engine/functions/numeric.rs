use core::cmp::Ordering;

use super::common::{arg_or_context, integer_arg, opt_atomic};
use crate::engine::evaluator::casting::cast_atomic;
use crate::engine::evaluator::comparison::atomic_ordering;
use crate::engine::evaluator::numeric::{ArithOp, NumKind, apply, classify, unify_numeric};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::eqname::NamespaceTable;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

fn untyped_to_double(v: XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    match v {
        XdmAtomicValue::UntypedAtomic(_) => cast_atomic(&v, "double", &NamespaceTable::empty()),
        other => Ok(other),
    }
}

fn numeric_operand(v: XdmAtomicValue, what: &str) -> Result<NumKind, Error> {
    let v = untyped_to_double(v)?;
    classify(&v).ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, format!("{what} expects numeric values, got {}", v.type_name()))
    })
}

fn single(kind: NumKind) -> XdmSequence {
    vec![XdmItem::Atomic(kind.into_atomic())]
}

pub(super) fn number_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let seq = arg_or_context(ctx, args)?;
    let d = match opt_atomic(&seq, "fn:number")? {
        Some(v) => match cast_atomic(&v, "double", &NamespaceTable::empty()) {
            Ok(XdmAtomicValue::Double(d)) => d,
            _ => f64::NAN,
        },
        None => f64::NAN,
    };
    Ok(vec![XdmItem::Atomic(XdmAtomicValue::Double(d))])
}

/// Applies a type-preserving rounding function to a `numeric?` argument.
fn num_unary(args: &[XdmSequence], what: &str, f: impl Fn(f64) -> f64) -> Result<XdmSequence, Error> {
    let Some(v) = opt_atomic(&args[0], what)? else { return Ok(Vec::new()) };
    Ok(single(match numeric_operand(v, what)? {
        NumKind::Int(i) => NumKind::Int(i),
        NumKind::Dec(d) => NumKind::Dec(f(d)),
        NumKind::Float(x) => NumKind::Float(f(f64::from(x)) as f32),
        NumKind::Double(d) => NumKind::Double(f(d)),
    }))
}

pub(super) fn abs_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let Some(v) = opt_atomic(&args[0], "fn:abs")? else { return Ok(Vec::new()) };
    Ok(single(match numeric_operand(v, "fn:abs")? {
        NumKind::Int(i) => NumKind::Int(
            i.checked_abs().ok_or_else(|| Error::from_code(ErrorCode::FOAR0002, "integer overflow in fn:abs"))?,
        ),
        NumKind::Dec(d) => NumKind::Dec(d.abs()),
        NumKind::Float(x) => NumKind::Float(x.abs()),
        NumKind::Double(d) => NumKind::Double(d.abs()),
    }))
}

pub(super) fn floor_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    num_unary(args, "fn:floor", f64::floor)
}

pub(super) fn ceiling_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    num_unary(args, "fn:ceiling", f64::ceil)
}

fn round_with(args: &[XdmSequence], what: &str, half_even: bool) -> Result<XdmSequence, Error> {
    let precision = match args.get(1) {
        Some(p) => integer_arg(p, what)?.clamp(-308, 308),
        None => 0,
    };
    let round = |d: f64| -> f64 {
        if !d.is_finite() {
            return d;
        }
        let scale = 10f64.powi(precision as i32);
        let scaled = d * scale;
        let r = if half_even { scaled.round_ties_even() } else { (scaled + 0.5).floor() };
        r / scale
    };
    let Some(v) = opt_atomic(&args[0], what)? else { return Ok(Vec::new()) };
    Ok(single(match numeric_operand(v, what)? {
        NumKind::Int(i) if precision >= 0 => NumKind::Int(i),
        NumKind::Int(i) => {
            let r = round(i as f64);
            if r < i64::MIN as f64 || r >= i64::MAX as f64 {
                return Err(Error::from_code(ErrorCode::FOAR0002, format!("{what}: integer overflow")));
            }
            NumKind::Int(r as i64)
        }
        NumKind::Dec(d) => NumKind::Dec(round(d)),
        NumKind::Float(x) => NumKind::Float(round(f64::from(x)) as f32),
        NumKind::Double(d) => NumKind::Double(round(d)),
    }))
}

pub(super) fn round_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    round_with(args, "fn:round", false)
}

pub(super) fn round_half_to_even_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    round_with(args, "fn:round-half-to-even", true)
}

fn total(seq: &[XdmItem], what: &str) -> Result<Option<NumKind>, Error> {
    let mut acc: Option<NumKind> = None;
    for item in seq {
        let n = numeric_operand(item.atomize(), what)?;
        acc = Some(match acc {
            Some(a) => apply(ArithOp::Add, a, n)?,
            None => n,
        });
    }
    Ok(acc)
}

pub(super) fn sum_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    match total(&args[0], "fn:sum")? {
        Some(n) => Ok(single(n)),
        None => match args.get(1) {
            Some(zero) => Ok(zero.iter().map(|i| XdmItem::Atomic(i.atomize())).collect()),
            None => Ok(single(NumKind::Int(0))),
        },
    }
}

pub(super) fn avg_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let Some(sum) = total(&args[0], "fn:avg")? else { return Ok(Vec::new()) };
    let count = i64::try_from(args[0].len()).unwrap_or(i64::MAX);
    Ok(single(apply(ArithOp::Div, sum, NumKind::Int(count))?))
}

fn extreme(args: &[XdmSequence], what: &str, want: Ordering) -> Result<XdmSequence, Error> {
    let values: Vec<XdmAtomicValue> =
        args[0].iter().map(|i| untyped_to_double(i.atomize())).collect::<Result<_, _>>()?;
    let Some(first) = values.first() else { return Ok(Vec::new()) };
    if classify(first).is_some() {
        let mut best: Option<NumKind> = None;
        for v in &values {
            let n = numeric_operand(v.clone(), what)?;
            best = Some(match best {
                None => n,
                Some(b) => {
                    let (b, n) = unify_numeric(b, n);
                    if b.to_f64().is_nan() {
                        b
                    } else if n.to_f64().is_nan() || n.to_f64().partial_cmp(&b.to_f64()) == Some(want) {
                        n
                    } else {
                        b
                    }
                }
            });
        }
        return Ok(best.map(single).unwrap_or_default());
    }
    let mut best = first.clone();
    for v in &values[1..] {
        if atomic_ordering(v, &best)? == Some(want) {
            best = v.clone();
        }
    }
    // xs:anyURI results are promoted to xs:string when mixed with strings
    if values.iter().any(|v| matches!(v, XdmAtomicValue::String(_)))
        && let XdmAtomicValue::AnyUri(s) = best
    {
        best = XdmAtomicValue::String(s);
    }
    Ok(vec![XdmItem::Atomic(best)])
}

pub(super) fn min_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    extreme(args, "fn:min", Ordering::Less)
}

pub(super) fn max_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    extreme(args, "fn:max", Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::{DynamicContext, Focus, StaticContext};

    fn call(f: fn(&CallCtx<'_>, &[XdmSequence]) -> Result<XdmSequence, Error>, args: &[XdmSequence]) -> XdmSequence {
        let dyn_ctx = DynamicContext::default();
        let static_ctx = StaticContext::default();
        let focus = Focus::absent();
        f(&CallCtx { dyn_ctx: &dyn_ctx, static_ctx: &static_ctx, focus: &focus }, args).unwrap()
    }

    fn dbl(d: f64) -> XdmItem {
        XdmAtomicValue::Double(d).into()
    }

    #[test]
    fn round_ties_go_up() {
        assert_eq!(call(round_fn, &[vec![dbl(2.5)]]), vec![dbl(3.0)]);
        assert_eq!(call(round_fn, &[vec![dbl(-2.5)]]), vec![dbl(-2.0)]);
        assert_eq!(call(round_half_to_even_fn, &[vec![dbl(2.5)]]), vec![dbl(2.0)]);
    }

    #[test]
    fn max_promotes_mixed_numerics() {
        let seq = vec![XdmAtomicValue::Integer(3).into(), dbl(2.5)];
        assert_eq!(call(max_fn, &[seq]), vec![dbl(3.0)]);
    }

    #[test]
    fn sum_of_empty_is_zero() {
        assert_eq!(call(sum_fn, &[Vec::new()]), vec![XdmItem::Atomic(XdmAtomicValue::Integer(0))]);
    }
}
