use super::common::{arg_or_context, boolean, count_of, integer, opt_atomic, string, string_arg};
use crate::engine::evaluator::numeric::classify;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub(super) fn string_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let seq = arg_or_context(ctx, args)?;
    match seq.as_slice() {
        [] => Ok(string("")),
        [item] => Ok(string(item.string_value())),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "fn:string expects at most one item")),
    }
}

pub(super) fn string_length_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = match args.first() {
        Some(seq) => string_arg(seq, "fn:string-length")?,
        None => ctx.focus.context_item()?.string_value(),
    };
    Ok(count_of(s.chars().count()))
}

pub(super) fn normalize_space_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = match args.first() {
        Some(seq) => string_arg(seq, "fn:normalize-space")?,
        None => ctx.focus.context_item()?.string_value(),
    };
    Ok(string(s.split_ascii_whitespace().collect::<Vec<_>>().join(" ")))
}

pub(super) fn concat_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&string_arg(arg, "fn:concat")?);
    }
    Ok(string(out))
}

pub(super) fn string_join_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let sep = match args.get(1) {
        Some(s) => string_arg(s, "fn:string-join")?,
        None => String::new(),
    };
    let parts: Vec<String> = args[0].iter().map(|i| i.atomize().canonical_string()).collect();
    Ok(string(parts.join(&sep)))
}

fn two_strings(args: &[XdmSequence], what: &str) -> Result<(String, String), Error> {
    Ok((string_arg(&args[0], what)?, string_arg(&args[1], what)?))
}

pub(super) fn contains_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (s, needle) = two_strings(args, "fn:contains")?;
    Ok(boolean(s.contains(&needle)))
}

pub(super) fn starts_with_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (s, prefix) = two_strings(args, "fn:starts-with")?;
    Ok(boolean(s.starts_with(&prefix)))
}

pub(super) fn ends_with_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (s, suffix) = two_strings(args, "fn:ends-with")?;
    Ok(boolean(s.ends_with(&suffix)))
}

pub(super) fn substring_before_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (s, needle) = two_strings(args, "fn:substring-before")?;
    Ok(string(s.find(&needle).map(|i| &s[..i]).unwrap_or_default()))
}

pub(super) fn substring_after_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (s, needle) = two_strings(args, "fn:substring-after")?;
    Ok(string(s.find(&needle).map(|i| &s[i + needle.len()..]).unwrap_or_default()))
}

fn position_arg(seq: &[XdmItem], what: &str) -> Result<f64, Error> {
    let v = opt_atomic(seq, what)?.ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, format!("{what} expects a number, got an empty sequence"))
    })?;
    let v = match v {
        XdmAtomicValue::UntypedAtomic(s) => {
            return crate::engine::evaluator::casting::parse_double(&s).ok_or_else(|| {
                Error::from_code(ErrorCode::FORG0001, format!("cannot convert '{s}' to xs:double"))
            });
        }
        other => other,
    };
    classify(&v).map(|n| n.to_f64()).ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, format!("{what} expects a number, got {}", v.type_name()))
    })
}

/// Characters at 1-based positions `p` with `round(start) <= p < round(start) + round(len)`.
pub(super) fn substring_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = string_arg(&args[0], "fn:substring")?;
    let round = |d: f64| (d + 0.5).floor();
    let start = round(position_arg(&args[1], "fn:substring")?);
    let end = match args.get(2) {
        Some(len) => start + round(position_arg(len, "fn:substring")?),
        None => f64::INFINITY,
    };
    let out: String = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(string(out))
}

pub(super) fn upper_case_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(string(string_arg(&args[0], "fn:upper-case")?.to_uppercase()))
}

pub(super) fn lower_case_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(string(string_arg(&args[0], "fn:lower-case")?.to_lowercase()))
}

pub(super) fn translate_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = string_arg(&args[0], "fn:translate")?;
    let from: Vec<char> = string_arg(&args[1], "fn:translate")?.chars().collect();
    let to: Vec<char> = string_arg(&args[2], "fn:translate")?.chars().collect();
    let out: String = s
        .chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect();
    Ok(string(out))
}

pub(super) fn string_to_codepoints_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = string_arg(&args[0], "fn:string-to-codepoints")?;
    Ok(s.chars().map(|c| XdmItem::Atomic(XdmAtomicValue::Integer(i64::from(u32::from(c))))).collect())
}

pub(super) fn codepoints_to_string_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let mut out = String::new();
    for item in &args[0] {
        let cp = match item.atomize() {
            XdmAtomicValue::Integer(i) => i,
            other => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("fn:codepoints-to-string expects integers, got {}", other.type_name()),
                ));
            }
        };
        let c = u32::try_from(cp).ok().and_then(char::from_u32).filter(|c| is_xml_char(*c)).ok_or_else(|| {
            Error::from_code(ErrorCode::FOCH0001, format!("{cp} is not a valid XML character"))
        })?;
        out.push(c);
    }
    Ok(string(out))
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\u{9}' | '\u{A}' | '\u{D}' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

/// Codepoint collation comparison: -1, 0 or 1; empty if either argument is empty.
pub(super) fn compare_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (Some(a), Some(b)) = (opt_atomic(&args[0], "fn:compare")?, opt_atomic(&args[1], "fn:compare")?) else {
        return Ok(Vec::new());
    };
    Ok(integer(match a.canonical_string().cmp(&b.canonical_string()) {
        core::cmp::Ordering::Less => -1,
        core::cmp::Ordering::Equal => 0,
        core::cmp::Ordering::Greater => 1,
    }))
}

pub(super) fn codepoint_equal_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let (Some(a), Some(b)) =
        (opt_atomic(&args[0], "fn:codepoint-equal")?, opt_atomic(&args[1], "fn:codepoint-equal")?)
    else {
        return Ok(Vec::new());
    };
    Ok(boolean(a.canonical_string() == b.canonical_string()))
}

/// Splits on runs of whitespace (the one-argument form of `fn:tokenize`).
pub(super) fn tokenize_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let s = string_arg(&args[0], "fn:tokenize")?;
    Ok(s.split_ascii_whitespace().map(|t| XdmItem::Atomic(XdmAtomicValue::String(t.to_string()))).collect())
}

pub(super) fn untyped_atomic_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(opt_atomic(&args[0], "fn:untypedAtomic")?
        .map(|a| XdmItem::Atomic(XdmAtomicValue::UntypedAtomic(a.canonical_string())))
        .into_iter()
        .collect())
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

    fn s(v: &str) -> XdmSequence {
        vec![XdmAtomicValue::String(v.into()).into()]
    }

    fn dbl(d: f64) -> XdmSequence {
        vec![XdmAtomicValue::Double(d).into()]
    }

    #[test]
    fn substring_rounds_positions() {
        assert_eq!(call(substring_fn, &[s("12345"), dbl(1.5), dbl(2.6)]), s("234"));
        assert_eq!(call(substring_fn, &[s("12345"), dbl(0.0), dbl(3.0)]), s("12"));
        assert_eq!(call(substring_fn, &[s("12345"), dbl(f64::NAN), dbl(3.0)]), s(""));
    }

    #[test]
    fn translate_drops_unmapped() {
        assert_eq!(call(translate_fn, &[s("--aaa--"), s("abc-"), s("ABC")]), s("AAA"));
    }

    #[test]
    fn string_length_counts_characters() {
        assert_eq!(call(string_length_fn, &[s("h\u{e9}llo")]), count_of(5));
    }
}
