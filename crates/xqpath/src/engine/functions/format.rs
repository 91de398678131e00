//! `fn:format-number` with picture strings and named decimal formats.

use super::common::{double_arg, string, string_arg};
use crate::engine::runtime::{CallCtx, DecimalFormat, Error, ErrorCode};
use crate::eqname::{NameRole, resolve_eqname};
use crate::xdm::XdmSequence;

fn picture_error(picture: &str, msg: &str) -> Error {
    Error::from_code(ErrorCode::FODF1310, format!("invalid picture string '{picture}': {msg}"))
}

/// One sub-picture (positive or negative) after analysis.
#[derive(Debug, Default)]
struct SubPicture {
    prefix: String,
    suffix: String,
    min_int: usize,
    /// Grouping separator positions counted from the decimal point.
    grouping: Vec<usize>,
    min_frac: usize,
    max_frac: usize,
    /// 100 for percent, 1000 for per-mille.
    scale: f64,
}

impl DecimalFormat {
    fn digit_value(&self, c: char) -> Option<u32> {
        let d = u32::from(c).checked_sub(u32::from(self.zero_digit))?;
        (d < 10).then_some(d)
    }

    fn is_active(&self, c: char) -> bool {
        c == self.decimal_separator
            || c == self.grouping_separator
            || c == self.digit
            || self.digit_value(c).is_some()
    }

    fn digit_char(&self, d: u32) -> char {
        char::from_u32(u32::from(self.zero_digit) + d).unwrap_or('?')
    }
}

fn analyze(picture: &str, fmt: &DecimalFormat) -> Result<SubPicture, Error> {
    let chars: Vec<char> = picture.chars().collect();
    let first = chars.iter().position(|&c| fmt.is_active(c));
    let last = chars.iter().rposition(|&c| fmt.is_active(c));
    let (Some(first), Some(last)) = (first, last) else {
        return Err(picture_error(picture, "no digit or optional digit sign"));
    };
    let mut sub = SubPicture {
        prefix: chars[..first].iter().collect(),
        suffix: chars[last + 1..].iter().collect(),
        scale: 1.0,
        ..SubPicture::default()
    };
    let passive = format!("{}{}", sub.prefix, sub.suffix);
    let percents = passive.chars().filter(|&c| c == fmt.percent).count();
    let per_milles = passive.chars().filter(|&c| c == fmt.per_mille).count();
    match (percents, per_milles) {
        (0, 0) => {}
        (1, 0) => sub.scale = 100.0,
        (0, 1) => sub.scale = 1000.0,
        _ => return Err(picture_error(picture, "more than one percent or per-mille sign")),
    }

    let active = &chars[first..=last];
    let decimal_positions: Vec<usize> =
        active.iter().enumerate().filter(|(_, c)| **c == fmt.decimal_separator).map(|(i, _)| i).collect();
    if decimal_positions.len() > 1 {
        return Err(picture_error(picture, "more than one decimal separator"));
    }
    let (int_part, frac_part) = match decimal_positions.first() {
        Some(&i) => (&active[..i], &active[i + 1..]),
        None => (active, &active[active.len()..]),
    };
    if !active.iter().any(|&c| c == fmt.digit || fmt.digit_value(c).is_some()) {
        return Err(picture_error(picture, "no digit or optional digit sign"));
    }

    let mut digits_from_right = 0;
    for (i, &c) in int_part.iter().enumerate().rev() {
        if c == fmt.grouping_separator {
            if i + 1 == int_part.len() || int_part[i + 1] == fmt.grouping_separator {
                return Err(picture_error(picture, "grouping separator next to the decimal separator"));
            }
            sub.grouping.push(digits_from_right);
            continue;
        }
        digits_from_right += 1;
        if fmt.digit_value(c).is_some() {
            sub.min_int += 1;
        } else if c == fmt.digit && int_part[..i].iter().any(|&p| fmt.digit_value(p).is_some()) {
            return Err(picture_error(picture, "optional digit sign after a mandatory digit"));
        }
    }

    for (i, &c) in frac_part.iter().enumerate() {
        if c == fmt.grouping_separator {
            return Err(picture_error(picture, "grouping separator in the fractional part"));
        }
        if fmt.digit_value(c).is_some() {
            if frac_part[..i].iter().any(|&p| p == fmt.digit) {
                return Err(picture_error(picture, "mandatory digit after an optional digit sign"));
            }
            sub.min_frac += 1;
        }
        sub.max_frac += 1;
    }
    if sub.min_int == 0 && sub.max_frac == 0 {
        sub.min_int = 1;
    }
    Ok(sub)
}

/// Inserts grouping separators; regular when every position is a multiple of the first.
fn group(digits: &str, positions: &[usize], sep: char) -> String {
    let mut positions = positions.to_vec();
    positions.sort_unstable();
    let regular = positions.first().filter(|&&g| g > 0 && positions.iter().enumerate().all(|(i, &p)| p == g * (i + 1)));
    let chars: Vec<char> = digits.chars().collect();
    let mut out = Vec::with_capacity(chars.len() * 2);
    for (from_right, &c) in chars.iter().rev().enumerate() {
        let at_group = from_right > 0
            && match regular {
                Some(&g) => from_right % g == 0,
                None => positions.contains(&from_right),
            };
        if at_group {
            out.push(sep);
        }
        out.push(c);
    }
    out.iter().rev().collect()
}

fn format_with(value: f64, sub: &SubPicture, fmt: &DecimalFormat) -> String {
    let value = value.abs() * sub.scale;
    if value.is_infinite() {
        return format!("{}{}{}", sub.prefix, fmt.infinity, sub.suffix);
    }
    let factor = 10f64.powi(sub.max_frac as i32);
    let rounded = (value * factor).round_ties_even() / factor;
    let text = format!("{rounded:.*}", sub.max_frac);
    let (int_digits, frac_digits) = text.split_once('.').unwrap_or((&text, ""));
    let mut int_digits = int_digits.trim_start_matches('0').to_string();
    while int_digits.len() < sub.min_int {
        int_digits.insert(0, '0');
    }
    let mut frac_digits = frac_digits.to_string();
    while frac_digits.len() > sub.min_frac && frac_digits.ends_with('0') {
        frac_digits.pop();
    }
    if int_digits.is_empty() && frac_digits.is_empty() {
        int_digits.push('0');
    }
    let map = |s: &str| -> String { s.chars().filter_map(|c| c.to_digit(10)).map(|d| fmt.digit_char(d)).collect() };
    let mut out = sub.prefix.clone();
    out.push_str(&group(&map(&int_digits), &sub.grouping, fmt.grouping_separator));
    if !frac_digits.is_empty() {
        out.push(fmt.decimal_separator);
        out.push_str(&map(&frac_digits));
    }
    out.push_str(&sub.suffix);
    out
}

pub(crate) fn format_number(value: Option<f64>, picture: &str, fmt: &DecimalFormat) -> Result<String, Error> {
    let parts: Vec<&str> = picture.split(fmt.pattern_separator).collect();
    let (positive, negative) = match parts.as_slice() {
        [p] => (analyze(p, fmt)?, None),
        [p, n] => (analyze(p, fmt)?, Some(analyze(n, fmt)?)),
        _ => return Err(picture_error(picture, "more than one pattern separator")),
    };
    let value = value.unwrap_or(f64::NAN);
    if value.is_nan() {
        return Ok(fmt.nan.clone());
    }
    let negative_value = value < 0.0 || (value == 0.0 && value.is_sign_negative());
    Ok(match (negative_value, negative) {
        (false, _) => format_with(value, &positive, fmt),
        (true, Some(neg)) => format_with(value, &neg, fmt),
        (true, None) => format!("{}{}", fmt.minus_sign, format_with(value, &positive, fmt)),
    })
}

pub(super) fn format_number_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let value = double_arg(&args[0], "fn:format-number")?;
    let picture = string_arg(&args[1], "fn:format-number")?;
    let format_name = match args.get(2) {
        Some(n) if !n.is_empty() => {
            let token = string_arg(n, "fn:format-number")?;
            let name = resolve_eqname(&ctx.static_ctx.namespaces, token.trim(), NameRole::DecimalFormat)
                .map_err(|e| Error::from_code(ErrorCode::FODF1280, e.message))?;
            Some(name)
        }
        _ => None,
    };
    let fmt = ctx.static_ctx.decimal_format(format_name.as_ref()).ok_or_else(|| {
        let name = format_name.as_ref().map(ToString::to_string).unwrap_or_default();
        Error::from_code(ErrorCode::FODF1280, format!("unknown decimal format '{name}'"))
    })?;
    Ok(string(format_number(value, &picture, fmt)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1234.5, "#,##0.00", "1,234.50")]
    #[case(0.25, "0%", "25%")]
    #[case(-3.0, "0", "-3")]
    #[case(-3.0, "0;(0)", "(3)")]
    #[case(12345678.0, "#,###", "12,345,678")]
    #[case(0.5, "#.##", ".5")]
    #[case(2.5, "0", "2")]
    fn formats_with_picture(#[case] value: f64, #[case] picture: &str, #[case] expected: &str) {
        assert_eq!(format_number(Some(value), picture, &DecimalFormat::default()).unwrap(), expected);
    }

    #[rstest]
    #[case("0.0.0")]
    #[case("abc")]
    #[case("0;0;0")]
    #[case("#,.0")]
    fn rejects_bad_pictures(#[case] picture: &str) {
        let err = format_number(Some(1.0), picture, &DecimalFormat::default()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FODF1310);
    }

    #[test]
    fn nan_uses_format_symbol() {
        let mut fmt = DecimalFormat::default();
        fmt.set_property("NaN", "not-a-number").unwrap();
        assert_eq!(format_number(None, "0", &fmt).unwrap(), "not-a-number");
    }
}
