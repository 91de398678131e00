use core::fmt;

use crate::model::Node;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self { ns_uri: ns_uri.filter(|u| !u.is_empty()), local: local.into() }
    }

    pub fn in_ns(ns_uri: &str, local: impl Into<String>) -> Self {
        Self::new(Some(ns_uri.to_string()), local)
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self { ns_uri: None, local: local.into() }
    }
}

/// Renders the name in `Q{uri}local` form (`local` when it has no namespace).
impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Atomic values supported by the evaluator.
///
/// `Decimal` is carried as `f64`; integral decimals print without a fraction.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f32),
    AnyUri(String),
    QName { ns_uri: Option<String>, prefix: Option<String>, local: String },
    UntypedAtomic(String),
}

impl XdmAtomicValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            XdmAtomicValue::Boolean(_) => "xs:boolean",
            XdmAtomicValue::String(_) => "xs:string",
            XdmAtomicValue::Integer(_) => "xs:integer",
            XdmAtomicValue::Decimal(_) => "xs:decimal",
            XdmAtomicValue::Double(_) => "xs:double",
            XdmAtomicValue::Float(_) => "xs:float",
            XdmAtomicValue::AnyUri(_) => "xs:anyURI",
            XdmAtomicValue::QName { .. } => "xs:QName",
            XdmAtomicValue::UntypedAtomic(_) => "xs:untypedAtomic",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            XdmAtomicValue::Integer(_) | XdmAtomicValue::Decimal(_) | XdmAtomicValue::Double(_) | XdmAtomicValue::Float(_)
        )
    }

    /// Canonical lexical form (the result of casting to `xs:string`).
    pub fn canonical_string(&self) -> String {
        match self {
            XdmAtomicValue::Boolean(b) => b.to_string(),
            XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => s.clone(),
            XdmAtomicValue::Integer(i) => i.to_string(),
            XdmAtomicValue::Decimal(d) => format_decimal(*d),
            XdmAtomicValue::Double(d) => format_double(*d),
            XdmAtomicValue::Float(f) => format_float(*f),
            XdmAtomicValue::QName { prefix: Some(p), local, .. } => format!("{p}:{local}"),
            XdmAtomicValue::QName { local, .. } => local.clone(),
        }
    }
}

impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

pub fn format_decimal(d: f64) -> String {
    if d.is_nan() || d.is_infinite() {
        return format_double(d);
    }
    if d == 0.0 {
        return "0".to_string();
    }
    format!("{d}")
}

/// `xs:double` canonical form: plain notation in `[1e-6, 1e6)`, scientific otherwise.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let abs = d.abs();
    if (1e-6..1e6).contains(&abs) {
        return format!("{d}");
    }
    scientific(format!("{d:E}"))
}

pub fn format_float(f: f32) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let abs = f.abs();
    if (1e-6..1e6).contains(&abs) {
        return format!("{f}");
    }
    scientific(format!("{f:E}"))
}

// `1E6` -> `1.0E6`
fn scientific(s: String) -> String {
    match s.split_once('E') {
        Some((mantissa, exp)) if !mantissa.contains('.') => format!("{mantissa}.0E{exp}"),
        _ => s,
    }
}

pub type XdmSequence = Vec<XdmItem>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem {
    Node(Node),
    Atomic(XdmAtomicValue),
}

impl XdmItem {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            XdmItem::Node(n) => Some(n),
            XdmItem::Atomic(_) => None,
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            XdmItem::Node(n) => n.string_value(),
            XdmItem::Atomic(a) => a.canonical_string(),
        }
    }

    pub fn atomize(&self) -> XdmAtomicValue {
        match self {
            XdmItem::Node(n) => n.typed_value(),
            XdmItem::Atomic(a) => a.clone(),
        }
    }
}

impl From<Node> for XdmItem {
    fn from(n: Node) -> Self {
        XdmItem::Node(n)
    }
}

impl From<XdmAtomicValue> for XdmItem {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

impl fmt::Display for XdmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => write!(f, "{}()", n.kind().as_str()),
            XdmItem::Atomic(a) => write!(f, "{a}"),
        }
    }
}

/// Atomizes every item of a sequence.
pub fn atomize_all(seq: &[XdmItem]) -> Vec<XdmAtomicValue> {
    seq.iter().map(XdmItem::atomize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_canonical_forms() {
        assert_eq!(format_double(1e6), "1.0E6");
        assert_eq!(format_double(123.0), "123");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(1.5e-7), "1.5E-7");
        assert_eq!(format_double(-0.0), "-0");
        assert_eq!(format_double(f64::NEG_INFINITY), "-INF");
    }

    #[test]
    fn decimal_drops_integral_fraction() {
        assert_eq!(format_decimal(5.0), "5");
        assert_eq!(format_decimal(2.25), "2.25");
    }
}
