//! Extended qualified names (EQNames): lexical forms, the in-scope namespace table and
//! resolution of names to expanded names depending on where the name occurs.

use std::collections::HashMap;

use crate::consts::{FNS, LOCAL_NS, XML_URI, XMLNS_URI, XQUERY_OPTIONS_NS, XS, XSI};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::ExpandedName;

/// A name as written: `local`, `prefix:local` or `Q{uri}local`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexicalName {
    NCName(String),
    Prefixed { prefix: String, local: String },
    /// URI already reference-expanded and whitespace normalized.
    UriQualified { uri: String, local: String },
}

impl LexicalName {
    pub fn local_part(&self) -> &str {
        match self {
            LexicalName::NCName(l) | LexicalName::Prefixed { local: l, .. } | LexicalName::UriQualified { local: l, .. } => l,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            LexicalName::Prefixed { prefix, .. } => Some(prefix),
            _ => None,
        }
    }
}

impl core::fmt::Display for LexicalName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LexicalName::NCName(l) => f.write_str(l),
            LexicalName::Prefixed { prefix, local } => write!(f, "{prefix}:{local}"),
            LexicalName::UriQualified { uri, local } => write!(f, "Q{{{uri}}}{local}"),
        }
    }
}

/// Name test as written, including wildcard forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexicalNameTest {
    Name(LexicalName),
    /// `*`
    Any,
    /// `prefix:*`
    AnyLocalInPrefix(String),
    /// `Q{uri}*`, an empty URI meaning no namespace
    AnyLocalInUri(String),
    /// `*:local`
    AnyNamespace(String),
}

/// Where a name occurs; decides which default namespace applies to unprefixed names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRole {
    Element,
    Attribute,
    Type,
    Variable,
    Function,
    Option,
    DecimalFormat,
    Pragma,
}

/// A name test after namespace resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Name(ExpandedName),
    Any,
    /// Any local name in the namespace (`None` = no namespace).
    Namespace(Option<String>),
    /// The local name in any namespace.
    Local(String),
}

impl NameTest {
    pub fn matches(&self, ns_uri: Option<&str>, local: &str) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Name(n) => n.local == local && n.ns_uri.as_deref() == ns_uri,
            NameTest::Namespace(ns) => ns.as_deref() == ns_uri,
            NameTest::Local(l) => l == local,
        }
    }
}

/// Prefix bindings plus the default element and function namespaces.
///
/// Cloned when a direct element constructor opens a nested scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTable {
    by_prefix: HashMap<String, String>,
    default_element: Option<String>,
    default_function: Option<String>,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        let by_prefix = [("xml", XML_URI), ("xs", XS), ("xsi", XSI), ("fn", FNS), ("local", LOCAL_NS)]
            .into_iter()
            .map(|(p, u)| (p.to_string(), u.to_string()))
            .collect();
        Self { by_prefix, default_element: None, default_function: Some(FNS.to_string()) }
    }
}

impl NamespaceTable {
    /// Table with only the `xml` binding and no default namespaces.
    pub fn empty() -> Self {
        let mut by_prefix = HashMap::new();
        by_prefix.insert("xml".to_string(), XML_URI.to_string());
        Self { by_prefix, default_element: None, default_function: None }
    }

    /// Binds `prefix`; an empty URI removes the binding. `xml` and `xmlns` cannot be rebound.
    pub fn bind(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        if prefix == "xmlns" || (prefix == "xml" && uri != XML_URI) || (prefix != "xml" && (uri == XML_URI || uri == XMLNS_URI)) {
            return Err(Error::from_code(
                ErrorCode::XQST0070,
                format!("cannot bind prefix '{prefix}' to '{uri}'"),
            ));
        }
        if uri.is_empty() {
            self.by_prefix.remove(prefix);
        } else {
            self.by_prefix.insert(prefix.to_string(), uri.to_string());
        }
        Ok(())
    }

    pub fn lookup(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_prefix.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub fn default_element_namespace(&self) -> Option<&str> {
        self.default_element.as_deref()
    }

    pub fn set_default_element_namespace(&mut self, uri: Option<String>) {
        self.default_element = uri.filter(|u| !u.is_empty());
    }

    pub fn default_function_namespace(&self) -> Option<&str> {
        self.default_function.as_deref()
    }

    pub fn set_default_function_namespace(&mut self, uri: Option<String>) {
        self.default_function = uri.filter(|u| !u.is_empty());
    }

    fn prefix_uri(&self, prefix: &str) -> Result<&str, Error> {
        self.lookup(prefix).ok_or_else(|| {
            Error::from_code(ErrorCode::XPST0081, format!("namespace prefix '{prefix}' is not declared"))
        })
    }

    /// Resolves a lexical name for the given role.
    pub fn resolve(&self, name: &LexicalName, role: NameRole) -> Result<ExpandedName, Error> {
        match name {
            LexicalName::UriQualified { uri, local } => Ok(ExpandedName::new(Some(uri.clone()), local.clone())),
            LexicalName::Prefixed { prefix, local } => {
                let uri = self.prefix_uri(prefix)?;
                Ok(ExpandedName::new(Some(uri.to_string()), local.clone()))
            }
            LexicalName::NCName(local) => {
                let ns = match role {
                    NameRole::Element | NameRole::Type => self.default_element.clone(),
                    NameRole::Function => self.default_function.clone(),
                    NameRole::Option => Some(XQUERY_OPTIONS_NS.to_string()),
                    NameRole::Pragma => {
                        return Err(Error::from_code(
                            ErrorCode::XPST0081,
                            format!("pragma name '{local}' must have a namespace"),
                        ));
                    }
                    NameRole::Attribute | NameRole::Variable | NameRole::DecimalFormat => None,
                };
                Ok(ExpandedName::new(ns, local.clone()))
            }
        }
    }

    /// Resolves a name test; `role` is [`NameRole::Element`] or [`NameRole::Attribute`].
    pub fn resolve_test(&self, test: &LexicalNameTest, role: NameRole) -> Result<NameTest, Error> {
        Ok(match test {
            LexicalNameTest::Any => NameTest::Any,
            LexicalNameTest::AnyNamespace(local) => NameTest::Local(local.clone()),
            LexicalNameTest::AnyLocalInUri(uri) => NameTest::Namespace(Some(uri.clone()).filter(|u| !u.is_empty())),
            LexicalNameTest::AnyLocalInPrefix(prefix) => NameTest::Namespace(Some(self.prefix_uri(prefix)?.to_string())),
            LexicalNameTest::Name(name) => NameTest::Name(self.resolve(name, role)?),
        })
    }
}

/// Parses and resolves a name token in one step.
pub fn resolve_eqname(table: &NamespaceTable, token: &str, role: NameRole) -> Result<ExpandedName, Error> {
    let name = parse_eqname(token)?;
    table.resolve(&name, role)
}

fn syntax(msg: impl Into<String>) -> Error {
    Error::from_code(ErrorCode::XPST0003, msg)
}

/// Parses `local`, `prefix:local` or `Q{uri}local` (surrounding whitespace allowed).
pub fn parse_eqname(token: &str) -> Result<LexicalName, Error> {
    let token = token.trim();
    if let Some(rest) = token.strip_prefix("Q{") {
        let (raw_uri, local) = split_braced(rest)?;
        if !is_ncname(local) {
            return Err(syntax(format!("invalid local name after Q{{...}} in '{token}'")));
        }
        return Ok(LexicalName::UriQualified { uri: normalize_uri(raw_uri)?, local: local.to_string() });
    }
    if token.contains(['{', '}']) {
        return Err(syntax(format!("unbalanced braces in name '{token}'")));
    }
    match token.split_once(':') {
        Some((prefix, local)) if is_ncname(prefix) && is_ncname(local) => {
            Ok(LexicalName::Prefixed { prefix: prefix.to_string(), local: local.to_string() })
        }
        None if is_ncname(token) => Ok(LexicalName::NCName(token.to_string())),
        _ => Err(syntax(format!("invalid name '{token}'"))),
    }
}

/// Parses a name test: any EQName or one of the wildcard forms.
pub fn parse_name_test(token: &str) -> Result<LexicalNameTest, Error> {
    let token = token.trim();
    if token == "*" {
        return Ok(LexicalNameTest::Any);
    }
    if let Some(local) = token.strip_prefix("*:") {
        return if is_ncname(local) {
            Ok(LexicalNameTest::AnyNamespace(local.to_string()))
        } else {
            Err(syntax(format!("invalid wildcard '{token}'")))
        };
    }
    if let Some(rest) = token.strip_prefix("Q{") {
        let (raw_uri, local) = split_braced(rest)?;
        if local == "*" {
            return Ok(LexicalNameTest::AnyLocalInUri(normalize_uri(raw_uri)?));
        }
    }
    if let Some(prefix) = token.strip_suffix(":*") {
        return if is_ncname(prefix) {
            Ok(LexicalNameTest::AnyLocalInPrefix(prefix.to_string()))
        } else {
            Err(syntax(format!("invalid wildcard '{token}'")))
        };
    }
    parse_eqname(token).map(LexicalNameTest::Name)
}

// Splits `uri}rest` after a `Q{` prefix.
fn split_braced(rest: &str) -> Result<(&str, &str), Error> {
    let close = rest.find('}').ok_or_else(|| syntax("unterminated braced URI literal"))?;
    let (uri, tail) = (&rest[..close], &rest[close + 1..]);
    if uri.contains('{') {
        return Err(syntax("'{' is not allowed inside a braced URI literal"));
    }
    if tail.starts_with(':') {
        return Err(syntax("':' is not allowed after a braced URI literal"));
    }
    Ok((uri, tail))
}

/// Expands references and applies `xs:anyURI` whitespace collapsing.
pub fn normalize_uri(raw: &str) -> Result<String, Error> {
    let expanded = expand_references(raw)?;
    Ok(expanded.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Expands character references (`&#45;`, `&#x2D;`) and the five predefined entities.
pub fn expand_references(raw: &str) -> Result<String, Error> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let semi = tail.find(';').ok_or_else(|| syntax("unterminated reference"))?;
        let body = &tail[..semi];
        let ch = match body {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = body.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = body.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.filter(|&c| c != 0)
                    .and_then(char::from_u32)
                    .ok_or_else(|| syntax(format!("invalid reference '&{body};'")))?
            }
        };
        out.push(ch);
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn is_name_start_char(c: char) -> bool {
    c == '_' || c.is_alphabetic() || matches!(c, '\u{C0}'..='\u{2FF}' | '\u{370}'..='\u{1FFF}' | '\u{F900}'..='\u{FFFD}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c) || c.is_ascii_digit() || matches!(c, '-' | '.' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

pub fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c != ':' && is_name_start_char(c)) && chars.all(|c| c != ':' && is_name_char(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braced_uri_whitespace_is_collapsed() {
        let name = parse_eqname("Q{ http://x/ ns }local").unwrap();
        assert_eq!(name, LexicalName::UriQualified { uri: "http://x/ ns".into(), local: "local".into() });
    }

    #[test]
    fn char_refs_expand_in_uri() {
        let a = resolve_eqname(&NamespaceTable::default(), "Q{http://a&#x2D;b}x", NameRole::Element).unwrap();
        let b = resolve_eqname(&NamespaceTable::default(), "Q{http://a-b}x", NameRole::Element).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn colon_after_brace_is_syntax_error() {
        let err = parse_eqname("Q{http://a}:x").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    }

    #[test]
    fn unbound_prefix_is_reported() {
        let err = resolve_eqname(&NamespaceTable::default(), "nope:x", NameRole::Variable).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0081);
    }

    #[test]
    fn role_selects_default_namespace() {
        let table = NamespaceTable::default();
        let f = resolve_eqname(&table, "count", NameRole::Function).unwrap();
        assert_eq!(f.ns_uri.as_deref(), Some(FNS));
        let v = resolve_eqname(&table, "count", NameRole::Variable).unwrap();
        assert_eq!(v.ns_uri, None);
        let o = resolve_eqname(&table, "opt", NameRole::Option).unwrap();
        assert_eq!(o.ns_uri.as_deref(), Some(XQUERY_OPTIONS_NS));
    }

    #[test]
    fn empty_braced_wildcard_means_no_namespace() {
        let test = parse_name_test("Q{}*").unwrap();
        let resolved = NamespaceTable::default().resolve_test(&test, NameRole::Element).unwrap();
        assert!(resolved.matches(None, "a"));
        assert!(!resolved.matches(Some("urn:x"), "a"));
    }
}
