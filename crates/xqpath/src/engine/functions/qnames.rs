use super::common::{opt_atomic, opt_node, string_arg};
use crate::eqname::{LexicalName, is_ncname, parse_eqname};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::{Node, NodeKind};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

fn qname_item(ns_uri: Option<String>, prefix: Option<String>, local: String) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::QName { ns_uri: ns_uri.filter(|u| !u.is_empty()), prefix, local })]
}

/// Splits `prefix:local` / `local`; `Q{..}` forms are not lexical QNames here.
fn split_lexical(s: &str, what: &str) -> Result<(Option<String>, String), Error> {
    let invalid = || Error::from_code(ErrorCode::FOCA0002, format!("{what}: '{s}' is not a valid QName"));
    match parse_eqname(s.trim()).map_err(|_| invalid())? {
        LexicalName::NCName(local) => Ok((None, local)),
        LexicalName::Prefixed { prefix, local } => Ok((Some(prefix), local)),
        LexicalName::UriQualified { .. } => Err(invalid()),
    }
}

pub(super) fn qname_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let uri = string_arg(&args[0], "fn:QName")?;
    let lexical = string_arg(&args[1], "fn:QName")?;
    let (prefix, local) = split_lexical(&lexical, "fn:QName")?;
    if prefix.is_some() && uri.is_empty() {
        return Err(Error::from_code(
            ErrorCode::FOCA0002,
            format!("fn:QName: prefixed name '{lexical}' requires a namespace URI"),
        ));
    }
    Ok(qname_item(Some(uri), prefix, local))
}

fn qname_arg(seq: &[XdmItem], what: &str) -> Result<Option<(Option<String>, Option<String>, String)>, Error> {
    match opt_atomic(seq, what)? {
        None => Ok(None),
        Some(XdmAtomicValue::QName { ns_uri, prefix, local }) => Ok(Some((ns_uri, prefix, local))),
        Some(other) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects xs:QName, got {}", other.type_name()),
        )),
    }
}

pub(super) fn prefix_from_qname_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(qname_arg(&args[0], "fn:prefix-from-QName")?
        .and_then(|(_, prefix, _)| prefix)
        .map(|p| XdmItem::Atomic(XdmAtomicValue::String(p)))
        .into_iter()
        .collect())
}

pub(super) fn local_name_from_qname_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(qname_arg(&args[0], "fn:local-name-from-QName")?
        .map(|(_, _, local)| XdmItem::Atomic(XdmAtomicValue::String(local)))
        .into_iter()
        .collect())
}

pub(super) fn namespace_uri_from_qname_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(qname_arg(&args[0], "fn:namespace-uri-from-QName")?
        .map(|(ns, _, _)| XdmItem::Atomic(XdmAtomicValue::AnyUri(ns.unwrap_or_default())))
        .into_iter()
        .collect())
}

fn element_arg(seq: &[XdmItem], what: &str) -> Result<Node, Error> {
    match opt_node(seq, what)? {
        Some(n) if n.kind() == NodeKind::Element => Ok(n),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects an element"))),
    }
}

/// Resolves a lexical QName against the in-scope namespaces of an element.
pub(super) fn resolve_qname_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    if args[0].is_empty() {
        return Ok(Vec::new());
    }
    let lexical = string_arg(&args[0], "fn:resolve-QName")?;
    let element = element_arg(&args[1], "fn:resolve-QName")?;
    let (prefix, local) = split_lexical(&lexical, "fn:resolve-QName")?;
    let uri = element.lookup_namespace_uri(prefix.as_deref());
    if prefix.is_some() && uri.is_none() {
        return Err(Error::from_code(
            ErrorCode::FONS0004,
            format!("fn:resolve-QName: no namespace binding for prefix in '{lexical}'"),
        ));
    }
    Ok(qname_item(uri, prefix, local))
}

pub(super) fn in_scope_prefixes_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let element = element_arg(&args[0], "fn:in-scope-prefixes")?;
    Ok(element
        .in_scope_namespaces()
        .into_iter()
        .map(|(prefix, _)| XdmItem::Atomic(XdmAtomicValue::String(prefix.unwrap_or_default())))
        .collect())
}

pub(super) fn namespace_uri_for_prefix_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let prefix = string_arg(&args[0], "fn:namespace-uri-for-prefix")?;
    if !prefix.is_empty() && !is_ncname(&prefix) {
        return Ok(Vec::new());
    }
    let element = element_arg(&args[1], "fn:namespace-uri-for-prefix")?;
    let prefix = Some(prefix.as_str()).filter(|p| !p.is_empty());
    Ok(element
        .in_scope_namespaces()
        .into_iter()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| XdmItem::Atomic(XdmAtomicValue::AnyUri(uri)))
        .into_iter()
        .collect())
}
