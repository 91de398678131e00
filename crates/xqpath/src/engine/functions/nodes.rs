use super::common::{arg_or_context, boolean, opt_node, string, string_arg};
use crate::engine::evaluator::set_ops::sort_distinct;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::{Node, NodeKind};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

fn node_or_context(ctx: &CallCtx<'_>, args: &[XdmSequence], what: &str) -> Result<Option<Node>, Error> {
    let seq = arg_or_context(ctx, args)?;
    if args.is_empty()
        && let [XdmItem::Atomic(a)] = seq.as_slice()
    {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what}: context item is {}, not a node", a.type_name()),
        ));
    }
    opt_node(&seq, what)
}

/// Name of element, attribute, PI and namespace nodes; none for other kinds.
fn expanded_name_of(n: &Node) -> Option<(Option<String>, Option<String>, String)> {
    let q = n.name()?;
    match n.kind() {
        NodeKind::Namespace if q.local.is_empty() => None,
        _ => Some((q.prefix.as_ref().map(ToString::to_string), q.ns_uri.as_ref().map(ToString::to_string), q.local.to_string())),
    }
}

pub(super) fn name_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:name")?;
    let name = node.as_ref().and_then(expanded_name_of).map(|(prefix, _, local)| match prefix {
        Some(p) => format!("{p}:{local}"),
        None => local,
    });
    Ok(string(name.unwrap_or_default()))
}

pub(super) fn local_name_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:local-name")?;
    Ok(string(node.as_ref().and_then(expanded_name_of).map(|(_, _, local)| local).unwrap_or_default()))
}

pub(super) fn namespace_uri_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:namespace-uri")?;
    let uri = node
        .filter(|n| matches!(n.kind(), NodeKind::Element | NodeKind::Attribute))
        .and_then(|n| n.name().and_then(|q| q.ns_uri.as_ref().map(ToString::to_string)));
    Ok(vec![XdmItem::Atomic(XdmAtomicValue::AnyUri(uri.unwrap_or_default()))])
}

pub(super) fn node_name_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:node-name")?;
    Ok(node
        .as_ref()
        .and_then(expanded_name_of)
        .map(|(prefix, ns_uri, local)| XdmItem::Atomic(XdmAtomicValue::QName { ns_uri, prefix, local }))
        .into_iter()
        .collect())
}

pub(super) fn root_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:root")?;
    Ok(node.map(|n| XdmItem::Node(n.root())).into_iter().collect())
}

pub(super) fn has_children_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let node = node_or_context(ctx, args, "fn:has-children")?;
    Ok(boolean(node.is_some_and(|n| n.has_children())))
}

fn nodes_arg(seq: &[XdmItem], what: &str) -> Result<Vec<Node>, Error> {
    seq.iter()
        .map(|item| match item {
            XdmItem::Node(n) => Ok(n.clone()),
            XdmItem::Atomic(a) => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} expects nodes, got {}", a.type_name()),
            )),
        })
        .collect()
}

/// Nodes of the argument that are not ancestors of other nodes in it.
pub(super) fn innermost_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let nodes = sort_distinct(nodes_arg(&args[0], "fn:innermost")?);
    Ok(nodes
        .iter()
        .filter(|n| !nodes.iter().any(|other| n.is_ancestor_of(other)))
        .map(|n| XdmItem::Node(n.clone()))
        .collect())
}

/// Nodes of the argument that have no ancestor in it.
pub(super) fn outermost_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let nodes = sort_distinct(nodes_arg(&args[0], "fn:outermost")?);
    Ok(nodes
        .iter()
        .filter(|n| !nodes.iter().any(|other| other.is_ancestor_of(n)))
        .map(|n| XdmItem::Node(n.clone()))
        .collect())
}

/// Parses a string into a fresh document node.
pub(super) fn parse_xml_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    if args[0].is_empty() {
        return Ok(Vec::new());
    }
    let text = string_arg(&args[0], "fn:parse-xml")?;
    let doc = crate::model::xml::parse_document(&text)
        .map_err(|e| Error::from_code(ErrorCode::FODC0006, e.message))?;
    Ok(vec![XdmItem::Node(doc)])
}
