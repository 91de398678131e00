//! Node constructors. Every constructed node is the root of a fresh tree.

use crate::consts::{XML_URI, XMLNS_URI};
use crate::engine::runtime::{Error, ErrorCode};
use crate::eqname::{self, NameRole, NamespaceTable, is_ncname};
use crate::model::{Node, NodeKind, QName, TreeBuilder};
use crate::xdm::{XdmAtomicValue, XdmItem};

/// Atomizes `items` and joins their string values with single spaces.
pub fn join_atomized(items: &[XdmItem]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&item.atomize().canonical_string());
    }
    out
}

/// Builds a comment node from the space-joined string values of `items`.
///
/// Content containing `--` or ending in `-` is rejected with `XQDY0072`.
pub fn construct_comment(items: &[XdmItem]) -> Result<Node, Error> {
    let content = join_atomized(items);
    if content.contains("--") || content.ends_with('-') {
        return Err(Error::from_code(
            ErrorCode::XQDY0072,
            format!("comment content must not contain '--' or end with '-': {content:?}"),
        ));
    }
    let mut b = TreeBuilder::new();
    b.comment(&content);
    Ok(b.finish())
}

/// `text { }`; no node for empty content.
pub fn construct_text(items: &[XdmItem]) -> Option<Node> {
    if items.is_empty() {
        return None;
    }
    let mut b = TreeBuilder::new();
    b.text_node(&join_atomized(items));
    Some(b.finish())
}

pub fn construct_processing_instruction(target: &str, items: &[XdmItem]) -> Result<Node, Error> {
    if !is_ncname(target) {
        return Err(Error::from_code(ErrorCode::XQDY0041, format!("'{target}' is not a valid PI target")));
    }
    if target.eq_ignore_ascii_case("xml") {
        return Err(Error::from_code(ErrorCode::XQDY0064, "processing-instruction target must not be 'xml'"));
    }
    let content = join_atomized(items);
    let content = content.trim_start();
    if content.contains("?>") {
        return Err(Error::from_code(ErrorCode::XQDY0026, "processing-instruction content must not contain '?>'"));
    }
    let mut b = TreeBuilder::new();
    b.processing_instruction(target, content);
    Ok(b.finish())
}

/// Parentless attribute node.
pub fn construct_attribute(name: QName, value: &str) -> Result<Node, Error> {
    let is_xmlns = name.ns_uri.as_deref() == Some(XMLNS_URI)
        || name.prefix.as_deref() == Some("xmlns")
        || (name.ns_uri.is_none() && name.local.as_ref() == "xmlns");
    if is_xmlns {
        return Err(Error::from_code(ErrorCode::XQDY0044, format!("cannot construct attribute {name}")));
    }
    let mut b = TreeBuilder::new();
    b.append_attribute(name, value);
    Ok(b.finish())
}

pub fn construct_document(items: &[XdmItem]) -> Result<Node, Error> {
    let mut b = TreeBuilder::new();
    b.start_document();
    let mut content = ContentWriter::default();
    for item in items {
        if let XdmItem::Node(n) = item
            && matches!(n.kind(), NodeKind::Attribute | NodeKind::Namespace)
        {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("document content cannot contain {} nodes", n.kind().as_str()),
            ));
        }
        content.push(&mut b, item)?;
    }
    content.flush(&mut b);
    b.end_document();
    Ok(b.finish())
}

/// Builds an element from its name, declared namespaces and content parts.
///
/// Adjacent atomic values within one part become a single text node, parts never join
/// their atomic values with each other.
pub fn construct_element(
    name: QName,
    namespaces: &[(Option<String>, String)],
    parts: &[Vec<XdmItem>],
) -> Result<Node, Error> {
    let mut b = TreeBuilder::new();
    let prefix = name.prefix.as_ref().map(ToString::to_string);
    let uri = name.ns_uri.as_ref().map(ToString::to_string);
    b.start_element(name);
    for (p, u) in namespaces {
        if p.is_none() && u.is_empty() {
            continue;
        }
        b.namespace(p.as_deref(), u)?;
    }
    if let Some(uri) = &uri
        && uri != XML_URI
    {
        b.namespace(prefix.as_deref(), uri)?;
    }
    declare_attribute_namespaces(&mut b, parts)?;
    for part in parts {
        let mut content = ContentWriter::default();
        for item in part {
            content.push(&mut b, item)?;
        }
        content.flush(&mut b);
    }
    b.end_element();
    Ok(b.finish())
}

/// Binds the prefixes of the attribute nodes that open the content, ahead of any attribute.
fn declare_attribute_namespaces(b: &mut TreeBuilder, parts: &[Vec<XdmItem>]) -> Result<(), Error> {
    for item in parts.iter().flatten() {
        let XdmItem::Node(node) = item else { break };
        match node.kind() {
            NodeKind::Attribute => {
                if let Some(name) = node.name()
                    && let (Some(prefix), Some(uri)) = (&name.prefix, &name.ns_uri)
                    && &**uri != XML_URI
                {
                    b.namespace(Some(&**prefix), &**uri)?;
                }
            }
            NodeKind::Namespace => {}
            _ => break,
        }
    }
    Ok(())
}

/// Accumulates adjacent atomic values of one content sequence.
#[derive(Default)]
struct ContentWriter {
    pending: Option<String>,
}

impl ContentWriter {
    fn push(&mut self, b: &mut TreeBuilder, item: &XdmItem) -> Result<(), Error> {
        match item {
            XdmItem::Atomic(a) => {
                let s = a.canonical_string();
                match &mut self.pending {
                    Some(text) => {
                        text.push(' ');
                        text.push_str(&s);
                    }
                    None => self.pending = Some(s),
                }
                Ok(())
            }
            XdmItem::Node(n) => {
                self.flush(b);
                copy_content_node(b, n)
            }
        }
    }

    fn flush(&mut self, b: &mut TreeBuilder) {
        if let Some(text) = self.pending.take() {
            b.text(&text);
        }
    }
}

fn copy_content_node(b: &mut TreeBuilder, node: &Node) -> Result<(), Error> {
    match node.kind() {
        NodeKind::Attribute => {
            if let Some(name) = node.name() {
                b.attribute(name.clone(), node.content().unwrap_or_default())?;
            }
            Ok(())
        }
        NodeKind::Element => b.copy_element_inheriting(node),
        _ => b.copy_of(node),
    }
}

/// Resolves the value of a computed constructor name expression.
///
/// A `xs:QName` is taken as is; a string or untyped value must be a lexical QName whose
/// prefix is bound in `namespaces` (`XQDY0074` otherwise).
pub fn resolve_constructor_name(items: &[XdmItem], namespaces: &NamespaceTable, role: NameRole) -> Result<QName, Error> {
    let atom = match items {
        [item] => item.atomize(),
        _ => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("constructor name must be a single atomic value, got {} items", items.len()),
            ));
        }
    };
    match atom {
        XdmAtomicValue::QName { ns_uri, prefix, local } => {
            Ok(QName::new(prefix.as_deref(), &local, ns_uri.as_deref()))
        }
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
            let invalid = |e: Error| Error::from_code(ErrorCode::XQDY0074, format!("invalid name '{s}': {}", e.message));
            let lexical = eqname::parse_eqname(&s).map_err(invalid)?;
            let expanded = namespaces.resolve(&lexical, role).map_err(invalid)?;
            Ok(QName::new(lexical.prefix(), &expanded.local, expanded.ns_uri.as_deref()))
        }
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("constructor name cannot be of type {}", other.type_name()),
        )),
    }
}

/// Target of a computed processing instruction.
pub fn resolve_pi_target(items: &[XdmItem]) -> Result<String, Error> {
    match items {
        [item] => match item.atomize() {
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
                let target = s.trim().to_string();
                if !is_ncname(&target) {
                    return Err(Error::from_code(ErrorCode::XQDY0041, format!("'{target}' is not a valid PI target")));
                }
                Ok(target)
            }
            other => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("PI target cannot be of type {}", other.type_name()),
            )),
        },
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "PI target must be a single value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> XdmItem {
        XdmAtomicValue::String(v.to_string()).into()
    }

    #[test]
    fn comment_joins_with_spaces() {
        let c = construct_comment(&[s("a"), XdmAtomicValue::Integer(1).into()]).unwrap();
        assert_eq!(c.kind(), NodeKind::Comment);
        assert_eq!(c.string_value(), "a 1");
        assert!(c.parent().is_none());
        assert_eq!(c.typed_value(), XdmAtomicValue::String("a 1".into()));
    }

    #[test]
    fn comment_rejects_double_hyphen_and_trailing_hyphen() {
        for bad in ["a--b", "a-", "-"] {
            let err = construct_comment(&[s(bad)]).unwrap_err();
            assert_eq!(err.code_enum(), ErrorCode::XQDY0072, "{bad}");
        }
        assert!(construct_comment(&[s("-a")]).is_ok());
        assert_eq!(construct_comment(&[]).unwrap().string_value(), "");
    }

    #[test]
    fn element_parts_do_not_join_atomics() {
        let el = construct_element(
            QName::local("e"),
            &[],
            &[vec![s("x")], vec![XdmAtomicValue::Integer(1).into(), XdmAtomicValue::Integer(2).into()], vec![s("y")]],
        )
        .unwrap();
        assert_eq!(el.string_value(), "x1 2y");
        assert_eq!(el.children().count(), 1);
    }

    #[test]
    fn attribute_after_content_is_rejected() {
        let attr = construct_attribute(QName::local("a"), "1").unwrap();
        let err = construct_element(QName::local("e"), &[], &[vec![s("x")], vec![attr.into()]]).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQTY0024);
    }

    #[test]
    fn namespace_nodes_precede_copied_attributes() {
        let k = construct_attribute(QName::new(Some("p"), "k", Some("urn:p")), "1").unwrap();
        let m = construct_attribute(QName::new(Some("q"), "m", Some("urn:q")), "2").unwrap();
        let el = construct_element(QName::local("e"), &[], &[vec![k.into()], vec![m.into()]]).unwrap();
        let prefixes: Vec<String> = el.namespaces().filter_map(|n| n.name().map(|q| q.local.to_string())).collect();
        assert!(prefixes.contains(&"p".to_string()) && prefixes.contains(&"q".to_string()), "{prefixes:?}");
        assert_eq!(el.attributes().count(), 2);
        assert!(el.namespaces().all(|n| el.attributes().all(|a| n.compare_document_order(&a).is_lt())));
    }

    #[test]
    fn pi_target_validation() {
        assert_eq!(construct_processing_instruction("XmL", &[]).unwrap_err().code_enum(), ErrorCode::XQDY0064);
        assert_eq!(
            construct_processing_instruction("t", &[s("a?>b")]).unwrap_err().code_enum(),
            ErrorCode::XQDY0026
        );
        let pi = construct_processing_instruction("t", &[s("  data ")]).unwrap();
        assert_eq!(pi.string_value(), "data ");
    }

    #[test]
    fn dynamic_name_with_unbound_prefix() {
        let err = resolve_constructor_name(&[s("nope:x")], &NamespaceTable::default(), NameRole::Element).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQDY0074);
    }
}
