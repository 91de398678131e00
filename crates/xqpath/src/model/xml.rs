//! Loading XML text into the node model.

use super::{Node, QName, TreeBuilder};
use crate::engine::runtime::{Error, ErrorCode};

/// Parses an XML document into a new tree and returns its document node.
///
/// Whitespace-only text is preserved; DTDs are accepted and their entities expanded.
pub fn parse_document(text: &str) -> Result<Node, Error> {
    parse_document_with_base(text, None)
}

pub fn parse_document_with_base(text: &str, base_uri: Option<&str>) -> Result<Node, Error> {
    let options = roxmltree::ParsingOptions { allow_dtd: true, ..roxmltree::ParsingOptions::default() };
    let document = roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| Error::from_code(ErrorCode::FODC0002, format!("XML parse error: {e}")))?;

    let mut builder = TreeBuilder::new();
    if let Some(uri) = base_uri {
        builder = builder.with_base_uri(uri);
    }
    builder.start_document();
    for child in document.root().children() {
        copy_node(&mut builder, child);
    }
    builder.end_document();
    let root = builder.finish();
    tracing::debug!(nodes = root.tree().len(), "parsed XML document");
    Ok(root)
}

fn copy_node(b: &mut TreeBuilder, node: roxmltree::Node<'_, '_>) {
    match node.node_type() {
        roxmltree::NodeType::Element => {
            let tag = node.tag_name();
            let source = node.document().input_text();
            let start = node.range().start + 1;
            let written = source
                .get(start..)
                .and_then(|rest| rest.split(|c: char| c.is_whitespace() || c == '/' || c == '>').next());
            let prefix = tag
                .namespace()
                .and_then(|uri| written_prefix(written, tag.name()).unwrap_or_else(|| node.lookup_prefix(uri)));
            b.start_element(QName::new(prefix, tag.name(), tag.namespace()));

            let inherited = node.parent_element().map(|p| p.namespaces().collect::<Vec<_>>()).unwrap_or_default();
            for ns in node.namespaces() {
                let redeclared = inherited.iter().any(|p| p.name() == ns.name() && p.uri() == ns.uri());
                if !redeclared && ns.name() != Some("xml") {
                    b.append_namespace(ns.name(), ns.uri());
                }
            }
            for attr in node.attributes() {
                let written = source.get(attr.range_qname());
                let prefix = attr
                    .namespace()
                    .and_then(|uri| written_prefix(written, attr.name()).unwrap_or_else(|| node.lookup_prefix(uri)));
                b.append_attribute(QName::new(prefix, attr.name(), attr.namespace()), attr.value());
            }
            for child in node.children() {
                copy_node(b, child);
            }
            b.end_element();
        }
        roxmltree::NodeType::Text => b.text(node.text().unwrap_or_default()),
        roxmltree::NodeType::Comment => b.comment(node.text().unwrap_or_default()),
        roxmltree::NodeType::PI => {
            if let Some(pi) = node.pi() {
                b.processing_instruction(pi.target, pi.value.unwrap_or_default());
            }
        }
        roxmltree::NodeType::Root => {
            for child in node.children() {
                copy_node(b, child);
            }
        }
    }
}

/// Prefix of a qualified name as written in the source, when its local part is `local`.
///
/// Several prefixes may bind the same URI, so the written one wins over a lookup by URI.
/// Names produced by entity expansion have no matching source text and yield `None`.
fn written_prefix<'s>(written: Option<&'s str>, local: &str) -> Option<Option<&'s str>> {
    let written = written?;
    match written.split_once(':') {
        Some((prefix, name)) => (name == local).then_some(Some(prefix)),
        None => (written == local).then_some(None),
    }
}
