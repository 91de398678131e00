use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use xqpath::{XdmItem, serialize_sequence};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ItemSummary {
    Node { kind: &'static str, name: Option<String>, xml: String },
    Atomic { xs_type: &'static str, value: String },
}

fn summarize(item: &XdmItem) -> Result<ItemSummary> {
    Ok(match item {
        XdmItem::Node(node) => ItemSummary::Node {
            kind: node.kind().as_str(),
            name: node.name().map(ToString::to_string),
            xml: serialize_sequence(std::slice::from_ref(item))?,
        },
        XdmItem::Atomic(value) => {
            ItemSummary::Atomic { xs_type: value.type_name(), value: value.canonical_string() }
        }
    })
}

fn colorize_markup(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |t| t.fg_rgb::<79, 166, 255>().to_string()).to_string()
}

fn colorize_value(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |t| t.fg_rgb::<136, 192, 74>().to_string()).to_string()
}

/// One line per item: nodes as XML markup, atomic values in canonical form.
pub(crate) fn render_text(items: &[XdmItem]) -> Result<String> {
    let mut output = String::new();
    for item in items {
        let rendered = serialize_sequence(std::slice::from_ref(item))?;
        let colored = match item {
            XdmItem::Node(_) => colorize_markup(&rendered),
            XdmItem::Atomic(_) => colorize_value(&rendered),
        };
        let _ = writeln!(&mut output, "{colored}");
    }
    Ok(output.trim_end().to_owned())
}

pub(crate) fn render_json(items: &[XdmItem]) -> Result<String> {
    let summaries = items.iter().map(summarize).collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string_pretty(&summaries)?)
}
