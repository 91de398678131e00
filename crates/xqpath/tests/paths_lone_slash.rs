use rstest::{fixture, rstest};
use xqpath::model::xml::parse_document;
use xqpath::{
    DynamicContextBuilder, Error, ErrorCode, ExpandedName, Node, StaticContextBuilder, XdmItem, XdmSequence,
    compile_xquery_with_context, evaluate, serialize_sequence,
};

#[fixture]
fn doc() -> Node {
    parse_document("<a>123</a>").unwrap()
}

/// Evaluates against the document `<a>123</a>` with `$a` bound to its element.
fn run(doc: &Node, query: &str) -> Result<XdmSequence, Error> {
    let a = doc.children().next().unwrap();
    let static_ctx = StaticContextBuilder::new().with_variable(ExpandedName::local("a")).build();
    let compiled = compile_xquery_with_context(query, &static_ctx)?;
    let dyn_ctx = DynamicContextBuilder::new()
        .with_context_item(doc.clone())
        .with_variable(ExpandedName::local("a"), vec![XdmItem::Node(a)])
        .build();
    evaluate(&compiled, &dyn_ctx)
}

#[rstest]
#[case("/*", "<a>123</a>")]
#[case("/<a/>", "<a/>")]
#[case(r#"/<a div="3"/>"#, r#"<a div="3"/>"#)]
#[case("/unordered{a}", "<a>123</a>")]
#[case("/=$a", "true")]
#[case("/max(a)", "123")]
#[case("/-5", "118")]
#[case("5*/", "615")]
#[case("(/)*5", "615")]
#[case("(/)<a", "false")]
#[case("/ <= $a", "true")]
#[case("count(.[/<a/>])", "1")]
#[case("count(.[/])", "1")]
fn rooted_path_parses(doc: Node, #[case] query: &str, #[case] expected: &str) {
    let result = run(&doc, query).unwrap();
    assert_eq!(serialize_sequence(&result).unwrap(), expected, "{query}");
}

#[rstest]
#[case("/ * 5")]
#[case("/<a")]
#[case("/<5")]
#[case("/</b")]
#[case("/<a div 3")]
#[case("/ is $a")]
#[case("///")]
#[case("(/)/(//)/foo")]
#[case(".[/ * 5]")]
fn lone_slash_followed_by_path_start_is_syntax_error(doc: Node, #[case] query: &str) {
    let err = run(&doc, query).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0003, "{query}: {err}");
}

#[rstest]
fn lone_slash_selects_document(doc: Node) {
    let result = run(&doc, "/").unwrap();
    assert_eq!(result, vec![XdmItem::Node(doc)]);
}
