use rstest::{fixture, rstest};
use xqpath::model::xml::parse_document;
use xqpath::{DynamicContext, DynamicContextBuilder, ErrorCode, XdmAtomicValue, XdmItem, evaluate_expr, serialize_sequence};

#[fixture]
fn ctx() -> DynamicContext {
    let doc = parse_document(r#"<r><!--c--><a id="1"><b/>t</a><a id="2"/></r>"#).unwrap();
    DynamicContextBuilder::new().with_context_item(doc).build()
}

fn count(ctx: &DynamicContext, query: &str) -> i64 {
    match evaluate_expr(&format!("count({query})"), ctx).unwrap().as_slice() {
        [XdmItem::Atomic(XdmAtomicValue::Integer(n))] => *n,
        other => panic!("unexpected count result {other:?}"),
    }
}

fn text(ctx: &DynamicContext, query: &str) -> String {
    serialize_sequence(&evaluate_expr(query, ctx).unwrap()).unwrap()
}

fn error(ctx: &DynamicContext, query: &str) -> ErrorCode {
    evaluate_expr(query, ctx).unwrap_err().code_enum()
}

#[rstest]
fn union_and_except_follow_parenthesization(ctx: DynamicContext) {
    assert_eq!(count(&ctx, "//node()"), 6);
    assert_eq!(count(&ctx, "(//node() | //node()) except //comment()"), 5);
    assert_eq!(count(&ctx, "//node() | (//node() except //comment())"), 6);
}

#[rstest]
fn union_returns_document_order_without_duplicates(ctx: DynamicContext) {
    assert_eq!(text(&ctx, "string-join((//a[2], //b, //a[1])/@id, ',')"), "1,2");
    assert_eq!(text(&ctx, "string-join((//a[2] | //a[1] | //a[2])/@id, ',')"), "1,2");
    assert_eq!(text(&ctx, "string-join((//a intersect //a[@id = '2'])/@id, ',')"), "2");
}

#[rstest]
fn path_results_are_sorted_and_deduplicated(ctx: DynamicContext) {
    assert_eq!(count(&ctx, "//a/.."), 1);
    assert_eq!(count(&ctx, "//b/ancestor::*"), 2);
    assert_eq!(text(&ctx, "string-join(//b/ancestor-or-self::*/name(), ' ')"), "r a b");
}

#[rstest]
fn atomic_path_results_are_concatenated(ctx: DynamicContext) {
    assert_eq!(count(&ctx, "(<a/>, <!--c-->)/3"), 2);
    assert_eq!(text(&ctx, "//a/string(@id)"), "1 2");
}

#[rstest]
fn mixed_path_result_is_type_error(ctx: DynamicContext) {
    let q = "let $doc := document { 'x' } return $doc/text()/(<e/>, (), 1, <e/>)";
    assert_eq!(error(&ctx, q), ErrorCode::XPTY0018);
}

#[rstest]
#[case("(1, 2)/a", ErrorCode::XPTY0019)]
#[case("(//a, 1)/b", ErrorCode::XPTY0019)]
#[case("(1, 2)/(.)", ErrorCode::XPTY0019)]
#[case("//a | 1", ErrorCode::XPTY0004)]
#[case("1 except //a", ErrorCode::XPTY0004)]
fn non_node_operands_are_rejected(ctx: DynamicContext, #[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(error(&ctx, query), code, "{query}");
}

#[rstest]
fn context_item_must_be_a_node() {
    let ctx = DynamicContextBuilder::new().with_context_item(XdmAtomicValue::Integer(1)).build();
    assert_eq!(error(&ctx, "a"), ErrorCode::XPTY0020);
    assert_eq!(error(&ctx, "/"), ErrorCode::XPTY0020);
}

#[rstest]
fn absent_focus_is_dynamic_error() {
    let ctx = DynamicContext::default();
    assert_eq!(error(&ctx, "a"), ErrorCode::XPDY0002);
    assert_eq!(error(&ctx, "/"), ErrorCode::XPDY0002);
    assert_eq!(error(&ctx, "."), ErrorCode::XPDY0002);
}

#[rstest]
fn root_must_be_a_document(ctx: DynamicContext) {
    assert_eq!(error(&ctx, "<e><f/></e>/f/(/)"), ErrorCode::XPDY0050);
    assert_eq!(error(&ctx, "<e><f/></e>/f/(//x)"), ErrorCode::XPDY0050);
}

#[rstest]
fn context_item_in_function_body_is_absent(ctx: DynamicContext) {
    let q = "declare function local:f() { a }; local:f()";
    assert_eq!(error(&ctx, q), ErrorCode::XPDY0002);
    let q = "declare function local:g() { position() }; local:g()";
    assert_eq!(error(&ctx, q), ErrorCode::XPDY0002);
}

#[rstest]
fn double_slash_expands_to_descendant_or_self(ctx: DynamicContext) {
    assert_eq!(count(&ctx, "//a//b"), 1);
    assert_eq!(count(&ctx, "/descendant-or-self::node()/child::a"), 2);
    assert_eq!(count(&ctx, "//@id"), 2);
}

#[rstest]
#[case("/r/a ! string(@id)", "1 2")]
#[case("/r/a[1]/b[1]/preceding::node() ! 1", "1")]
#[case("(3, 1, 3) ! (. * 2)", "6 2 6")]
#[case("(//a, //a) ! name()", "a a a a")]
#[case("(//a[2], //a[1]) ! string(@id)", "2 1")]
#[case("element {'Q{urn:z}e'} {} ! namespace-uri(.)", "urn:z")]
#[case("(7, 8) ! (position(), last())", "1 2 2 2")]
#[case("//a ! (b, @id) ! name()", "b id id")]
#[case("/ ! count(//a)", "2")]
#[case("3 != 3 ! 4", "true")]
#[case("1 != 2", "true")]
fn simple_map_keeps_order_and_duplicates(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(text(&ctx, query), expected, "{query}");
}

#[rstest]
fn simple_map_allows_mixed_results(ctx: DynamicContext) {
    assert_eq!(count(&ctx, "//a ! (., 1)"), 4);
    assert_eq!(count(&ctx, "() ! 1"), 0);
    assert_eq!(error(&ctx, "(1, 2) ! a"), ErrorCode::XPTY0020);
}
