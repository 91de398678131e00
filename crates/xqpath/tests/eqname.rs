use rstest::{fixture, rstest};
use xqpath::model::xml::parse_document;
use xqpath::{DynamicContext, DynamicContextBuilder, ErrorCode, evaluate_expr, serialize_sequence};

#[fixture]
fn ctx() -> DynamicContext {
    let doc = parse_document(r#"<r xmlns:p="urn:p"><p:a p:k="1" k="2"/><a/><p:b/></r>"#).unwrap();
    DynamicContextBuilder::new().with_context_item(doc).build()
}

fn eval(ctx: &DynamicContext, query: &str) -> String {
    let result = evaluate_expr(query, ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    serialize_sequence(&result).unwrap()
}

fn error(ctx: &DynamicContext, query: &str) -> ErrorCode {
    evaluate_expr(query, ctx).expect_err(query).code_enum()
}

#[rstest]
#[case("namespace-uri(element Q{ http://x/ ns }local {})", "http://x/ ns")]
#[case("namespace-uri(element Q{urn:&#x2D;a&#45;b}e {})", "urn:-a-b")]
#[case("namespace-uri(element Q{urn:&amp;}e {})", "urn:&amp;")]
#[case("namespace-uri(element Q{}e {})", "")]
#[case("local-name(attribute Q{urn:x}at {'v'})", "at")]
fn braced_uris_are_expanded_and_collapsed(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("count(/r/Q{urn:p}a)", "1")]
#[case("count(/r/Q{urn:p}*)", "2")]
#[case("count(/r/Q{}*)", "1")]
#[case("count(/r/*:a)", "2")]
#[case("declare namespace q = 'urn:p'; count(/r/q:*)", "2")]
#[case("count(//@Q{}*)", "1")]
#[case("count(//@Q{urn:p}k)", "1")]
#[case("count(//@*:k)", "2")]
#[case("declare default element namespace 'urn:p'; count(/Q{}r/a)", "1")]
#[case("declare default element namespace 'urn:p'; count(//@k)", "1")]
fn name_tests_resolve_eqnames(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("declare variable $Q{urn:v}x := 3; $Q{urn:v}x + 1", "4")]
#[case("declare namespace v = 'urn:v'; declare variable $v:x := 3; $Q{urn:v}x", "3")]
#[case("declare function Q{urn:f}double($n) { $n * 2 }; Q{urn:f}double(4)", "8")]
#[case("Q{http://www.w3.org/2005/xpath-functions}count((1, 2))", "2")]
#[case("5 instance of Q{http://www.w3.org/2001/XMLSchema}integer", "true")]
#[case("'5' cast as Q{http://www.w3.org/2001/XMLSchema}integer", "5")]
#[case("(# Q{urn:ext}hint some content #) { 1 + 1 }", "2")]
#[case("declare option Q{urn:o}opt 'on'; 1", "1")]
#[case("let $Q{}v := 7 return $v", "7")]
fn eqnames_bind_every_kind_of_name(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("undeclared:x")]
#[case("count(/r/p:*)")]
#[case("$nope:x")]
#[case("nope:f()")]
#[case("(# hint #) { 1 }")]
#[case("element nope:e {}")]
#[case("1 instance of nope:t")]
fn unbound_prefixes_are_static_errors(ctx: DynamicContext, #[case] query: &str) {
    assert_eq!(error(&ctx, query), ErrorCode::XPST0081, "{query}");
}

#[rstest]
#[case("Q{urn:a}:b")]
#[case("<Q{urn:a}b/>")]
#[case("$Q{urn:{a}b")]
#[case("Q{urn:a")]
#[case("element Q{urn:a}:b {}")]
fn malformed_eqnames_are_syntax_errors(ctx: DynamicContext, #[case] query: &str) {
    assert_eq!(error(&ctx, query), ErrorCode::XPST0003, "{query}");
}

#[rstest]
#[case(r#"<r xmlns:a="urn:x" xmlns:b="urn:x"><b:e b:k="1"/></r>"#, "b:e b:k")]
#[case(r#"<r xmlns:b="urn:x" xmlns:a="urn:x"><a:e a:k="1"/></r>"#, "a:e a:k")]
#[case(r#"<r xmlns:a="urn:x"><a:e xmlns:b="urn:x" a:k="1"/></r>"#, "a:e a:k")]
fn parsed_names_keep_their_written_prefix(#[case] xml: &str, #[case] expected: &str) {
    let doc = parse_document(xml).unwrap();
    let ctx = DynamicContextBuilder::new().with_context_item(doc).build();
    assert_eq!(eval(&ctx, "name(/r/*), name(/r/*/@*)"), expected);
}

#[rstest]
fn default_namespace_element_stays_unprefixed() {
    let doc = parse_document(r#"<e xmlns="urn:x" xmlns:p="urn:x"><p:f/></e>"#).unwrap();
    let ctx = DynamicContextBuilder::new().with_context_item(doc).build();
    assert_eq!(eval(&ctx, "name(/*), name(/*/*)"), "e p:f");
}

#[rstest]
fn copied_prefixed_attribute_follows_its_namespace_node(ctx: DynamicContext) {
    let query = "declare namespace p = 'urn:p'; \
                 let $e := element e { <x xmlns:p=\"urn:p\" p:k=\"1\"/>/@p:k } \
                 return ($e/namespace::p << $e/@p:k, count($e/@*))";
    assert_eq!(eval(&ctx, query), "true 1");
}
