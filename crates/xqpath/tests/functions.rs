use rstest::{fixture, rstest};
use xqpath::model::xml::parse_document;
use xqpath::{DynamicContext, DynamicContextBuilder, ErrorCode, evaluate_expr, serialize_sequence};

#[fixture]
fn ctx() -> DynamicContext {
    let doc = parse_document(r#"<r xmlns:p="urn:p"><p:a>1</p:a><b><c>2</c></b></r>"#).unwrap();
    DynamicContextBuilder::new().with_context_item(doc).build()
}

fn eval(ctx: &DynamicContext, query: &str) -> String {
    let result = evaluate_expr(query, ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    serialize_sequence(&result).unwrap()
}

#[rstest]
#[case("string-length('héllo')", "5")]
#[case("normalize-space('  a \t b ')", "a b")]
#[case("substring('12345', 1.5, 2.6)", "234")]
#[case("substring('12345', 3)", "345")]
#[case("translate('bar', 'abc', 'ABC')", "BAr")]
#[case("upper-case('ab') || lower-case('CD')", "ABcd")]
#[case("tokenize(' a b  c ')", "a b c")]
#[case("string-join(('a', 'b', 'c'), '-')", "a-b-c")]
#[case("substring-before('tattoo', 'attoo') || substring-after('tattoo', 'tat')", "ttoo")]
#[case("compare('a', 'b'), codepoint-equal('x', 'x')", "-1 true")]
#[case("codepoints-to-string((72, 105)), string-to-codepoints('Hi')", "Hi 72 105")]
#[case("contains('abc', ''), starts-with('abc', 'ab'), ends-with('abc', 'bc')", "true true true")]
#[case("concat('a', 1, (), 'b')", "a1b")]
fn string_functions(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("sum((1, 2, 3)), sum(())", "6 0")]
#[case("avg((1, 2))", "1.5")]
#[case("max((1, 3, 2)), min(('b', 'a'))", "3 a")]
#[case("round(2.5), round(-2.5), round-half-to-even(2.5)", "3 -2 2")]
#[case("round(3.14159, 2)", "3.14")]
#[case("floor(-1.5), ceiling(1.2), abs(-3)", "-2 2 3")]
#[case("number('12'), number('x')", "12 NaN")]
#[case("sum(//c) + sum(/r/*:a)", "3")]
fn numeric_functions(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("reverse((1, 2, 3))", "3 2 1")]
#[case("subsequence((1, 2, 3, 4), 2, 2)", "2 3")]
#[case("index-of((1, 2, 1), 1)", "1 3")]
#[case("insert-before((1, 3), 2, 2)", "1 2 3")]
#[case("remove((1, 2, 3), 2)", "1 3")]
#[case("count(distinct-values((1, 2, 1.0, 'x', 'x')))", "3")]
#[case("head((4, 5)), tail((4, 5, 6))", "4 5 6")]
#[case("empty(()), exists(()), count(())", "true false 0")]
#[case("deep-equal(<a x='1'>t</a>, <a x='1'>t</a>), deep-equal((1, 2), (2, 1))", "true false")]
#[case("exactly-one(1), zero-or-one(()), one-or-more((1, 2))", "1 1 2")]
fn sequence_functions(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("name(/r/*[1]), local-name(/r/*[1]), namespace-uri(/r/*[1])", "p:a a urn:p")]
#[case("root(//c) is /, has-children(/r), has-children(//c/text())", "true true false")]
#[case("string-join(innermost(//*)/name(), ' ')", "p:a c")]
#[case("string-join(outermost(//*)/name(), ' ')", "r")]
#[case("count(parse-xml('<x><y/><y/></x>')/x/y)", "2")]
#[case("string(/r/b)", "2")]
#[case("data(/r/b) instance of xs:untypedAtomic", "true")]
fn node_functions(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("local-name-from-QName(QName('urn:a', 'p:l')), prefix-from-QName(QName('urn:a', 'p:l'))", "l p")]
#[case("namespace-uri-from-QName(QName('urn:a', 'l'))", "urn:a")]
#[case("namespace-uri-from-QName(resolve-QName('p:x', /r))", "urn:p")]
#[case("'p' = in-scope-prefixes(/r), 'xml' = in-scope-prefixes(/r)", "true true")]
#[case("namespace-uri-for-prefix('p', /r/b)", "urn:p")]
#[case("node-name(/r/*[1]) eq QName('urn:p', 'other:a')", "true")]
fn qname_functions(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("error()", ErrorCode::FOER0000)]
#[case("error(QName('http://www.w3.org/2005/xqt-errors', 'err:FORG0001'), 'bad')", ErrorCode::FORG0001)]
#[case("error(QName('urn:app', 'app:oops'), 'custom')", ErrorCode::Unknown)]
#[case("exactly-one((1, 2))", ErrorCode::FORG0005)]
#[case("zero-or-one((1, 2))", ErrorCode::FORG0003)]
#[case("one-or-more(())", ErrorCode::FORG0004)]
#[case("boolean((1, 2))", ErrorCode::FORG0006)]
#[case("parse-xml('<x>')", ErrorCode::FODC0006)]
#[case("codepoints-to-string(0)", ErrorCode::FOCH0001)]
fn function_errors(ctx: DynamicContext, #[case] query: &str, #[case] code: ErrorCode) {
    let err = evaluate_expr(query, &ctx).expect_err(query);
    assert_eq!(err.code_enum(), code, "{query}: {err}");
}

#[rstest]
fn trace_returns_its_input(ctx: DynamicContext) {
    assert_eq!(eval(&ctx, "trace((1, 2), 'label')"), "1 2");
}
