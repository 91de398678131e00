use rstest::{fixture, rstest};
use xqpath::model::xml::parse_document;
use xqpath::{DynamicContext, DynamicContextBuilder, evaluate_expr, serialize_sequence};

const DOC: &str = r#"<lib xmlns:x="urn:x"><shelf n="1"><book id="a"/><book id="b"/><?pi data?></shelf><shelf n="2"><book id="c"/><!--gap--><book id="d" x:lang="en"/></shelf></lib>"#;

#[fixture]
fn ctx() -> DynamicContext {
    DynamicContextBuilder::new().with_context_item(parse_document(DOC).unwrap()).build()
}

fn eval(ctx: &DynamicContext, query: &str) -> String {
    let result = evaluate_expr(query, ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    serialize_sequence(&result).unwrap()
}

#[rstest]
#[case("string-join(//book/@id, '')", "abcd")]
#[case("string-join(/lib/shelf[2]/book/@id, '')", "cd")]
#[case("string-join(//book[@id = 'c']/following::book/@id, '')", "d")]
#[case("string-join(//book[@id = 'c']/preceding::book/@id, '')", "ab")]
#[case("string-join(//book[@id = 'b']/following-sibling::node()/name(), ',')", "pi")]
#[case("string-join(//book[@id = 'd']/preceding-sibling::*/@id, '')", "c")]
#[case("count(//book[@id = 'd']/ancestor::node())", "3")]
#[case("count(/descendant::node())", "9")]
#[case("count(//shelf/self::shelf)", "2")]
#[case("count(//shelf/self::book)", "0")]
fn forward_and_reverse_axes(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("string(//book[@id = 'd']/preceding::book[1]/@id)", "c")]
#[case("string(//book[@id = 'd']/preceding::book[last()]/@id)", "a")]
#[case("string(//book[@id = 'd']/ancestor::*[1]/@n)", "2")]
#[case("name(//book[@id = 'd']/ancestor::*[2])", "lib")]
#[case("string((//book)[1]/@id)", "a")]
#[case("string((//book[@id = 'd']/preceding::book)[1]/@id)", "a")]
fn reverse_axis_predicates_count_from_the_context_node(
    ctx: DynamicContext,
    #[case] query: &str,
    #[case] expected: &str,
) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
#[case("string-join(//book[last()]/@id, '')", "bd")]
#[case("string-join(//book[position() > 1]/@id, '')", "bd")]
#[case("string-join((//book)[position() > 1]/@id, '')", "bcd")]
#[case("string-join(//book[@id][2]/@id, '')", "bd")]
#[case("string-join(//shelf[book/@id = 'c']/@n, '')", "2")]
#[case("string-join(//book[1.0]/@id, '')", "ac")]
#[case("count(//book[0])", "0")]
fn predicates_filter_per_step(ctx: DynamicContext, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&ctx, query), expected);
}

#[rstest]
fn attribute_axis_only_matches_attributes(ctx: DynamicContext) {
    assert_eq!(eval(&ctx, "count(//book/attribute::*)"), "5");
    assert_eq!(eval(&ctx, "count(//book/@*:lang)"), "1");
    assert_eq!(eval(&ctx, "string(//book/@Q{urn:x}lang)"), "en");
    assert_eq!(eval(&ctx, "count(//@id/..)"), "4");
    assert_eq!(eval(&ctx, "count(//@id/following-sibling::node())"), "0");
}

#[rstest]
fn namespace_axis_lists_declarations(ctx: DynamicContext) {
    assert_eq!(eval(&ctx, "count(/lib/namespace::x)"), "1");
    assert_eq!(eval(&ctx, "string(/lib/namespace::x)"), "urn:x");
    assert_eq!(eval(&ctx, "count(/lib/shelf/namespace::*)"), "0");
    assert_eq!(eval(&ctx, "count(/lib/shelf/child::x)"), "0");
}

#[rstest]
fn kind_tests_select_by_node_kind(ctx: DynamicContext) {
    assert_eq!(eval(&ctx, "count(//comment())"), "1");
    assert_eq!(eval(&ctx, "count(//processing-instruction(pi))"), "1");
    assert_eq!(eval(&ctx, "count(//processing-instruction('other'))"), "0");
    assert_eq!(eval(&ctx, "count(//element(book))"), "4");
    assert_eq!(eval(&ctx, "count(//attribute(id))"), "4");
    assert_eq!(eval(&ctx, "count(self::document-node(element(lib)))"), "1");
    assert_eq!(eval(&ctx, "count(//text())"), "0");
}

#[rstest]
fn stacked_predicates_renumber_after_each_filter() {
    let staff = r#"<staff>
        <employee name="Jane" gender="female"/>
        <employee name="John" gender="male"/>
        <employee name="Ann" gender="female"/>
        <employee name="Bob" gender="male"/>
        <employee name="Carl" gender="male"/>
        <employee name="Eve" gender="female"/>
        <employee name="Lisa" gender="female"/>
        <employee name="Tina" gender="female"/>
    </staff>"#;
    let ctx = DynamicContextBuilder::new().with_context_item(parse_document(staff).unwrap()).build();
    assert_eq!(eval(&ctx, r#"string(//employee[5][@gender = "female"]/@name)"#), "");
    assert_eq!(eval(&ctx, r#"string(//employee[@gender = "female"][5]/@name)"#), "Tina");
    assert_eq!(eval(&ctx, r#"string(//employee[@gender = "female"][last()]/@name)"#), "Tina");
    assert_eq!(eval(&ctx, r#"string(//employee[6][@gender = "female"]/@name)"#), "Eve");
}
