use rstest::rstest;
use xqpath::{DynamicContext, ErrorCode, XdmAtomicValue, XdmItem, evaluate_expr, serialize_sequence};

fn eval(query: &str) -> Result<String, xqpath::Error> {
    let result = evaluate_expr(query, &DynamicContext::default())?;
    serialize_sequence(&result)
}

#[rstest]
#[case("comment {'com', '-', '-', 'ment'}", "<!--com - - ment-->")]
#[case("comment {()}", "<!---->")]
#[case("comment {}", "<!---->")]
#[case("comment {'a', 1, 2.5}", "<!--a 1 2.5-->")]
#[case("comment {<e>in<f>ner</f></e>}", "<!--inner-->")]
#[case("comment {'a'}, comment {'b'}", "<!--a--><!--b-->")]
#[case("comment {'-a'}", "<!---a-->")]
fn builds_space_joined_comments(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query).unwrap(), expected);
}

#[rstest]
#[case("comment {'comment-'}")]
#[case("comment {'-'}")]
#[case("comment {'a--b'}")]
#[case("comment {'a', 'b-'}")]
#[case("comment {concat('a-', '-b')}")]
fn rejects_invalid_comment_content(#[case] query: &str) {
    let err = eval(query).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XQDY0072, "{query}");
}

#[rstest]
#[case("comment name {'x'}")]
#[case("comment {'x'} {'y'}")]
#[case("<!-- a -- b -->")]
fn malformed_comments_are_syntax_errors(#[case] query: &str) {
    let err = eval(query).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0003, "{query}");
}

#[rstest]
fn constructed_comment_is_parentless_with_string_value() {
    let ctx = DynamicContext::default();
    let result = evaluate_expr("let $c := comment {'note'} return (count($c/..), data($c))", &ctx).unwrap();
    assert_eq!(
        result,
        vec![
            XdmItem::Atomic(XdmAtomicValue::Integer(0)),
            XdmItem::Atomic(XdmAtomicValue::String("note".into())),
        ]
    );
    assert_eq!(eval("comment {'note'} instance of comment()").unwrap(), "true");
    assert_eq!(eval("string(<e>{comment {'x'}}</e>)").unwrap(), "");
}
