use rstest::rstest;
use xqpath::{
    DynamicContext, DynamicContextBuilder, ErrorCode, ExpandedName, XdmAtomicValue, evaluate_expr, serialize_sequence,
};

fn eval_with(ctx: &DynamicContext, query: &str) -> Result<String, xqpath::Error> {
    serialize_sequence(&evaluate_expr(query, ctx)?)
}

fn eval(query: &str) -> String {
    eval_with(&DynamicContext::default(), query).unwrap_or_else(|e| panic!("{query}: {e}"))
}

fn error(query: &str) -> ErrorCode {
    evaluate_expr(query, &DynamicContext::default()).expect_err(query).code_enum()
}

#[rstest]
#[case(
    "declare function local:fact($n as xs:integer) as xs:integer {
        if ($n le 1) then 1 else $n * local:fact($n - 1)
    };
    local:fact(10)",
    "3628800"
)]
#[case(
    "declare function local:even($n) { if ($n = 0) then true() else local:odd($n - 1) };
    declare function local:odd($n) { if ($n = 0) then false() else local:even($n - 1) };
    (local:even(10), local:odd(7))",
    "true true"
)]
#[case("declare function local:pair($a, $b) { ($b, $a) }; local:pair(1, 'x')", "x 1")]
#[case("declare function local:twice($s as xs:string) { $s || $s }; local:twice(<e>ab</e>)", "abab")]
#[case("declare function local:f() { 1 }; declare function local:f($x) { $x }; local:f() + local:f(2)", "3")]
fn user_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query), expected);
}

#[rstest]
fn runaway_recursion_is_bounded() {
    let q = "declare function local:loop($n) { local:loop($n + 1) }; local:loop(0)";
    let code = std::thread::Builder::new()
        .stack_size(512 << 20)
        .spawn(move || error(q))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(code, ErrorCode::FOER0000);
}

#[rstest]
fn deep_recursion_below_the_limit_completes() {
    let q = "declare function local:down($n) { if ($n = 0) then 'done' else local:down($n - 1) }; local:down(900)";
    let out = std::thread::Builder::new().stack_size(512 << 20).spawn(move || eval(q)).unwrap().join().unwrap();
    assert_eq!(out, "done");
}

#[rstest]
#[case("declare variable $x := 2; declare variable $y := $x * 3; $y", "6")]
#[case("declare variable $x as xs:double := 1; $x instance of xs:double", "true")]
#[case("declare variable $x external := 5; $x", "5")]
#[case("declare namespace n = 'urn:n'; declare variable $n:v := 'nv'; $n:v", "nv")]
fn prolog_variables(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query), expected);
}

#[rstest]
fn external_variables_take_supplied_values() {
    let ctx = DynamicContextBuilder::new()
        .with_variable(ExpandedName::local("x"), vec![XdmAtomicValue::Integer(21).into()])
        .build();
    assert_eq!(eval_with(&ctx, "declare variable $x external; $x * 2").unwrap(), "42");
    assert_eq!(eval_with(&ctx, "declare variable $x external := 5; $x").unwrap(), "21");
    let err = evaluate_expr("declare variable $x external; $x", &DynamicContext::default()).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPDY0002);
}

#[rstest]
#[case("declare default decimal-format grouping-separator=\"'\"; format-number(1234567, \"#'##0\")", "1'234'567")]
#[case(
    "declare decimal-format local:eu decimal-separator=',' grouping-separator='.';
    format-number(1234.5, '#.##0,00', 'local:eu')",
    "1.234,50"
)]
#[case(
    "declare decimal-format Q{urn:f}pm per-mille='‰' NaN='none';
    (format-number(0.125, '0‰', 'Q{urn:f}pm'), format-number(number('x'), '0', 'Q{urn:f}pm'))",
    "125‰ none"
)]
#[case("format-number(-1234.567, '#,##0.0')", "-1,234.6")]
fn decimal_formats(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query), expected);
}

#[rstest]
#[case("declare variable $x := 1; declare variable $x := 2; $x", ErrorCode::XQST0049)]
#[case("declare function f() { 1 }; f()", ErrorCode::XQST0060)]
#[case("declare function local:f($a, $a) { $a }; local:f(1, 2)", ErrorCode::XQST0039)]
#[case("declare namespace xml = 'urn:x'; 1", ErrorCode::XQST0070)]
#[case("declare namespace a = 'urn:a'; declare namespace a = 'urn:b'; 1", ErrorCode::XQST0033)]
#[case("declare decimal-format local:d zero-digit='0'; declare decimal-format local:d zero-digit='0'; 1", ErrorCode::XQST0111)]
#[case("format-number(1, '0', 'local:missing')", ErrorCode::FODF1280)]
#[case("format-number(1, '0.0.0')", ErrorCode::FODF1310)]
#[case("local:undefined()", ErrorCode::XPST0017)]
#[case("count(1, 2)", ErrorCode::XPST0017)]
#[case("$undeclared", ErrorCode::XPST0008)]
#[case("declare variable $x as xs:integer := 'a'; $x", ErrorCode::XPTY0004)]
#[case("xquery version '9.0'; 1", ErrorCode::XQST0031)]
fn prolog_errors(#[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(error(query), code, "{query}");
}
