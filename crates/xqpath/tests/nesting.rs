use rstest::rstest;
use xqpath::parser::MAX_NESTING_DEPTH;
use xqpath::{DynamicContext, ErrorCode, compile_xquery, evaluate_expr, serialize_sequence};

fn on_stack<T: Send + 'static>(bytes: usize, f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new().stack_size(bytes).spawn(f).unwrap().join().unwrap()
}

fn nested(depth: usize, open: &str, core: &str, close: &str) -> String {
    format!("{}{core}{}", open.repeat(depth), close.repeat(depth))
}

#[rstest]
#[case::parentheses(nested(32, "(", "1", ")"), "1")]
#[case::arithmetic(nested(32, "(1 + ", "1", ")"), "33")]
#[case::predicates(nested(32, "(1, 2)[", "1", "]"), "1")]
#[case::calls(nested(32, "count((", "1", "))"), "1")]
#[case::conditionals(nested(32, "if (true()) then (", "'y'", ") else ()"), "y")]
#[case::simple_maps(nested(32, "(1 ! (", ". + 1", "))"), "2")]
fn nested_queries_run_on_a_small_stack(#[case] query: String, #[case] expected: &str) {
    let out = on_stack(2 << 20, move || {
        compile_xquery(&query).map(|_| ())?;
        serialize_sequence(&evaluate_expr(&query, &DynamicContext::default())?)
    });
    assert_eq!(out.unwrap(), expected);
}

#[rstest]
fn nesting_at_the_limit_is_accepted() {
    let query = nested(MAX_NESTING_DEPTH, "(", "1", ")");
    let result = on_stack(256 << 20, move || compile_xquery(&query).map(|_| ()));
    assert!(result.is_ok(), "{result:?}");
}

#[rstest]
#[case::parentheses(nested(MAX_NESTING_DEPTH + 1, "(", "1", ")"))]
#[case::predicates(nested(MAX_NESTING_DEPTH + 1, "(1)[", "1", "]"))]
#[case::constructors(nested(MAX_NESTING_DEPTH + 1, "<e>", "", "</e>"))]
fn excessive_nesting_is_a_syntax_error(#[case] query: String) {
    let err = on_stack(256 << 20, move || compile_xquery(&query).map(|_| ()).unwrap_err());
    assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    assert!(err.to_string().contains("nesting"), "{err}");
}
