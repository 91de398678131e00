use crate::consts::FNS;
use crate::engine::runtime::FunctionRegistry;
use std::sync::{Arc, OnceLock};

pub mod boolean;
mod common;
pub mod diagnostics;
pub mod format;
pub mod nodes;
pub mod numeric;
pub mod qnames;
pub mod sequences;
pub mod strings;

fn register_default_functions(reg: &mut FunctionRegistry) {
    macro_rules! reg_ns {
        ($local:expr, $arity:expr, $func:expr $(,)?) => {
            reg.register_ns(FNS, $local, $arity, $func)
        };
    }
    macro_rules! reg_ns_range {
        ($local:expr, $min:expr, $max:expr, $func:expr $(,)?) => {
            reg.register_ns_range(FNS, $local, $min, $max, $func)
        };
    }
    macro_rules! reg_ns_variadic {
        ($local:expr, $min:expr, $func:expr $(,)?) => {
            reg.register_ns_variadic(FNS, $local, $min, $func)
        };
    }

    // ===== Core booleans =====
    reg_ns!("true", 0, boolean::fn_true);
    reg_ns!("false", 0, boolean::fn_false);
    reg_ns!("not", 1, boolean::fn_not);
    reg_ns!("boolean", 1, boolean::fn_boolean);
    reg_ns_range!("data", 0, 1, boolean::data_fn);

    // ===== Numeric family =====
    reg_ns_range!("number", 0, 1, numeric::number_fn);
    reg_ns!("abs", 1, numeric::abs_fn);
    reg_ns!("floor", 1, numeric::floor_fn);
    reg_ns!("ceiling", 1, numeric::ceiling_fn);
    reg_ns_range!("round", 1, 2, numeric::round_fn);
    reg_ns_range!("round-half-to-even", 1, 2, numeric::round_half_to_even_fn);
    reg_ns_range!("sum", 1, 2, numeric::sum_fn);
    reg_ns!("avg", 1, numeric::avg_fn);
    reg_ns!("min", 1, numeric::min_fn);
    reg_ns!("max", 1, numeric::max_fn);
    reg_ns_range!("format-number", 2, 3, format::format_number_fn);

    // ===== String family =====
    reg_ns_range!("string", 0, 1, strings::string_fn);
    reg_ns_range!("string-length", 0, 1, strings::string_length_fn);
    reg_ns_range!("normalize-space", 0, 1, strings::normalize_space_fn);
    reg_ns_variadic!("concat", 2, strings::concat_fn);
    reg_ns_range!("string-join", 1, 2, strings::string_join_fn);
    reg_ns!("contains", 2, strings::contains_fn);
    reg_ns!("starts-with", 2, strings::starts_with_fn);
    reg_ns!("ends-with", 2, strings::ends_with_fn);
    reg_ns!("substring-before", 2, strings::substring_before_fn);
    reg_ns!("substring-after", 2, strings::substring_after_fn);
    reg_ns_range!("substring", 2, 3, strings::substring_fn);
    reg_ns!("upper-case", 1, strings::upper_case_fn);
    reg_ns!("lower-case", 1, strings::lower_case_fn);
    reg_ns!("translate", 3, strings::translate_fn);
    reg_ns!("string-to-codepoints", 1, strings::string_to_codepoints_fn);
    reg_ns!("codepoints-to-string", 1, strings::codepoints_to_string_fn);
    reg_ns!("compare", 2, strings::compare_fn);
    reg_ns!("codepoint-equal", 2, strings::codepoint_equal_fn);
    reg_ns!("tokenize", 1, strings::tokenize_fn);
    reg_ns!("untypedAtomic", 1, strings::untyped_atomic_fn);

    // ===== Sequence family =====
    reg_ns!("empty", 1, sequences::empty_fn);
    reg_ns!("exists", 1, sequences::exists_fn);
    reg_ns!("count", 1, sequences::count_fn);
    reg_ns!("reverse", 1, sequences::reverse_fn);
    reg_ns!("head", 1, sequences::head_fn);
    reg_ns!("tail", 1, sequences::tail_fn);
    reg_ns!("unordered", 1, sequences::unordered_fn);
    reg_ns_range!("subsequence", 2, 3, sequences::subsequence_fn);
    reg_ns!("distinct-values", 1, sequences::distinct_values_fn);
    reg_ns!("index-of", 2, sequences::index_of_fn);
    reg_ns!("insert-before", 3, sequences::insert_before_fn);
    reg_ns!("remove", 2, sequences::remove_fn);
    reg_ns!("zero-or-one", 1, sequences::zero_or_one_fn);
    reg_ns!("one-or-more", 1, sequences::one_or_more_fn);
    reg_ns!("exactly-one", 1, sequences::exactly_one_fn);
    reg_ns!("deep-equal", 2, sequences::deep_equal_fn);

    // ===== Node functions =====
    reg_ns_range!("name", 0, 1, nodes::name_fn);
    reg_ns_range!("local-name", 0, 1, nodes::local_name_fn);
    reg_ns_range!("namespace-uri", 0, 1, nodes::namespace_uri_fn);
    reg_ns_range!("node-name", 0, 1, nodes::node_name_fn);
    reg_ns_range!("root", 0, 1, nodes::root_fn);
    reg_ns_range!("has-children", 0, 1, nodes::has_children_fn);
    reg_ns!("innermost", 1, nodes::innermost_fn);
    reg_ns!("outermost", 1, nodes::outermost_fn);
    reg_ns!("parse-xml", 1, nodes::parse_xml_fn);

    // ===== QName / Namespace functions =====
    reg_ns!("QName", 2, qnames::qname_fn);
    reg_ns!("prefix-from-QName", 1, qnames::prefix_from_qname_fn);
    reg_ns!("local-name-from-QName", 1, qnames::local_name_from_qname_fn);
    reg_ns!("namespace-uri-from-QName", 1, qnames::namespace_uri_from_qname_fn);
    reg_ns!("resolve-QName", 2, qnames::resolve_qname_fn);
    reg_ns!("in-scope-prefixes", 1, qnames::in_scope_prefixes_fn);
    reg_ns!("namespace-uri-for-prefix", 2, qnames::namespace_uri_for_prefix_fn);

    // ===== Diagnostics =====
    reg_ns_range!("error", 0, 3, diagnostics::error_fn);
    reg_ns_range!("trace", 1, 2, diagnostics::trace_fn);
}

/// The built-in `fn:` library, built once and shared by every static context.
pub fn default_function_registry() -> Arc<FunctionRegistry> {
    static REGISTRY: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| {
            let mut reg = FunctionRegistry::new();
            register_default_functions(&mut reg);
            Arc::new(reg)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::ExpandedName;

    #[test]
    fn registry_resolves_optional_arities() {
        let reg = default_function_registry();
        let substring = ExpandedName::in_ns(FNS, "substring");
        assert!(reg.resolve(&substring, 2).is_ok());
        assert!(reg.resolve(&substring, 3).is_ok());
        assert!(reg.resolve(&substring, 4).is_err());
        assert!(reg.resolve(&ExpandedName::in_ns(FNS, "concat"), 7).is_ok());
    }
}
