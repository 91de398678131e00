use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;

pub mod ast;

use crate::engine::runtime::{Error, ErrorCode};
use crate::eqname::{self, LexicalName};

#[derive(pest_derive::Parser)]
#[grammar = "parser/xquery.pest"]
pub struct XQueryParser;

type PResult<T> = Result<T, Error>;

/// Parses a complete query (optional version declaration, prolog and body).
pub fn parse_query(input: &str) -> Result<ast::Module, Error> {
    XQueryParser::parse_module(input)
}

fn syntax(msg: impl Into<String>) -> Error {
    Error::from_code(ErrorCode::XPST0003, msg)
}

fn from_pest(err: &pest::error::Error<Rule>) -> Error {
    let (line, col) = match err.line_col {
        LineColLocation::Pos(p) | LineColLocation::Span(p, _) => p,
    };
    syntax(format!("syntax error at line {line}, column {col}: {}", err.variant.message()))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::K_AND
            | Rule::K_AS
            | Rule::K_AT
            | Rule::K_ATTRIBUTE
            | Rule::K_CAST
            | Rule::K_CASTABLE
            | Rule::K_COMMENT
            | Rule::K_DECIMAL_FORMAT
            | Rule::K_DECLARE
            | Rule::K_DEFAULT
            | Rule::K_DIV
            | Rule::K_DOCUMENT
            | Rule::K_DOCUMENT_NODE
            | Rule::K_ELEMENT
            | Rule::K_ELSE
            | Rule::K_EMPTY_SEQUENCE
            | Rule::K_ENCODING
            | Rule::K_EQ
            | Rule::K_EVERY
            | Rule::K_EXCEPT
            | Rule::K_EXTERNAL
            | Rule::K_FOR
            | Rule::K_FUNCTION
            | Rule::K_GE
            | Rule::K_GT
            | Rule::K_IDIV
            | Rule::K_IF
            | Rule::K_IN
            | Rule::K_INSTANCE
            | Rule::K_INTERSECT
            | Rule::K_IS
            | Rule::K_ITEM
            | Rule::K_LE
            | Rule::K_LET
            | Rule::K_LT
            | Rule::K_MOD
            | Rule::K_NAMESPACE
            | Rule::K_NAMESPACE_NODE
            | Rule::K_NE
            | Rule::K_NODE
            | Rule::K_OF
            | Rule::K_OPTION
            | Rule::K_OR
            | Rule::K_ORDERED
            | Rule::K_PROCESSING_INSTRUCTION
            | Rule::K_RETURN
            | Rule::K_SATISFIES
            | Rule::K_SCHEMA_ATTRIBUTE
            | Rule::K_SCHEMA_ELEMENT
            | Rule::K_SOME
            | Rule::K_TEXT
            | Rule::K_THEN
            | Rule::K_TO
            | Rule::K_TREAT
            | Rule::K_UNION
            | Rule::K_UNORDERED
            | Rule::K_VARIABLE
            | Rule::K_VERSION
            | Rule::K_WHERE
            | Rule::K_XQUERY
    )
}

/// Children of `pair` without keyword tokens.
fn significant<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn expect<'i>(it: &mut impl Iterator<Item = Pair<'i, Rule>>, what: &str) -> PResult<Pair<'i, Rule>> {
    it.next().ok_or_else(|| syntax(format!("malformed parse tree: expected {what}")))
}

/// Deepest bracketed nesting a query may use.
pub const MAX_NESTING_DEPTH: usize = 256;

fn opens_nesting(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::parenthesized_expr
            | Rule::predicate
            | Rule::argument_list
            | Rule::if_expr
            | Rule::function_body
            | Rule::enclosed_expr
            | Rule::dir_enclosed_expr
            | Rule::dir_elem_constructor
            | Rule::ordered_expr
            | Rule::unordered_expr
            | Rule::extension_expr
    )
}

/// Walks the parse tree without recursion and rejects nesting beyond [`MAX_NESTING_DEPTH`].
fn check_nesting(root: &Pair<Rule>) -> PResult<()> {
    let mut stack = vec![(root.clone(), 0usize)];
    while let Some((pair, depth)) = stack.pop() {
        let depth = if opens_nesting(pair.as_rule()) { depth + 1 } else { depth };
        if depth > MAX_NESTING_DEPTH {
            let (line, col) = pair.as_span().start_pos().line_col();
            return Err(syntax(format!(
                "expression nesting exceeds {MAX_NESTING_DEPTH} levels at line {line}, column {col}"
            )));
        }
        stack.extend(pair.into_inner().map(|p| (p, depth)));
    }
    Ok(())
}

fn boxed(e: ast::Expr) -> Box<ast::Expr> {
    Box::new(e)
}

impl XQueryParser {
    pub fn parse_module(input: &str) -> Result<ast::Module, Error> {
        let mut pairs = Self::parse(Rule::module, input).map_err(|e| from_pest(&e))?;
        let module = expect(&mut pairs, "module")?;
        check_nesting(&module)?;
        let built = Self::build_module(module)?;
        tracing::debug!(decls = built.prolog.len(), "parsed query");
        Ok(built)
    }

    /// Walk down a pair to the first terminal token rule (e.g., OP_PLUS, K_AND)
    fn first_token_rule(pair: &Pair<Rule>) -> Rule {
        let mut current = pair.clone();
        loop {
            let mut inner = current.clone().into_inner();
            if let Some(next) = inner.next() {
                current = next;
            } else {
                return current.as_rule();
            }
        }
    }

    // ===== Module and prolog =====

    fn build_module(pair: Pair<Rule>) -> PResult<ast::Module> {
        let mut version = None;
        let mut prolog = Vec::new();
        let mut body = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::version_decl => {
                    let lit = expect(&mut significant(p), "version")?;
                    version = Some(Self::string_value(lit)?);
                }
                Rule::prolog => {
                    for decl in p.into_inner() {
                        prolog.push(Self::build_decl(decl)?);
                    }
                }
                Rule::expr => body = Some(Self::build_expr(p)?),
                _ => {}
            }
        }
        Ok(ast::Module { version, prolog, body: body.ok_or_else(|| syntax("missing query body"))? })
    }

    fn build_decl(pair: Pair<Rule>) -> PResult<ast::Decl> {
        let rule = pair.as_rule();
        match rule {
            Rule::default_namespace_decl => {
                let mut it = significant(pair);
                let kind = match Self::first_token_rule(&expect(&mut it, "namespace kind")?) {
                    Rule::K_FUNCTION => ast::DefaultNamespaceKind::Function,
                    _ => ast::DefaultNamespaceKind::Element,
                };
                let uri = Self::uri_value(expect(&mut it, "namespace URI")?)?;
                Ok(ast::Decl::DefaultNamespace { kind, uri })
            }
            Rule::namespace_decl => {
                let mut it = significant(pair);
                let prefix = expect(&mut it, "prefix")?.as_str().to_string();
                let uri = Self::uri_value(expect(&mut it, "namespace URI")?)?;
                Ok(ast::Decl::Namespace { prefix, uri })
            }
            Rule::option_decl => {
                let mut it = significant(pair);
                let name = Self::build_name(&expect(&mut it, "option name")?)?;
                let value = Self::string_value(expect(&mut it, "option value")?)?;
                Ok(ast::Decl::Option { name, value })
            }
            Rule::decimal_format_decl => {
                let mut name = None;
                let mut properties = Vec::new();
                for p in significant(pair) {
                    match p.as_rule() {
                        Rule::EQName => name = Some(Self::build_name(&p)?),
                        Rule::df_property => {
                            let mut it = p.into_inner();
                            let prop = expect(&mut it, "property name")?.as_str().to_string();
                            let value = Self::string_value(expect(&mut it, "property value")?)?;
                            properties.push((prop, value));
                        }
                        _ => {}
                    }
                }
                Ok(ast::Decl::DecimalFormat { name, properties })
            }
            Rule::var_decl => {
                let mut name = None;
                let mut ty = None;
                let mut external = false;
                let mut value = None;
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::EQName => name = Some(Self::build_name(&p)?),
                        Rule::type_declaration => ty = Some(Self::build_type_declaration(p)?),
                        Rule::K_EXTERNAL => external = true,
                        Rule::var_value => value = Some(Self::build_expr(expect(&mut p.into_inner(), "value")?)?),
                        _ => {}
                    }
                }
                let name = name.ok_or_else(|| syntax("variable declaration without a name"))?;
                Ok(ast::Decl::Variable(ast::VarDecl { name, ty, external, value }))
            }
            Rule::function_decl => {
                let mut name = None;
                let mut params = Vec::new();
                let mut return_type = None;
                let mut body = None;
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::EQName => name = Some(Self::build_name(&p)?),
                        Rule::param_list => {
                            for param in p.into_inner() {
                                let mut it = param.into_inner();
                                let pname = Self::build_name(&expect(&mut it, "parameter name")?)?;
                                let ty = it.next().map(Self::build_type_declaration).transpose()?;
                                params.push(ast::Param { name: pname, ty });
                            }
                        }
                        Rule::return_type => return_type = Some(Self::build_type_declaration(p)?),
                        Rule::function_body => {
                            body = Some(match p.into_inner().next() {
                                Some(e) => Self::build_expr(e)?,
                                None => ast::Expr::EmptySequence,
                            });
                        }
                        _ => {}
                    }
                }
                let name = name.ok_or_else(|| syntax("function declaration without a name"))?;
                Ok(ast::Decl::Function(ast::FunctionDecl { name, params, return_type, body }))
            }
            _ => Err(syntax(format!("unexpected prolog declaration {rule:?}"))),
        }
    }

    // ===== Names and literals =====

    fn build_name(pair: &Pair<Rule>) -> PResult<LexicalName> {
        eqname::parse_eqname(pair.as_str())
    }

    /// Raw contents of a string literal with doubled delimiters collapsed.
    fn string_raw(pair: Pair<Rule>) -> String {
        match pair.into_inner().next() {
            Some(inner) => match inner.as_rule() {
                Rule::dbl_string_inner => inner.as_str().replace("\"\"", "\""),
                Rule::sgl_string_inner => inner.as_str().replace("''", "'"),
                _ => inner.as_str().to_string(),
            },
            None => String::new(),
        }
    }

    fn string_value(pair: Pair<Rule>) -> PResult<String> {
        eqname::expand_references(&Self::string_raw(pair))
    }

    fn uri_value(pair: Pair<Rule>) -> PResult<String> {
        eqname::normalize_uri(&Self::string_raw(pair))
    }

    fn build_literal(pair: &Pair<Rule>) -> PResult<ast::Literal> {
        let text = pair.as_str();
        let parse_f64 = |s: &str| s.parse::<f64>().map_err(|_| syntax(format!("invalid numeric literal '{s}'")));
        Ok(match pair.as_rule() {
            // Integers beyond i64 degrade to decimals.
            Rule::integer_literal => match text.parse::<i64>() {
                Ok(v) => ast::Literal::Integer(v),
                Err(_) => ast::Literal::Decimal(parse_f64(text)?),
            },
            Rule::decimal_literal => ast::Literal::Decimal(parse_f64(text)?),
            _ => ast::Literal::Double(parse_f64(text)?),
        })
    }

    // ===== Expressions =====

    /// Descends through precedence levels that carry a single operand and no operator.
    fn skip_pass_through(mut pair: Pair<Rule>) -> Pair<Rule> {
        loop {
            let rule = pair.as_rule();
            let passes = matches!(
                rule,
                Rule::expr
                    | Rule::expr_single
                    | Rule::or_expr
                    | Rule::and_expr
                    | Rule::comparison_expr
                    | Rule::string_concat_expr
                    | Rule::range_expr
                    | Rule::additive_expr
                    | Rule::multiplicative_expr
                    | Rule::union_expr
                    | Rule::intersect_except_expr
                    | Rule::instanceof_expr
                    | Rule::treat_expr
                    | Rule::castable_expr
                    | Rule::cast_expr
                    | Rule::unary_expr
                    | Rule::value_expr
                    | Rule::simple_map_expr
                    | Rule::path_expr
                    | Rule::relative_path_expr
                    | Rule::step_expr
                    | Rule::postfix_expr
                    | Rule::parenthesized_expr
            );
            if !passes {
                return pair;
            }
            let mut inner = pair.clone().into_inner();
            let (Some(only), None) = (inner.next(), inner.next()) else { return pair };
            // Root paths and lone axis steps keep their path node.
            let keeps_path = match rule {
                Rule::path_expr => only.as_rule() != Rule::relative_path_expr,
                Rule::relative_path_expr => {
                    only.clone().into_inner().next().is_none_or(|s| s.as_rule() == Rule::axis_step)
                }
                _ => false,
            };
            if keeps_path {
                return pair;
            }
            pair = only;
        }
    }

    fn build_expr(pair: Pair<Rule>) -> PResult<ast::Expr> {
        use ast::Expr;
        let pair = Self::skip_pass_through(pair);
        let rule = pair.as_rule();
        match rule {
            Rule::expr => Self::build_sequence(pair),
            Rule::expr_single | Rule::value_expr | Rule::step_expr | Rule::parenthesized_expr => {
                match pair.into_inner().next() {
                    Some(inner) => Self::build_expr(inner),
                    None => Ok(Expr::EmptySequence),
                }
            }
            Rule::flwor_expr => Self::build_flwor(pair),
            Rule::quantified_expr => Self::build_quantified(pair),
            Rule::if_expr => Self::build_if(pair),
            Rule::or_expr => Self::fold_chain(pair, |op| (op == Rule::K_OR).then_some(ast::BinaryOp::Or)),
            Rule::and_expr => Self::fold_chain(pair, |op| (op == Rule::K_AND).then_some(ast::BinaryOp::And)),
            Rule::additive_expr => Self::fold_chain(pair, |op| match op {
                Rule::OP_PLUS => Some(ast::BinaryOp::Add),
                Rule::OP_MINUS => Some(ast::BinaryOp::Sub),
                _ => None,
            }),
            Rule::multiplicative_expr => Self::fold_chain(pair, |op| match op {
                Rule::OP_MUL => Some(ast::BinaryOp::Mul),
                Rule::K_DIV => Some(ast::BinaryOp::Div),
                Rule::K_IDIV => Some(ast::BinaryOp::IDiv),
                Rule::K_MOD => Some(ast::BinaryOp::Mod),
                _ => None,
            }),
            Rule::comparison_expr => Self::build_comparison(pair),
            Rule::string_concat_expr => Self::build_operand_list(pair, Rule::OP_CONCAT).map(Expr::StringConcat),
            Rule::simple_map_expr => Self::build_operand_list(pair, Rule::OP_BANG).map(Expr::SimpleMap),
            Rule::range_expr => Self::build_range(pair),
            Rule::union_expr | Rule::intersect_except_expr => Self::build_set_chain(pair),
            Rule::instanceof_expr | Rule::treat_expr => Self::build_sequence_type_op(pair),
            Rule::castable_expr | Rule::cast_expr => Self::build_single_type_op(pair),
            Rule::unary_expr => Self::build_unary(pair),
            Rule::extension_expr => Self::build_extension(pair),
            Rule::path_expr => Self::build_path_expr(pair),
            Rule::relative_path_expr => Self::build_relative_path(pair),
            Rule::postfix_expr => Self::build_postfix(pair),
            Rule::integer_literal | Rule::decimal_literal | Rule::double_literal => {
                Ok(Expr::Literal(Self::build_literal(&pair)?))
            }
            Rule::string_literal => Ok(Expr::Literal(ast::Literal::String(Self::string_value(pair)?))),
            Rule::var_ref => {
                let name = expect(&mut pair.into_inner(), "variable name")?;
                Ok(Expr::VarRef(Self::build_name(&name)?))
            }
            Rule::context_item_expr => Ok(Expr::ContextItem),
            Rule::ordered_expr | Rule::unordered_expr => {
                let inner = expect(&mut significant(pair), "expression")?;
                Ok(Expr::Ordering(boxed(Self::build_expr(inner)?)))
            }
            Rule::function_call => Self::build_function_call(pair),
            Rule::dir_elem_constructor => Ok(Expr::Constructor(ast::Constructor::DirElement(Self::build_dir_element(pair)?))),
            Rule::dir_comment_constructor => {
                let text = pair.into_inner().next().map(|c| c.as_str().to_string()).unwrap_or_default();
                Ok(Expr::Constructor(ast::Constructor::DirComment(text)))
            }
            Rule::dir_pi_constructor => Self::build_dir_pi(pair),
            Rule::comp_doc_constructor
            | Rule::comp_text_constructor
            | Rule::comp_comment_constructor
            | Rule::comp_elem_constructor
            | Rule::comp_attr_constructor
            | Rule::comp_pi_constructor => Self::build_computed(pair),
            _ => Err(syntax(format!("unsupported expression {rule:?}: '{}'", pair.as_str()))),
        }
    }

    fn build_sequence(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut items = pair.into_inner().map(Self::build_expr).collect::<PResult<Vec<_>>>()?;
        if items.len() == 1 { Ok(items.remove(0)) } else { Ok(ast::Expr::Sequence(items)) }
    }

    fn build_if(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = significant(pair);
        let cond = Self::build_expr(expect(&mut it, "condition")?)?;
        let then_expr = Self::build_expr(expect(&mut it, "then branch")?)?;
        let else_expr = Self::build_expr(expect(&mut it, "else branch")?)?;
        Ok(ast::Expr::IfThenElse { cond: boxed(cond), then_expr: boxed(then_expr), else_expr: boxed(else_expr) })
    }

    /// Operands of an n-ary chain joined by a single operator token.
    fn build_operand_list(pair: Pair<Rule>, separator: Rule) -> PResult<Vec<ast::Expr>> {
        pair.into_inner().filter(|p| p.as_rule() != separator).map(Self::build_expr).collect()
    }

    fn build_range(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = significant(pair);
        let start = Self::build_expr(expect(&mut it, "range start")?)?;
        match it.next() {
            Some(end) => Ok(ast::Expr::Range { start: boxed(start), end: boxed(Self::build_expr(end)?) }),
            None => Ok(start),
        }
    }

    fn build_set_chain(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = pair.into_inner();
        let mut expr = Self::build_expr(expect(&mut it, "operand")?)?;
        while let Some(op) = it.next() {
            let op = match op.as_rule() {
                Rule::K_UNION | Rule::OP_PIPE => ast::SetOp::Union,
                Rule::K_INTERSECT => ast::SetOp::Intersect,
                _ => ast::SetOp::Except,
            };
            let right = Self::build_expr(expect(&mut it, "operand")?)?;
            expr = ast::Expr::SetOp { left: boxed(expr), op, right: boxed(right) };
        }
        Ok(expr)
    }

    fn build_sequence_type_op(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let rule = pair.as_rule();
        let mut it = significant(pair);
        let expr = Self::build_expr(expect(&mut it, "operand")?)?;
        let Some(ty) = it.next() else { return Ok(expr) };
        let (expr, ty) = (boxed(expr), Self::build_sequence_type(ty)?);
        Ok(if rule == Rule::instanceof_expr { ast::Expr::InstanceOf { expr, ty } } else { ast::Expr::TreatAs { expr, ty } })
    }

    fn build_single_type_op(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let rule = pair.as_rule();
        let mut it = significant(pair);
        let expr = Self::build_expr(expect(&mut it, "operand")?)?;
        let Some(ty) = it.next() else { return Ok(expr) };
        let (expr, ty) = (boxed(expr), Self::build_single_type(ty)?);
        Ok(if rule == Rule::castable_expr { ast::Expr::CastableAs { expr, ty } } else { ast::Expr::CastAs { expr, ty } })
    }

    fn build_unary(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut signs = Vec::new();
        let mut value = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::OP_MINUS => signs.push(ast::UnarySign::Minus),
                Rule::OP_PLUS => signs.push(ast::UnarySign::Plus),
                _ => value = Some(p),
            }
        }
        let value = value.ok_or_else(|| syntax("unary operator without operand"))?;
        let mut expr = Self::build_expr(value)?;
        for sign in signs.into_iter().rev() {
            expr = ast::Expr::Unary { sign, expr: boxed(expr) };
        }
        Ok(expr)
    }

    fn build_extension(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut pragmas = Vec::new();
        let mut expr = None;
        for p in pair.into_inner() {
            if p.as_rule() == Rule::pragma {
                let mut it = p.into_inner();
                let name = Self::build_name(&expect(&mut it, "pragma name")?)?;
                let content = it.next().map(|c| c.as_str().to_string()).unwrap_or_default();
                pragmas.push(ast::Pragma { name, content });
            } else {
                expr = Some(boxed(Self::build_expr(p)?));
            }
        }
        Ok(ast::Expr::Extension { pragmas, expr })
    }

    fn build_postfix(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = pair.into_inner();
        let primary = Self::build_expr(expect(&mut it, "primary expression")?)?;
        let predicates = it.map(Self::build_predicate).collect::<PResult<Vec<_>>>()?;
        if predicates.is_empty() {
            return Ok(primary);
        }
        Ok(ast::Expr::Filter { input: boxed(primary), predicates })
    }

    fn build_function_call(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = pair.into_inner();
        let name = Self::build_name(&expect(&mut it, "function name")?)?;
        let args = expect(&mut it, "argument list")?.into_inner().map(Self::build_expr).collect::<PResult<Vec<_>>>()?;
        Ok(ast::Expr::FunctionCall { name, args })
    }

    fn build_dir_pi(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = pair.into_inner();
        let target = expect(&mut it, "PI target")?.as_str().to_string();
        if target.eq_ignore_ascii_case("xml") {
            return Err(syntax(format!("'{target}' is not a valid processing-instruction target")));
        }
        let content = it.next().map(|c| c.as_str().to_string()).unwrap_or_default();
        Ok(ast::Expr::Constructor(ast::Constructor::DirPi { target, content }))
    }

    fn fold_chain<F>(pair: Pair<Rule>, map_op: F) -> PResult<ast::Expr>
    where
        F: Fn(Rule) -> Option<ast::BinaryOp>,
    {
        let mut inners = pair.into_inner();
        let mut expr = Self::build_expr(expect(&mut inners, "operand")?)?;
        while let Some(op_pair) = inners.next() {
            let op = map_op(op_pair.as_rule())
                .ok_or_else(|| syntax(format!("unexpected operator '{}'", op_pair.as_str())))?;
            let right = Self::build_expr(expect(&mut inners, "operand")?)?;
            expr = ast::Expr::Binary { left: boxed(expr), op, right: boxed(right) };
        }
        Ok(expr)
    }

    fn build_comparison(pair: Pair<Rule>) -> PResult<ast::Expr> {
        use ast::{Expr, GeneralComp as GC, NodeComp as NC, ValueComp as VC};
        let mut inners = pair.into_inner();
        let left = Self::build_expr(expect(&mut inners, "operand")?)?;
        let Some(op_pair) = inners.next() else { return Ok(left) };
        let l = boxed(left);
        let r = boxed(Self::build_expr(expect(&mut inners, "operand")?)?);
        Ok(match Self::first_token_rule(&op_pair) {
            Rule::OP_EQ => Expr::GeneralComparison { left: l, op: GC::Eq, right: r },
            Rule::OP_NE => Expr::GeneralComparison { left: l, op: GC::Ne, right: r },
            Rule::OP_LT => Expr::GeneralComparison { left: l, op: GC::Lt, right: r },
            Rule::OP_LE => Expr::GeneralComparison { left: l, op: GC::Le, right: r },
            Rule::OP_GT => Expr::GeneralComparison { left: l, op: GC::Gt, right: r },
            Rule::OP_GE => Expr::GeneralComparison { left: l, op: GC::Ge, right: r },
            Rule::K_EQ => Expr::ValueComparison { left: l, op: VC::Eq, right: r },
            Rule::K_NE => Expr::ValueComparison { left: l, op: VC::Ne, right: r },
            Rule::K_LT => Expr::ValueComparison { left: l, op: VC::Lt, right: r },
            Rule::K_LE => Expr::ValueComparison { left: l, op: VC::Le, right: r },
            Rule::K_GT => Expr::ValueComparison { left: l, op: VC::Gt, right: r },
            Rule::K_GE => Expr::ValueComparison { left: l, op: VC::Ge, right: r },
            Rule::K_IS => Expr::NodeComparison { left: l, op: NC::Is, right: r },
            Rule::OP_PRECEDES => Expr::NodeComparison { left: l, op: NC::Precedes, right: r },
            _ => Expr::NodeComparison { left: l, op: NC::Follows, right: r },
        })
    }

    fn build_predicate(pair: Pair<Rule>) -> PResult<ast::Expr> {
        Self::build_expr(expect(&mut pair.into_inner(), "predicate expression")?)
    }

    // ===== FLWOR and quantified expressions =====

    fn build_flwor(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut clauses = Vec::new();
        let mut return_expr = None;
        for clause in pair.into_inner() {
            match clause.as_rule() {
                Rule::for_clause => {
                    for binding in significant(clause) {
                        let mut var = None;
                        let mut ty = None;
                        let mut positional = None;
                        let mut in_expr = None;
                        for p in significant(binding) {
                            match p.as_rule() {
                                Rule::EQName => var = Some(Self::build_name(&p)?),
                                Rule::type_declaration => ty = Some(Self::build_type_declaration(p)?),
                                Rule::positional_var => {
                                    let name = expect(&mut significant(p), "positional variable")?;
                                    positional = Some(Self::build_name(&name)?);
                                }
                                _ => in_expr = Some(Self::build_expr(p)?),
                            }
                        }
                        clauses.push(ast::Clause::For(ast::ForBinding {
                            var: var.ok_or_else(|| syntax("for binding without a variable"))?,
                            positional,
                            ty,
                            in_expr: in_expr.ok_or_else(|| syntax("for binding without an input"))?,
                        }));
                    }
                }
                Rule::let_clause => {
                    for binding in significant(clause) {
                        let mut it = significant(binding);
                        let var = Self::build_name(&expect(&mut it, "let variable")?)?;
                        let mut next = expect(&mut it, "let value")?;
                        let mut ty = None;
                        if next.as_rule() == Rule::type_declaration {
                            ty = Some(Self::build_type_declaration(next)?);
                            next = expect(&mut it, "let value")?;
                        }
                        clauses.push(ast::Clause::Let(ast::LetBinding { var, ty, value: Self::build_expr(next)? }));
                    }
                }
                Rule::where_clause => {
                    let cond = expect(&mut significant(clause), "where condition")?;
                    clauses.push(ast::Clause::Where(Self::build_expr(cond)?));
                }
                _ => {
                    let ret = expect(&mut significant(clause), "return expression")?;
                    return_expr = Some(boxed(Self::build_expr(ret)?));
                }
            }
        }
        Ok(ast::Expr::Flwor {
            clauses,
            return_expr: return_expr.ok_or_else(|| syntax("FLWOR expression without return"))?,
        })
    }

    fn build_quantified(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut it = significant(pair);
        let kind = match Self::first_token_rule(&expect(&mut it, "quantifier")?) {
            Rule::K_EVERY => ast::Quantifier::Every,
            _ => ast::Quantifier::Some,
        };
        let mut bindings = Vec::new();
        let mut satisfies = None;
        for p in it {
            if p.as_rule() == Rule::quant_binding {
                let mut b = significant(p);
                let var = Self::build_name(&expect(&mut b, "variable")?)?;
                let mut next = expect(&mut b, "binding input")?;
                let mut ty = None;
                if next.as_rule() == Rule::type_declaration {
                    ty = Some(Self::build_type_declaration(next)?);
                    next = expect(&mut b, "binding input")?;
                }
                bindings.push(ast::QuantifiedBinding { var, ty, in_expr: Self::build_expr(next)? });
            } else {
                satisfies = Some(boxed(Self::build_expr(p)?));
            }
        }
        Ok(ast::Expr::Quantified {
            kind,
            bindings,
            satisfies: satisfies.ok_or_else(|| syntax("quantified expression without satisfies"))?,
        })
    }

    // ===== Paths =====

    fn build_path_expr(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let first = expect(&mut pair.into_inner(), "path")?;
        match first.as_rule() {
            Rule::root_path => {
                let steps = match first.into_inner().next() {
                    Some(rel) => Self::collect_steps(rel)?,
                    None => Vec::new(),
                };
                Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::Root, steps }))
            }
            Rule::root_descendant_path => {
                let rel = expect(&mut first.into_inner(), "relative path")?;
                let steps = Self::collect_steps(rel)?;
                Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::RootDescendant, steps }))
            }
            _ => Self::build_relative_path(first),
        }
    }

    /// A relative path with a single non-axis step is just that expression.
    fn build_relative_path(pair: Pair<Rule>) -> PResult<ast::Expr> {
        let mut steps = Self::collect_steps(pair)?;
        if steps.len() == 1 && matches!(steps[0], ast::StepExpr::Filter(_)) {
            if let Some(ast::StepExpr::Filter(e)) = steps.pop() {
                return Ok(e);
            }
        }
        Ok(ast::Expr::Path(ast::PathExpr { start: ast::PathStart::Relative, steps }))
    }

    /// `a//b` expands to `a/descendant-or-self::node()/b`.
    fn collect_steps(pair: Pair<Rule>) -> PResult<Vec<ast::StepExpr>> {
        let mut steps = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::OP_SLASH => {}
                Rule::OP_DSLASH => steps.push(ast::StepExpr::Axis(ast::Step {
                    axis: ast::Axis::DescendantOrSelf,
                    test: ast::NodeTest::Kind(ast::KindTest::AnyKind),
                    predicates: Vec::new(),
                })),
                _ => {
                    let inner = expect(&mut p.into_inner(), "step")?;
                    if inner.as_rule() == Rule::axis_step {
                        steps.push(ast::StepExpr::Axis(Self::build_axis_step(inner)?));
                    } else {
                        steps.push(ast::StepExpr::Filter(Self::build_expr(inner)?));
                    }
                }
            }
        }
        Ok(steps)
    }

    fn build_axis_step(pair: Pair<Rule>) -> PResult<ast::Step> {
        let mut it = pair.into_inner();
        let step = expect(&mut it, "step")?;
        let predicates = it.map(Self::build_predicate).collect::<PResult<Vec<_>>>()?;
        let mut parts = step.into_inner();
        let inner = expect(&mut parts, "step body")?;
        let (axis, test) = match inner.as_rule() {
            Rule::abbrev_reverse_step => (ast::Axis::Parent, ast::NodeTest::Kind(ast::KindTest::AnyKind)),
            Rule::forward_axis | Rule::reverse_axis => {
                let axis = Self::axis_from_rule(Self::first_token_rule(&inner))?;
                (axis, Self::build_node_test(expect(&mut parts, "node test")?)?)
            }
            _ => {
                // abbrev_forward_step = attribute_marker? node_test
                let mut attr = false;
                let mut node_test = None;
                for p in inner.into_inner() {
                    match p.as_rule() {
                        Rule::attribute_marker => attr = true,
                        _ => node_test = Some(Self::build_node_test(p)?),
                    }
                }
                let test = node_test.ok_or_else(|| syntax("step without node test"))?;
                let axis = match &test {
                    _ if attr => ast::Axis::Attribute,
                    ast::NodeTest::Kind(ast::KindTest::Attribute { .. } | ast::KindTest::SchemaAttribute(_)) => {
                        ast::Axis::Attribute
                    }
                    ast::NodeTest::Kind(ast::KindTest::NamespaceNode) => ast::Axis::Namespace,
                    _ => ast::Axis::Child,
                };
                (axis, test)
            }
        };
        Ok(ast::Step { axis, test, predicates })
    }

    fn axis_from_rule(rule: Rule) -> PResult<ast::Axis> {
        Ok(match rule {
            Rule::AXIS_CHILD => ast::Axis::Child,
            Rule::AXIS_DESCENDANT => ast::Axis::Descendant,
            Rule::AXIS_DESCENDANT_OR_SELF => ast::Axis::DescendantOrSelf,
            Rule::AXIS_ATTRIBUTE => ast::Axis::Attribute,
            Rule::AXIS_SELF => ast::Axis::SelfAxis,
            Rule::AXIS_FOLLOWING_SIBLING => ast::Axis::FollowingSibling,
            Rule::AXIS_FOLLOWING => ast::Axis::Following,
            Rule::AXIS_NAMESPACE => ast::Axis::Namespace,
            Rule::AXIS_PARENT => ast::Axis::Parent,
            Rule::AXIS_ANCESTOR => ast::Axis::Ancestor,
            Rule::AXIS_ANCESTOR_OR_SELF => ast::Axis::AncestorOrSelf,
            Rule::AXIS_PRECEDING_SIBLING => ast::Axis::PrecedingSibling,
            Rule::AXIS_PRECEDING => ast::Axis::Preceding,
            other => return Err(syntax(format!("unknown axis {other:?}"))),
        })
    }

    fn build_node_test(pair: Pair<Rule>) -> PResult<ast::NodeTest> {
        let inner = expect(&mut pair.into_inner(), "node test")?;
        if inner.as_rule() == Rule::name_test {
            let name = expect(&mut inner.into_inner(), "name test")?;
            return Ok(ast::NodeTest::Name(eqname::parse_name_test(name.as_str())?));
        }
        Ok(ast::NodeTest::Kind(Self::build_kind_test(inner)?))
    }

    fn build_kind_test(pair: Pair<Rule>) -> PResult<ast::KindTest> {
        use ast::KindTest;
        let rule = pair.as_rule();
        Ok(match rule {
            Rule::any_kind_test => KindTest::AnyKind,
            Rule::text_test => KindTest::Text,
            Rule::comment_test => KindTest::Comment,
            Rule::namespace_node_test => KindTest::NamespaceNode,
            Rule::document_test => match significant(pair).next() {
                Some(inner) => KindTest::Document(Some(Box::new(Self::build_kind_test(inner)?))),
                None => KindTest::Document(None),
            },
            Rule::pi_test => match significant(pair).next() {
                None => KindTest::ProcessingInstruction(None),
                Some(p) if p.as_rule() == Rule::NCName => KindTest::ProcessingInstruction(Some(p.as_str().to_string())),
                Some(p) => {
                    let value = Self::string_value(p)?;
                    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !eqname::is_ncname(&normalized) {
                        return Err(Error::from_code(
                            ErrorCode::XPTY0004,
                            format!("'{value}' is not a valid processing-instruction name"),
                        ));
                    }
                    KindTest::ProcessingInstruction(Some(normalized))
                }
            },
            Rule::element_test | Rule::attribute_test => {
                let mut name = None;
                let mut ty = None;
                let mut nillable = false;
                for p in significant(pair) {
                    match p.as_rule() {
                        Rule::element_name_or_wildcard => {
                            let inner = expect(&mut p.into_inner(), "name")?;
                            name = Some(if inner.as_rule() == Rule::wildcard_any {
                                ast::ElementNameOrWildcard::Any
                            } else {
                                ast::ElementNameOrWildcard::Name(Self::build_name(&inner)?)
                            });
                        }
                        Rule::type_name => ty = Some(Self::build_name(&expect(&mut p.into_inner(), "type name")?)?),
                        Rule::nillable_marker => nillable = true,
                        _ => {}
                    }
                }
                if rule == Rule::element_test {
                    KindTest::Element { name, ty, nillable }
                } else {
                    KindTest::Attribute { name, ty }
                }
            }
            Rule::schema_element_test => KindTest::SchemaElement(Self::build_name(&expect(&mut significant(pair), "name")?)?),
            Rule::schema_attribute_test => {
                KindTest::SchemaAttribute(Self::build_name(&expect(&mut significant(pair), "name")?)?)
            }
            _ => return Err(syntax(format!("unsupported kind test {rule:?}"))),
        })
    }

    // ===== Types =====

    fn build_type_declaration(pair: Pair<Rule>) -> PResult<ast::SequenceType> {
        Self::build_sequence_type(expect(&mut significant(pair), "sequence type")?)
    }

    fn build_sequence_type(pair: Pair<Rule>) -> PResult<ast::SequenceType> {
        let mut it = pair.into_inner();
        let first = expect(&mut it, "item type")?;
        if first.as_rule() == Rule::empty_sequence_type {
            return Ok(ast::SequenceType::EmptySequence);
        }
        let item_inner = expect(&mut first.into_inner(), "item type")?;
        let item = match item_inner.as_rule() {
            Rule::any_item_type => ast::ItemType::Item,
            Rule::atomic_type => ast::ItemType::Atomic(Self::build_name(&expect(&mut item_inner.into_inner(), "type name")?)?),
            _ => ast::ItemType::Kind(Self::build_kind_test(item_inner)?),
        };
        let occ = match it.next().map(|p| p.as_str()) {
            Some("?") => ast::Occurrence::ZeroOrOne,
            Some("*") => ast::Occurrence::ZeroOrMore,
            Some("+") => ast::Occurrence::OneOrMore,
            _ => ast::Occurrence::One,
        };
        Ok(ast::SequenceType::Typed { item, occ })
    }

    fn build_single_type(pair: Pair<Rule>) -> PResult<ast::SingleType> {
        let mut it = pair.into_inner();
        let atomic = Self::build_name(&expect(&mut it, "type name")?)?;
        Ok(ast::SingleType { atomic, optional: it.next().is_some() })
    }

    // ===== Constructors =====

    fn build_enclosed(pair: Pair<Rule>) -> PResult<Option<Box<ast::Expr>>> {
        pair.into_inner().next().map(|e| Self::build_expr(e).map(boxed)).transpose()
    }

    fn build_computed_name(pair: Pair<Rule>) -> PResult<ast::ComputedName> {
        if pair.as_rule() == Rule::computed_name {
            let inner = expect(&mut pair.into_inner(), "name expression")?;
            return Ok(ast::ComputedName::Dynamic(boxed(Self::build_expr(inner)?)));
        }
        Ok(ast::ComputedName::Static(Self::build_name(&pair)?))
    }

    fn build_computed(pair: Pair<Rule>) -> PResult<ast::Expr> {
        use ast::Constructor as C;
        let rule = pair.as_rule();
        let mut it = significant(pair);
        let constructor = match rule {
            Rule::comp_doc_constructor => C::Document(Self::build_enclosed(expect(&mut it, "content")?)?),
            Rule::comp_text_constructor => C::Text(Self::build_enclosed(expect(&mut it, "content")?)?),
            Rule::comp_comment_constructor => C::Comment(Self::build_enclosed(expect(&mut it, "content")?)?),
            _ => {
                let name = Self::build_computed_name(expect(&mut it, "name")?)?;
                let content = Self::build_enclosed(expect(&mut it, "content")?)?;
                match rule {
                    Rule::comp_elem_constructor => C::Element { name, content },
                    Rule::comp_attr_constructor => C::Attribute { name, content },
                    _ => C::ProcessingInstruction { target: name, content },
                }
            }
        };
        Ok(ast::Expr::Constructor(constructor))
    }

    /// Character produced by an entity or character reference.
    fn reference_text(pair: &Pair<Rule>) -> PResult<String> {
        eqname::expand_references(pair.as_str())
    }

    fn build_dir_element(pair: Pair<Rule>) -> PResult<ast::DirElement> {
        let mut it = pair.into_inner();
        let name = expect(&mut it, "element name")?.as_str().to_string();
        let mut attributes = Vec::new();
        let mut content = Vec::new();
        let mut text = String::new();
        let mut boundary = true;
        let flush = |text: &mut String, boundary: &mut bool, content: &mut Vec<ast::DirContent>| {
            if !text.is_empty() && !*boundary {
                content.push(ast::DirContent::Text(core::mem::take(text)));
            }
            text.clear();
            *boundary = true;
        };
        for p in it {
            match p.as_rule() {
                Rule::dir_attribute_list => {
                    for attr in p.into_inner() {
                        attributes.push(Self::build_dir_attribute(attr)?);
                    }
                }
                Rule::dir_empty_close => {}
                Rule::dir_qname => {
                    if p.as_str() != name {
                        return Err(Error::from_code(
                            ErrorCode::XQST0118,
                            format!("end tag '{}' does not match start tag '{name}'", p.as_str()),
                        ));
                    }
                }
                Rule::elem_content_chars => {
                    let chars = p.as_str();
                    if !chars.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n')) {
                        boundary = false;
                    }
                    text.push_str(chars);
                }
                Rule::predefined_entity_ref | Rule::char_ref => {
                    boundary = false;
                    text.push_str(&Self::reference_text(&p)?);
                }
                Rule::lbrace_escape => {
                    boundary = false;
                    text.push('{');
                }
                Rule::rbrace_escape => {
                    boundary = false;
                    text.push('}');
                }
                Rule::cdata_section => {
                    boundary = false;
                    text.push_str(p.into_inner().next().map(|c| c.as_str()).unwrap_or_default());
                }
                Rule::dir_enclosed_expr => {
                    flush(&mut text, &mut boundary, &mut content);
                    let inner = p.into_inner().next().map(Self::build_expr).transpose()?;
                    content.push(ast::DirContent::Enclosed(inner));
                }
                _ => {
                    flush(&mut text, &mut boundary, &mut content);
                    content.push(ast::DirContent::Node(Self::build_expr(p)?));
                }
            }
        }
        flush(&mut text, &mut boundary, &mut content);
        Ok(ast::DirElement { name, attributes, content })
    }

    fn build_dir_attribute(pair: Pair<Rule>) -> PResult<ast::DirAttribute> {
        let mut it = pair.into_inner();
        let name = expect(&mut it, "attribute name")?.as_str().to_string();
        let value_pair = expect(&mut it, "attribute value")?;
        let mut value: Vec<ast::AttrValuePart> = Vec::new();
        let push_text = |value: &mut Vec<ast::AttrValuePart>, s: &str| {
            if let Some(ast::AttrValuePart::Text(t)) = value.last_mut() {
                t.push_str(s);
            } else {
                value.push(ast::AttrValuePart::Text(s.to_string()));
            }
        };
        for p in value_pair.into_inner() {
            match p.as_rule() {
                Rule::escape_quot => push_text(&mut value, "\""),
                Rule::escape_apos => push_text(&mut value, "'"),
                Rule::lbrace_escape => push_text(&mut value, "{"),
                Rule::rbrace_escape => push_text(&mut value, "}"),
                Rule::predefined_entity_ref | Rule::char_ref => push_text(&mut value, &Self::reference_text(&p)?),
                Rule::dir_enclosed_expr => {
                    let inner = p.into_inner().next().map(Self::build_expr).transpose()?;
                    value.push(ast::AttrValuePart::Enclosed(inner));
                }
                // Literal whitespace in attribute values is normalized to spaces.
                _ => push_text(&mut value, &p.as_str().replace(['\t', '\n', '\r'], " ")),
            }
        }
        Ok(ast::DirAttribute { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ast::{Axis, Expr, PathStart, StepExpr};

    fn body(q: &str) -> Expr {
        parse_query(q).unwrap().body
    }

    #[test]
    fn lone_slash_then_operator() {
        match body("/ = 1") {
            Expr::GeneralComparison { left, .. } => {
                assert!(matches!(*left, Expr::Path(ast::PathExpr { start: PathStart::Root, ref steps }) if steps.is_empty()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lone_slash_before_name_is_an_error() {
        assert_eq!(parse_query("/ * 5").unwrap_err().code_enum(), ErrorCode::XPST0003);
        assert_eq!(parse_query("/ < 5").unwrap_err().code_enum(), ErrorCode::XPST0003);
    }

    #[test]
    fn double_slash_expands_to_descendant_or_self() {
        let Expr::Path(path) = body("a//b") else { panic!("expected a path") };
        assert_eq!(path.steps.len(), 3);
        assert!(matches!(&path.steps[1], StepExpr::Axis(s) if s.axis == Axis::DescendantOrSelf));
    }

    #[test]
    fn abbreviated_attribute_step() {
        let Expr::Path(path) = body("@id") else { panic!("expected a path") };
        assert!(matches!(&path.steps[0], StepExpr::Axis(s) if s.axis == Axis::Attribute));
    }

    #[test]
    fn mismatched_end_tag() {
        assert_eq!(parse_query("<a></b>").unwrap_err().code_enum(), ErrorCode::XQST0118);
    }

    #[test]
    fn boundary_whitespace_is_dropped() {
        let Expr::Constructor(ast::Constructor::DirElement(el)) = body("<a> {1} &#32;</a>") else {
            panic!("expected element")
        };
        assert_eq!(el.content.len(), 2);
        assert_eq!(el.content[1], ast::DirContent::Text("  ".into()));
    }

    #[test]
    fn nested_comments_are_whitespace() {
        assert_eq!(body("(: a (: b :) :) 1"), Expr::Literal(ast::Literal::Integer(1)));
    }

    #[test]
    fn bang_is_simple_map_unless_followed_by_equals() {
        assert!(matches!(body("a ! b ! c"), Expr::SimpleMap(ref ops) if ops.len() == 3));
        assert!(matches!(body("a != b"), Expr::GeneralComparison { .. }));
    }

    #[test]
    fn redundant_parentheses_leave_no_trace() {
        assert_eq!(body("((((1))))"), Expr::Literal(ast::Literal::Integer(1)));
        assert_eq!(body("(())"), Expr::EmptySequence);
    }

    #[test]
    fn reserved_names_are_not_function_calls() {
        assert!(matches!(body("comment()"), Expr::Path(_)));
    }
}
