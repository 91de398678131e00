use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use crate::consts::{FNS, XML_URI, XMLNS_URI, XS, XSI};
use crate::engine::evaluator::type_check;
use crate::engine::runtime::{Error, ErrorCode, StaticContext};
use crate::eqname::{self, LexicalName, NameRole, NamespaceTable};
use crate::model::QName;
use crate::parser::{ast, parse_query};
use crate::xdm::{ExpandedName, XdmAtomicValue};

pub mod ir;

static DEFAULT_STATIC_CONTEXT: OnceLock<StaticContext> = OnceLock::new();

fn default_static_ctx() -> &'static StaticContext {
    DEFAULT_STATIC_CONTEXT.get_or_init(StaticContext::default)
}

/// Compile using a lazily initialized default StaticContext
pub fn compile_xquery(src: &str) -> Result<ir::CompiledXQuery, Error> {
    compile_inner(src, default_static_ctx())
}

/// Compile with an explicitly provided StaticContext
pub fn compile_xquery_with_context(src: &str, static_ctx: &StaticContext) -> Result<ir::CompiledXQuery, Error> {
    compile_inner(src, static_ctx)
}

type CResult<T> = Result<T, Error>;

fn static_err(code: ErrorCode, msg: impl Into<String>) -> Error {
    Error::from_code(code, msg)
}

/// Prolog state visible to every expression of the module.
struct Env {
    ctx: StaticContext,
    globals: HashSet<ExpandedName>,
    functions: HashMap<(ExpandedName, usize), usize>,
}

/// Backing implementation shared by all compile entrypoints
fn compile_inner(src: &str, base: &StaticContext) -> Result<ir::CompiledXQuery, Error> {
    let module = parse_query(src)?;
    if let Some(version) = &module.version
        && !matches!(version.as_str(), "1.0" | "3.0" | "3.1")
    {
        return Err(static_err(ErrorCode::XQST0031, format!("unsupported XQuery version {version}")));
    }
    let mut env = Env { ctx: base.clone(), globals: base.in_scope_variables.clone(), functions: HashMap::new() };
    apply_setters(&mut env, &module.prolog)?;
    let declared = declare_functions(&mut env, &module.prolog)?;

    let mut globals: Vec<ir::GlobalVar> = Vec::new();
    for decl in &module.prolog {
        let ast::Decl::Variable(var) = decl else { continue };
        let name = env.ctx.namespaces.resolve(&var.name, NameRole::Variable)?;
        if globals.iter().any(|g| g.name == name) {
            return Err(static_err(ErrorCode::XQST0049, format!("variable ${name} is declared twice")));
        }
        let ty = var.ty.as_ref().map(|t| lower_seq_type(&env.ctx.namespaces, t)).transpose()?;
        let init = match &var.value {
            Some(e) => {
                let mut c = Compiler::new(&env, Vec::new());
                c.lower_expr(e)?;
                Some(ir::InstrSeq(c.code))
            }
            None => None,
        };
        env.globals.insert(name.clone());
        globals.push(ir::GlobalVar { name, ty, external: var.external, init });
    }

    let mut functions = Vec::with_capacity(declared.len());
    for (decl, name, params) in declared {
        let mut c = Compiler::new(&env, params.iter().map(|(n, _)| n.clone()).collect());
        if let Some(body) = &decl.body {
            c.lower_expr(body)?;
        }
        let return_type = decl.return_type.as_ref().map(|t| lower_seq_type(&env.ctx.namespaces, t)).transpose()?;
        if let Some(rt) = &return_type {
            c.emit(ir::OpCode::Coerce(rt.clone()));
        }
        functions.push(ir::UserFunction { name, params, return_type, body: ir::InstrSeq(c.code) });
    }

    let mut c = Compiler::new(&env, Vec::new());
    c.lower_expr(&module.body)?;
    let instrs = ir::InstrSeq(c.code);
    tracing::debug!(ops = instrs.0.len(), functions = functions.len(), globals = globals.len(), "compiled query");
    Ok(ir::CompiledXQuery {
        instrs,
        static_ctx: Arc::new(env.ctx),
        functions: Arc::new(functions),
        globals,
        source: src.to_string(),
    })
}

/// Namespace, option and decimal-format declarations.
fn apply_setters(env: &mut Env, prolog: &[ast::Decl]) -> CResult<()> {
    let mut default_elem_seen = false;
    let mut default_fn_seen = false;
    let mut prefixes: HashSet<&str> = HashSet::new();
    let mut formats: HashSet<Option<ExpandedName>> = HashSet::new();
    for decl in prolog {
        match decl {
            ast::Decl::DefaultNamespace { kind, uri } => {
                let seen = match kind {
                    ast::DefaultNamespaceKind::Element => &mut default_elem_seen,
                    ast::DefaultNamespaceKind::Function => &mut default_fn_seen,
                };
                if std::mem::replace(seen, true) {
                    return Err(static_err(ErrorCode::XQST0066, "duplicate default namespace declaration"));
                }
                match kind {
                    ast::DefaultNamespaceKind::Element => {
                        env.ctx.namespaces.set_default_element_namespace(Some(uri.clone()));
                    }
                    ast::DefaultNamespaceKind::Function => {
                        env.ctx.namespaces.set_default_function_namespace(Some(uri.clone()));
                    }
                }
            }
            ast::Decl::Namespace { prefix, uri } => {
                if prefix == "xml" || prefix == "xmlns" {
                    return Err(static_err(ErrorCode::XQST0070, format!("prefix '{prefix}' cannot be declared")));
                }
                if !prefixes.insert(prefix.as_str()) {
                    return Err(static_err(ErrorCode::XQST0033, format!("prefix '{prefix}' is declared twice")));
                }
                env.ctx.namespaces.bind(prefix, uri)?;
            }
            ast::Decl::Option { name, value } => {
                let name = env.ctx.namespaces.resolve(name, NameRole::Option)?;
                tracing::debug!(option = %name, %value, "declared option");
                env.ctx.options.insert(name, value.clone());
            }
            ast::Decl::DecimalFormat { name, properties } => {
                let name = name
                    .as_ref()
                    .map(|n| env.ctx.namespaces.resolve(n, NameRole::DecimalFormat))
                    .transpose()?;
                if !formats.insert(name.clone()) {
                    return Err(static_err(ErrorCode::XQST0111, "decimal format is declared twice"));
                }
                let mut seen = HashSet::new();
                let mut format = crate::engine::runtime::DecimalFormat::default();
                for (prop, value) in properties {
                    if !seen.insert(prop.as_str()) {
                        return Err(static_err(
                            ErrorCode::XQST0114,
                            format!("decimal-format property {prop} is specified twice"),
                        ));
                    }
                    format.set_property(prop, value)?;
                }
                env.ctx.decimal_formats.insert(name, format);
            }
            ast::Decl::Variable(_) | ast::Decl::Function(_) => {}
        }
    }
    Ok(())
}

type DeclaredFunction<'m> = (&'m ast::FunctionDecl, ExpandedName, Vec<(ExpandedName, Option<ir::SeqTypeIR>)>);

/// Registers every declared function signature so bodies can call each other.
fn declare_functions<'m>(env: &mut Env, prolog: &'m [ast::Decl]) -> CResult<Vec<DeclaredFunction<'m>>> {
    let mut out = Vec::new();
    for decl in prolog {
        let ast::Decl::Function(f) = decl else { continue };
        let name = env.ctx.namespaces.resolve(&f.name, NameRole::Function)?;
        match name.ns_uri.as_deref() {
            None => {
                return Err(static_err(ErrorCode::XQST0060, format!("function {name} must be in a namespace")));
            }
            Some(ns) if [FNS, XML_URI, XS, XSI].contains(&ns) => {
                return Err(static_err(
                    ErrorCode::XQST0045,
                    format!("function {name} is declared in a reserved namespace"),
                ));
            }
            Some(_) => {}
        }
        if f.body.is_none() {
            return Err(static_err(ErrorCode::XPST0017, format!("external function {name} is not available")));
        }
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let pname = env.ctx.namespaces.resolve(&p.name, NameRole::Variable)?;
            if params.iter().any(|(n, _)| *n == pname) {
                return Err(static_err(ErrorCode::XQST0039, format!("duplicate parameter ${pname} in {name}")));
            }
            let ty = p.ty.as_ref().map(|t| lower_seq_type(&env.ctx.namespaces, t)).transpose()?;
            params.push((pname, ty));
        }
        let key = (name.clone(), params.len());
        if env.functions.contains_key(&key) {
            return Err(static_err(ErrorCode::XQST0034, format!("function {name}#{} is declared twice", params.len())));
        }
        env.functions.insert(key, out.len());
        out.push((f, name, params));
    }
    Ok(out)
}

struct Compiler<'a> {
    env: &'a Env,
    /// Namespaces in scope; direct element constructors push nested bindings.
    ns: NamespaceTable,
    locals: Vec<ExpandedName>,
    code: Vec<ir::OpCode>,
}

impl<'a> Compiler<'a> {
    fn new(env: &'a Env, locals: Vec<ExpandedName>) -> Self {
        Self { env, ns: env.ctx.namespaces.clone(), locals, code: Vec::new() }
    }

    fn emit(&mut self, op: ir::OpCode) {
        self.code.push(op);
    }

    fn patch_jump(code: &mut [ir::OpCode], pos: usize) {
        let delta = code.len() - pos - 1;
        match &mut code[pos] {
            ir::OpCode::JumpIfTrue(d) | ir::OpCode::JumpIfFalse(d) | ir::OpCode::Jump(d) => *d = delta,
            _ => {}
        }
    }

    /// Lowers into a separate instruction sequence sharing this compiler's scopes.
    fn lower_block(&mut self, f: impl FnOnce(&mut Self) -> CResult<()>) -> CResult<ir::InstrSeq> {
        let saved = std::mem::take(&mut self.code);
        let result = f(self);
        let code = std::mem::replace(&mut self.code, saved);
        result.map(|()| ir::InstrSeq(code))
    }

    fn with_local<T>(&mut self, name: &ExpandedName, f: impl FnOnce(&mut Self) -> CResult<T>) -> CResult<T> {
        self.locals.push(name.clone());
        let result = f(self);
        self.locals.pop();
        result
    }

    fn resolve(&self, name: &LexicalName, role: NameRole) -> CResult<ExpandedName> {
        self.ns.resolve(name, role)
    }

    fn lower_expr(&mut self, e: &ast::Expr) -> CResult<()> {
        use ast::Expr as E;
        match e {
            E::Literal(l) => {
                self.emit(ir::OpCode::PushAtomic(match l {
                    ast::Literal::Integer(i) => XdmAtomicValue::Integer(*i),
                    ast::Literal::Decimal(d) => XdmAtomicValue::Decimal(*d),
                    ast::Literal::Double(d) => XdmAtomicValue::Double(*d),
                    ast::Literal::String(s) => XdmAtomicValue::String(s.clone()),
                }));
                Ok(())
            }
            E::EmptySequence => {
                self.emit(ir::OpCode::MakeSeq(0));
                Ok(())
            }
            E::VarRef(q) => {
                let name = self.resolve(q, NameRole::Variable)?;
                if !self.locals.contains(&name) && !self.env.globals.contains(&name) {
                    return Err(static_err(ErrorCode::XPST0008, format!("variable ${name} is not declared")));
                }
                self.emit(ir::OpCode::LoadVarByName(name));
                Ok(())
            }
            E::ContextItem => {
                self.emit(ir::OpCode::LoadContextItem);
                Ok(())
            }
            E::FunctionCall { name, args } => self.lower_function_call(name, args),
            E::Sequence(items) => {
                for it in items {
                    self.lower_expr(it)?;
                }
                self.emit(ir::OpCode::MakeSeq(items.len()));
                Ok(())
            }
            E::Binary { left, op: ast::BinaryOp::And, right } => self.lower_logical(left, right, false),
            E::Binary { left, op: ast::BinaryOp::Or, right } => self.lower_logical(left, right, true),
            E::Binary { left, op, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                use ast::BinaryOp::*;
                self.emit(match op {
                    Add => ir::OpCode::Add,
                    Sub => ir::OpCode::Sub,
                    Mul => ir::OpCode::Mul,
                    Div => ir::OpCode::Div,
                    IDiv => ir::OpCode::IDiv,
                    Mod => ir::OpCode::Mod,
                    And | Or => unreachable!("logical operators are lowered by lower_logical"),
                });
                Ok(())
            }
            E::StringConcat(parts) => {
                for p in parts {
                    self.lower_expr(p)?;
                }
                self.emit(ir::OpCode::StringConcat(parts.len()));
                Ok(())
            }
            E::SimpleMap(operands) => {
                let (input, bodies) = operands
                    .split_first()
                    .ok_or_else(|| static_err(ErrorCode::XPST0003, "simple map without operands"))?;
                self.lower_expr(input)?;
                for body in bodies {
                    let body = self.lower_block(|c| c.lower_expr(body))?;
                    self.emit(ir::OpCode::SimpleMap(body));
                }
                Ok(())
            }
            E::GeneralComparison { left, op, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                self.emit(ir::OpCode::CompareGeneral(map_general(*op)));
                Ok(())
            }
            E::ValueComparison { left, op, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                self.emit(ir::OpCode::CompareValue(map_value(*op)));
                Ok(())
            }
            E::NodeComparison { left, op, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                use ast::NodeComp::*;
                self.emit(match op {
                    Is => ir::OpCode::NodeIs,
                    Precedes => ir::OpCode::NodeBefore,
                    Follows => ir::OpCode::NodeAfter,
                });
                Ok(())
            }
            E::Unary { sign, expr } => {
                self.lower_expr(expr)?;
                self.emit(match sign {
                    ast::UnarySign::Minus => ir::OpCode::Neg,
                    ast::UnarySign::Plus => ir::OpCode::Plus,
                });
                Ok(())
            }
            E::IfThenElse { cond, then_expr, else_expr } => {
                self.lower_expr(cond)?;
                self.emit(ir::OpCode::ToEBV);
                let pos_jf = self.code.len();
                self.emit(ir::OpCode::JumpIfFalse(0));
                self.lower_expr(then_expr)?;
                let pos_j = self.code.len();
                self.emit(ir::OpCode::Jump(0));
                Self::patch_jump(&mut self.code, pos_jf);
                self.lower_expr(else_expr)?;
                Self::patch_jump(&mut self.code, pos_j);
                Ok(())
            }
            E::Range { start, end } => {
                self.lower_expr(start)?;
                self.lower_expr(end)?;
                self.emit(ir::OpCode::RangeTo);
                Ok(())
            }
            E::InstanceOf { expr, ty } => {
                self.lower_expr(expr)?;
                self.emit(ir::OpCode::InstanceOf(lower_seq_type(&self.ns, ty)?));
                Ok(())
            }
            E::TreatAs { expr, ty } => {
                self.lower_expr(expr)?;
                self.emit(ir::OpCode::Treat(lower_seq_type(&self.ns, ty)?));
                Ok(())
            }
            E::CastableAs { expr, ty } => {
                self.lower_expr(expr)?;
                self.emit(ir::OpCode::Castable(lower_single_type(&self.ns, ty)?));
                Ok(())
            }
            E::CastAs { expr, ty } => {
                self.lower_expr(expr)?;
                self.emit(ir::OpCode::Cast(lower_single_type(&self.ns, ty)?));
                Ok(())
            }
            E::Path(p) => self.lower_path_expr(p),
            E::Filter { input, predicates } => {
                self.lower_expr(input)?;
                let preds = self.lower_predicates(predicates)?;
                self.emit(ir::OpCode::ApplyPredicates(preds));
                Ok(())
            }
            E::SetOp { left, op, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                self.emit(match op {
                    ast::SetOp::Union => ir::OpCode::Union,
                    ast::SetOp::Intersect => ir::OpCode::Intersect,
                    ast::SetOp::Except => ir::OpCode::Except,
                });
                Ok(())
            }
            E::Flwor { clauses, return_expr } => self.lower_flwor(clauses, return_expr),
            E::Quantified { kind, bindings, satisfies } => {
                let kind = match kind {
                    ast::Quantifier::Some => ir::QuantifierKind::Some,
                    ast::Quantifier::Every => ir::QuantifierKind::Every,
                };
                self.lower_quantified(kind, bindings, satisfies)
            }
            E::Ordering(inner) => self.lower_expr(inner),
            E::Extension { pragmas, expr } => {
                for pragma in pragmas {
                    let name = self.resolve(&pragma.name, NameRole::Pragma)?;
                    tracing::debug!(pragma = %name, "ignoring unrecognized pragma");
                }
                match expr {
                    Some(inner) => self.lower_expr(inner),
                    None => Err(static_err(
                        ErrorCode::XQST0079,
                        "extension expression has no recognized pragma and no fallback expression",
                    )),
                }
            }
            E::Constructor(c) => self.lower_constructor(c),
        }
    }

    /// Short-circuit `and` / `or`.
    fn lower_logical(&mut self, left: &ast::Expr, right: &ast::Expr, is_or: bool) -> CResult<()> {
        self.lower_expr(left)?;
        self.emit(ir::OpCode::ToEBV);
        let pos_short = self.code.len();
        self.emit(if is_or { ir::OpCode::JumpIfTrue(0) } else { ir::OpCode::JumpIfFalse(0) });
        self.lower_expr(right)?;
        self.emit(ir::OpCode::ToEBV);
        let pos_end = self.code.len();
        self.emit(ir::OpCode::Jump(0));
        Self::patch_jump(&mut self.code, pos_short);
        self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::Boolean(is_or)));
        Self::patch_jump(&mut self.code, pos_end);
        Ok(())
    }

    fn lower_function_call(&mut self, name: &LexicalName, args: &[ast::Expr]) -> CResult<()> {
        let en = self.resolve(name, NameRole::Function)?;
        let argc = args.len();
        if en.ns_uri.as_deref() == Some(XS) {
            if argc != 1 {
                return Err(static_err(ErrorCode::XPST0017, format!("constructor function {en} takes one argument")));
            }
            if !type_check::is_cast_target(&en.local) {
                return Err(static_err(ErrorCode::XPST0017, format!("unknown constructor function {en}")));
            }
            self.lower_expr(&args[0])?;
            self.emit(ir::OpCode::Cast(ir::SingleTypeIR { atomic: en, optional: true }));
            return Ok(());
        }
        if en.ns_uri.as_deref() == Some(FNS) && argc == 0 {
            match en.local.as_str() {
                "position" => {
                    self.emit(ir::OpCode::Position);
                    return Ok(());
                }
                "last" => {
                    self.emit(ir::OpCode::Last);
                    return Ok(());
                }
                _ => {}
            }
        }
        if let Some(&index) = self.env.functions.get(&(en.clone(), argc)) {
            for a in args {
                self.lower_expr(a)?;
            }
            self.emit(ir::OpCode::CallUser(index, argc));
            return Ok(());
        }
        self.env.ctx.functions.resolve(&en, argc).map_err(|e| e.into_error(argc))?;
        for a in args {
            self.lower_expr(a)?;
        }
        self.emit(ir::OpCode::CallByName(en, argc));
        Ok(())
    }

    fn lower_predicates(&mut self, preds: &[ast::Expr]) -> CResult<Vec<ir::InstrSeq>> {
        preds.iter().map(|p| self.lower_block(|c| c.lower_expr(p))).collect()
    }

    // ===== Paths =====

    fn lower_path_expr(&mut self, p: &ast::PathExpr) -> CResult<()> {
        let mut first = false;
        match p.start {
            ast::PathStart::Root => self.emit(ir::OpCode::ToRoot),
            ast::PathStart::RootDescendant => {
                self.emit(ir::OpCode::ToRoot);
                self.emit(ir::OpCode::AxisStep {
                    axis: ir::AxisIR::DescendantOrSelf,
                    test: ir::NodeTestIR::AnyKind,
                    preds: Vec::new(),
                    first: false,
                });
            }
            ast::PathStart::Relative => first = true,
        }
        for (i, step) in p.steps.iter().enumerate() {
            let leading = first && i == 0;
            match step {
                ast::StepExpr::Axis(s) => {
                    if leading {
                        self.emit(ir::OpCode::LoadContextItem);
                    }
                    self.lower_axis_step(s, leading)?;
                }
                ast::StepExpr::Filter(e) if leading => self.lower_expr(e)?,
                ast::StepExpr::Filter(e) => {
                    let body = self.lower_block(|c| c.lower_expr(e))?;
                    self.emit(ir::OpCode::PathMap(body));
                }
            }
        }
        Ok(())
    }

    fn lower_axis_step(&mut self, s: &ast::Step, first: bool) -> CResult<()> {
        let axis = map_axis(s.axis);
        let test = match &s.test {
            ast::NodeTest::Name(nt) => {
                let role = match axis {
                    ir::AxisIR::Attribute | ir::AxisIR::Namespace => NameRole::Attribute,
                    _ => NameRole::Element,
                };
                ir::NodeTestIR::Name(self.ns.resolve_test(nt, role)?)
            }
            ast::NodeTest::Kind(k) => lower_kind_test(&self.ns, k)?,
        };
        let preds = self.lower_predicates(&s.predicates)?;
        self.emit(ir::OpCode::AxisStep { axis, test, preds, first });
        Ok(())
    }

    // ===== FLWOR =====

    fn lower_flwor(&mut self, clauses: &[ast::Clause], ret: &ast::Expr) -> CResult<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return self.lower_expr(ret);
        };
        match clause {
            ast::Clause::For(b) => {
                self.lower_expr(&b.in_expr)?;
                let var = self.resolve(&b.var, NameRole::Variable)?;
                let pos_var = b.positional.as_ref().map(|p| self.resolve(p, NameRole::Variable)).transpose()?;
                let ty = b.ty.as_ref().map(|t| lower_seq_type(&self.ns, t)).transpose()?;
                self.locals.push(var.clone());
                if let Some(p) = &pos_var {
                    self.locals.push(p.clone());
                }
                let body = self.lower_block(|c| {
                    if let Some(ty) = ty {
                        c.emit(ir::OpCode::LoadVarByName(var.clone()));
                        c.emit(ir::OpCode::Coerce(ty));
                        c.emit(ir::OpCode::Pop);
                    }
                    c.lower_flwor(rest, ret)
                });
                if pos_var.is_some() {
                    self.locals.pop();
                }
                self.locals.pop();
                self.emit(ir::OpCode::ForLoop { var, pos_var, body: body? });
                Ok(())
            }
            ast::Clause::Let(b) => {
                self.lower_expr(&b.value)?;
                if let Some(t) = &b.ty {
                    self.emit(ir::OpCode::Coerce(lower_seq_type(&self.ns, t)?));
                }
                let var = self.resolve(&b.var, NameRole::Variable)?;
                self.emit(ir::OpCode::LetStartByName(var.clone()));
                self.with_local(&var, |c| c.lower_flwor(rest, ret))?;
                self.emit(ir::OpCode::LetEnd);
                Ok(())
            }
            ast::Clause::Where(cond) => {
                self.lower_expr(cond)?;
                self.emit(ir::OpCode::ToEBV);
                let pos_jf = self.code.len();
                self.emit(ir::OpCode::JumpIfFalse(0));
                self.lower_flwor(rest, ret)?;
                let pos_j = self.code.len();
                self.emit(ir::OpCode::Jump(0));
                Self::patch_jump(&mut self.code, pos_jf);
                self.emit(ir::OpCode::MakeSeq(0));
                Self::patch_jump(&mut self.code, pos_j);
                Ok(())
            }
        }
    }

    /// `some $a in A, $b in B satisfies C` nests one loop per binding.
    fn lower_quantified(
        &mut self,
        kind: ir::QuantifierKind,
        bindings: &[ast::QuantifiedBinding],
        satisfies: &ast::Expr,
    ) -> CResult<()> {
        let Some((b, rest)) = bindings.split_first() else {
            self.lower_expr(satisfies)?;
            self.emit(ir::OpCode::ToEBV);
            return Ok(());
        };
        self.lower_expr(&b.in_expr)?;
        if let Some(t) = &b.ty {
            let ty = lower_seq_type(&self.ns, t)?;
            let item_ty = match ty {
                ir::SeqTypeIR::Typed { item, .. } => ir::SeqTypeIR::Typed { item, occ: ir::OccurrenceIR::ZeroOrMore },
                empty @ ir::SeqTypeIR::EmptySequence => empty,
            };
            self.emit(ir::OpCode::Coerce(item_ty));
        }
        let var = self.resolve(&b.var, NameRole::Variable)?;
        let body = self.with_local(&var, |c| c.lower_block(|c| c.lower_quantified(kind, rest, satisfies)))?;
        self.emit(ir::OpCode::QuantLoop { kind, var, body });
        Ok(())
    }

    // ===== Constructors =====

    fn lower_optional(&mut self, e: Option<&ast::Expr>) -> CResult<()> {
        match e {
            Some(e) => self.lower_expr(e),
            None => {
                self.emit(ir::OpCode::MakeSeq(0));
                Ok(())
            }
        }
    }

    fn static_qname(&self, name: &LexicalName, role: NameRole) -> CResult<QName> {
        let en = self.resolve(name, role)?;
        Ok(QName::new(name.prefix(), &en.local, en.ns_uri.as_deref()))
    }

    fn lower_computed_name(&mut self, name: &ast::ComputedName, role: NameRole) -> CResult<ir::ConstructorName> {
        match name {
            ast::ComputedName::Static(n) => Ok(ir::ConstructorName::Static(self.static_qname(n, role)?)),
            ast::ComputedName::Dynamic(e) => {
                self.lower_expr(e)?;
                Ok(ir::ConstructorName::Dynamic(Arc::new(self.ns.clone())))
            }
        }
    }

    fn lower_constructor(&mut self, c: &ast::Constructor) -> CResult<()> {
        use ast::Constructor as C;
        match c {
            C::DirElement(el) => self.lower_dir_element(el),
            C::DirComment(text) => {
                self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(text.clone())));
                self.emit(ir::OpCode::ConstructComment);
                Ok(())
            }
            C::DirPi { target, content } => {
                self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(content.clone())));
                self.emit(ir::OpCode::ConstructPI(Some(target.clone())));
                Ok(())
            }
            C::Document(content) => {
                self.lower_optional(content.as_deref())?;
                self.emit(ir::OpCode::ConstructDocument);
                Ok(())
            }
            C::Text(content) => {
                self.lower_optional(content.as_deref())?;
                self.emit(ir::OpCode::ConstructText);
                Ok(())
            }
            C::Comment(content) => {
                self.lower_optional(content.as_deref())?;
                self.emit(ir::OpCode::ConstructComment);
                Ok(())
            }
            C::Element { name, content } => {
                let name = self.lower_computed_name(name, NameRole::Element)?;
                self.lower_optional(content.as_deref())?;
                self.emit(ir::OpCode::ConstructElement { name, namespaces: Vec::new(), parts: 1 });
                Ok(())
            }
            C::Attribute { name, content } => {
                let name = self.lower_computed_name(name, NameRole::Attribute)?;
                if let ir::ConstructorName::Static(q) = &name
                    && (q.ns_uri.as_deref() == Some(XMLNS_URI) || (q.ns_uri.is_none() && q.local.as_ref() == "xmlns"))
                {
                    return Err(static_err(ErrorCode::XQDY0044, format!("cannot construct attribute {q}")));
                }
                match content {
                    Some(e) => {
                        self.lower_expr(e)?;
                        self.emit(ir::OpCode::JoinAtomized);
                    }
                    None => self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(String::new()))),
                }
                self.emit(ir::OpCode::ConstructAttribute(name));
                Ok(())
            }
            C::ProcessingInstruction { target, content } => {
                let target = match target {
                    ast::ComputedName::Static(LexicalName::NCName(t)) => Some(t.clone()),
                    ast::ComputedName::Static(other) => {
                        return Err(static_err(
                            ErrorCode::XPST0003,
                            format!("processing-instruction target '{other}' must be an NCName"),
                        ));
                    }
                    ast::ComputedName::Dynamic(e) => {
                        self.lower_expr(e)?;
                        None
                    }
                };
                self.lower_optional(content.as_deref())?;
                self.emit(ir::OpCode::ConstructPI(target));
                Ok(())
            }
        }
    }

    fn lower_dir_element(&mut self, el: &ast::DirElement) -> CResult<()> {
        let outer = self.ns.clone();
        let result = self.lower_dir_element_scoped(el);
        self.ns = outer;
        result
    }

    fn lower_dir_element_scoped(&mut self, el: &ast::DirElement) -> CResult<()> {
        let mut namespaces: Vec<(Option<String>, String)> = Vec::new();
        for attr in &el.attributes {
            let prefix = match attr.name.as_str() {
                "xmlns" => None,
                other => match other.strip_prefix("xmlns:") {
                    Some(p) => Some(p.to_string()),
                    None => continue,
                },
            };
            let mut raw = String::new();
            for part in &attr.value {
                match part {
                    ast::AttrValuePart::Text(t) => raw.push_str(t),
                    ast::AttrValuePart::Enclosed(_) => {
                        return Err(static_err(
                            ErrorCode::XQST0022,
                            format!("namespace declaration attribute {} must be a literal", attr.name),
                        ));
                    }
                }
            }
            let uri = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if namespaces.iter().any(|(p, _)| *p == prefix) {
                return Err(static_err(ErrorCode::XQST0071, format!("duplicate namespace declaration {}", attr.name)));
            }
            match prefix.as_deref() {
                None => {
                    if uri == XML_URI || uri == XMLNS_URI {
                        return Err(static_err(ErrorCode::XQST0070, format!("'{uri}' cannot be the default namespace")));
                    }
                    self.ns.set_default_element_namespace(Some(uri.clone()));
                }
                Some("xml") if uri == XML_URI => continue,
                Some(p) => self.ns.bind(p, &uri)?,
            }
            namespaces.push((prefix, uri));
        }

        let name_lex = eqname::parse_eqname(&el.name)?;
        let name = self.static_qname(&name_lex, NameRole::Element)?;

        let mut parts = 0;
        let mut seen: Vec<ExpandedName> = Vec::new();
        for attr in &el.attributes {
            if attr.name == "xmlns" || attr.name.starts_with("xmlns:") {
                continue;
            }
            let lex = eqname::parse_eqname(&attr.name)?;
            let qname = self.static_qname(&lex, NameRole::Attribute)?;
            let expanded = qname.expanded();
            if seen.contains(&expanded) {
                return Err(static_err(ErrorCode::XQST0040, format!("duplicate attribute {}", attr.name)));
            }
            seen.push(expanded);
            self.lower_attribute_value(&attr.value)?;
            self.emit(ir::OpCode::ConstructAttribute(ir::ConstructorName::Static(qname)));
            parts += 1;
        }
        for item in &el.content {
            match item {
                ast::DirContent::Text(t) => self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(t.clone()))),
                ast::DirContent::Enclosed(None) => continue,
                ast::DirContent::Enclosed(Some(e)) | ast::DirContent::Node(e) => self.lower_expr(e)?,
            }
            parts += 1;
        }
        self.emit(ir::OpCode::ConstructElement { name: ir::ConstructorName::Static(name), namespaces, parts });
        Ok(())
    }

    fn lower_attribute_value(&mut self, value: &[ast::AttrValuePart]) -> CResult<()> {
        for part in value {
            match part {
                ast::AttrValuePart::Text(t) => self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(t.clone()))),
                ast::AttrValuePart::Enclosed(Some(e)) => {
                    self.lower_expr(e)?;
                    self.emit(ir::OpCode::JoinAtomized);
                }
                ast::AttrValuePart::Enclosed(None) => {
                    self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(String::new())));
                }
            }
        }
        match value.len() {
            0 => self.emit(ir::OpCode::PushAtomic(XdmAtomicValue::String(String::new()))),
            1 => {}
            n => self.emit(ir::OpCode::StringConcat(n)),
        }
        Ok(())
    }
}

fn map_axis(a: ast::Axis) -> ir::AxisIR {
    use ast::Axis::*;
    match a {
        Child => ir::AxisIR::Child,
        Descendant => ir::AxisIR::Descendant,
        Attribute => ir::AxisIR::Attribute,
        SelfAxis => ir::AxisIR::SelfAxis,
        DescendantOrSelf => ir::AxisIR::DescendantOrSelf,
        FollowingSibling => ir::AxisIR::FollowingSibling,
        Following => ir::AxisIR::Following,
        Namespace => ir::AxisIR::Namespace,
        Parent => ir::AxisIR::Parent,
        Ancestor => ir::AxisIR::Ancestor,
        PrecedingSibling => ir::AxisIR::PrecedingSibling,
        Preceding => ir::AxisIR::Preceding,
        AncestorOrSelf => ir::AxisIR::AncestorOrSelf,
    }
}

fn map_general(op: ast::GeneralComp) -> ir::ComparisonOp {
    use ast::GeneralComp::*;
    match op {
        Eq => ir::ComparisonOp::Eq,
        Ne => ir::ComparisonOp::Ne,
        Lt => ir::ComparisonOp::Lt,
        Le => ir::ComparisonOp::Le,
        Gt => ir::ComparisonOp::Gt,
        Ge => ir::ComparisonOp::Ge,
    }
}

fn map_value(op: ast::ValueComp) -> ir::ComparisonOp {
    use ast::ValueComp::*;
    match op {
        Eq => ir::ComparisonOp::Eq,
        Ne => ir::ComparisonOp::Ne,
        Lt => ir::ComparisonOp::Lt,
        Le => ir::ComparisonOp::Le,
        Gt => ir::ComparisonOp::Gt,
        Ge => ir::ComparisonOp::Ge,
    }
}

fn lower_name_or_wildcard(
    ns: &NamespaceTable,
    name: Option<&ast::ElementNameOrWildcard>,
    role: NameRole,
) -> CResult<Option<ir::NameOrWildcard>> {
    Ok(match name {
        None => None,
        Some(ast::ElementNameOrWildcard::Any) => Some(ir::NameOrWildcard::Any),
        Some(ast::ElementNameOrWildcard::Name(n)) => Some(ir::NameOrWildcard::Name(ns.resolve(n, role)?)),
    })
}

/// Resolves the type annotation of `element(..)` / `attribute(..)` tests. Untyped nodes
/// only carry `xs:untyped` / `xs:untypedAtomic`.
fn annotation_matches(ns: &NamespaceTable, ty: Option<&LexicalName>, element: bool) -> CResult<bool> {
    let Some(ty) = ty else { return Ok(true) };
    let en = ns.resolve(ty, NameRole::Type)?;
    if en.ns_uri.as_deref() != Some(XS) || !type_check::is_known_type(&en.local) {
        return Err(static_err(ErrorCode::XPST0008, format!("type {en} is not defined")));
    }
    Ok(if element {
        matches!(en.local.as_str(), "anyType" | "untyped")
    } else {
        matches!(en.local.as_str(), "anySimpleType" | "untypedAtomic" | "anyAtomicType")
    })
}

fn lower_kind_test(ns: &NamespaceTable, k: &ast::KindTest) -> CResult<ir::NodeTestIR> {
    use ast::KindTest as K;
    Ok(match k {
        K::AnyKind => ir::NodeTestIR::AnyKind,
        K::Text => ir::NodeTestIR::KindText,
        K::Comment => ir::NodeTestIR::KindComment,
        K::NamespaceNode => ir::NodeTestIR::KindNamespace,
        K::ProcessingInstruction(target) => ir::NodeTestIR::KindProcessingInstruction(target.clone()),
        K::Document(inner) => ir::NodeTestIR::KindDocument(
            inner.as_deref().map(|i| lower_kind_test(ns, i).map(Box::new)).transpose()?,
        ),
        K::Element { name, ty, nillable: _ } => ir::NodeTestIR::KindElement {
            name: lower_name_or_wildcard(ns, name.as_ref(), NameRole::Element)?,
            type_matches: annotation_matches(ns, ty.as_ref(), true)?,
        },
        K::Attribute { name, ty } => ir::NodeTestIR::KindAttribute {
            name: lower_name_or_wildcard(ns, name.as_ref(), NameRole::Attribute)?,
            type_matches: annotation_matches(ns, ty.as_ref(), false)?,
        },
        K::SchemaElement(n) | K::SchemaAttribute(n) => {
            let role = if matches!(k, K::SchemaElement(_)) { NameRole::Element } else { NameRole::Attribute };
            let en = ns.resolve(n, role)?;
            return Err(static_err(ErrorCode::XPST0008, format!("no schema declaration for {en}")));
        }
    })
}

fn lower_seq_type(ns: &NamespaceTable, t: &ast::SequenceType) -> CResult<ir::SeqTypeIR> {
    let (item, occ) = match t {
        ast::SequenceType::EmptySequence => return Ok(ir::SeqTypeIR::EmptySequence),
        ast::SequenceType::Typed { item, occ } => (item, occ),
    };
    let item = match item {
        ast::ItemType::Item => ir::ItemTypeIR::AnyItem,
        ast::ItemType::Kind(k) => ir::ItemTypeIR::Kind(lower_kind_test(ns, k)?),
        ast::ItemType::Atomic(n) => {
            let en = ns.resolve(n, NameRole::Type)?;
            if en.ns_uri.as_deref() != Some(XS) || !type_check::is_atomic_type(&en.local) {
                return Err(static_err(ErrorCode::XPST0051, format!("{en} is not a known atomic type")));
            }
            ir::ItemTypeIR::Atomic(en)
        }
    };
    let occ = match occ {
        ast::Occurrence::One => ir::OccurrenceIR::One,
        ast::Occurrence::ZeroOrOne => ir::OccurrenceIR::ZeroOrOne,
        ast::Occurrence::ZeroOrMore => ir::OccurrenceIR::ZeroOrMore,
        ast::Occurrence::OneOrMore => ir::OccurrenceIR::OneOrMore,
    };
    Ok(ir::SeqTypeIR::Typed { item, occ })
}

fn lower_single_type(ns: &NamespaceTable, t: &ast::SingleType) -> CResult<ir::SingleTypeIR> {
    let en = ns.resolve(&t.atomic, NameRole::Type)?;
    if en.ns_uri.as_deref() == Some(XS) {
        if matches!(en.local.as_str(), "NOTATION" | "anyAtomicType" | "anySimpleType") {
            return Err(static_err(ErrorCode::XPST0080, format!("cannot cast to abstract type {en}")));
        }
        if type_check::is_cast_target(&en.local) {
            return Ok(ir::SingleTypeIR { atomic: en, optional: t.optional });
        }
    }
    Err(static_err(ErrorCode::XPST0051, format!("{en} is not a known atomic type")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_variable_is_static_error() {
        let err = compile_xquery("$nope").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[test]
    fn declared_external_variable_compiles() {
        let ctx = crate::engine::runtime::StaticContextBuilder::new()
            .with_variable(ExpandedName::local("x"))
            .build();
        assert!(compile_xquery_with_context("$x + 1", &ctx).is_ok());
    }

    #[test]
    fn unknown_function_reports_arity() {
        let err = compile_xquery("fn:count()").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0017);
    }

    #[test]
    fn function_without_namespace_rejected() {
        let err = compile_xquery("declare default function namespace ''; declare function f() { 1 }; 1")
            .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0060);
    }

    #[test]
    fn duplicate_prolog_prefix() {
        let err = compile_xquery("declare namespace p = 'a'; declare namespace p = 'b'; 1").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0033);
    }

    #[test]
    fn pragma_without_fallback() {
        let err = compile_xquery("declare namespace p = 'urn:p'; (# p:x #) {}").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0079);
    }

    #[test]
    fn relative_path_loads_context_first() {
        let compiled = compile_xquery("child::a").unwrap();
        assert_eq!(compiled.instrs.0[0], ir::OpCode::LoadContextItem);
        assert!(matches!(compiled.instrs.0[1], ir::OpCode::AxisStep { first: true, .. }));
    }
}
