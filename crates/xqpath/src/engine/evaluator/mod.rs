//! Stack machine executing compiled instruction sequences.
//!
//! Every instruction consumes its operands from the value stack and pushes one sequence.
//! Nested code (predicates, loop and function bodies, path bodies) runs through
//! [`Vm::run`] with its own focus.

pub(crate) mod casting;
pub(crate) mod comparison;
pub(crate) mod numeric;
pub(crate) mod set_ops;
pub mod type_check;

use std::collections::HashMap;
use std::mem;

use smallvec::SmallVec;

use crate::compiler::compile_xquery;
use crate::compiler::ir::{CompiledXQuery, ConstructorName, InstrSeq, OpCode, QuantifierKind, SingleTypeIR};
use crate::engine::constructors;
use crate::engine::runtime::{CallCtx, DynamicContext, Error, ErrorCode, Focus};
use crate::engine::step::{Step, effective_boolean_value, evaluate_step, filter_by_predicates};
use crate::eqname::NameRole;
use crate::model::{Node, NodeKind, QName};
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};

use self::numeric::ArithOp;

/// Nesting limit for user function calls.
const MAX_CALL_DEPTH: usize = 1000;

/// Evaluates a compiled query. The context item of `dyn_ctx` (if any) is the initial focus.
pub fn evaluate(compiled: &CompiledXQuery, dyn_ctx: &DynamicContext) -> Result<XdmSequence, Error> {
    let focus = match &dyn_ctx.context_item {
        Some(item) => Focus::of(item.clone()),
        None => Focus::absent(),
    };
    let mut vm = Vm::new(compiled, dyn_ctx);
    vm.init_globals(&focus)?;
    let result = vm.run(&compiled.instrs, &focus)?;
    tracing::debug!(items = result.len(), "query evaluated");
    Ok(result)
}

/// Compiles `src` with the default static context and evaluates it.
pub fn evaluate_expr(src: &str, dyn_ctx: &DynamicContext) -> Result<XdmSequence, Error> {
    let compiled = compile_xquery(src)?;
    evaluate(&compiled, dyn_ctx)
}

struct Vm<'a> {
    compiled: &'a CompiledXQuery,
    dyn_ctx: &'a DynamicContext,
    stack: SmallVec<[XdmSequence; 16]>,
    locals: SmallVec<[(ExpandedName, XdmSequence); 12]>,
    globals: HashMap<ExpandedName, XdmSequence>,
    depth: usize,
}

fn integer(n: usize) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(n).unwrap_or(i64::MAX)))]
}

fn boolean(b: bool) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

fn nodes_to_sequence(nodes: Vec<Node>) -> XdmSequence {
    nodes.into_iter().map(XdmItem::Node).collect()
}

impl<'a> Vm<'a> {
    fn new(compiled: &'a CompiledXQuery, dyn_ctx: &'a DynamicContext) -> Self {
        Self {
            compiled,
            dyn_ctx,
            stack: SmallVec::new(),
            locals: SmallVec::new(),
            globals: HashMap::new(),
            depth: 0,
        }
    }

    /// Binds prolog variables in declaration order.
    fn init_globals(&mut self, focus: &Focus) -> Result<(), Error> {
        let compiled = self.compiled;
        for global in &compiled.globals {
            let supplied = if global.external { self.dyn_ctx.variable(&global.name).cloned() } else { None };
            let value = match (supplied, &global.init) {
                (Some(v), _) => v,
                (None, Some(init)) => self.run(init, focus)?,
                (None, None) => {
                    return Err(Error::from_code(
                        ErrorCode::XPDY0002,
                        format!("no value supplied for external variable ${}", global.name),
                    ));
                }
            };
            let value = match &global.ty {
                Some(ty) => type_check::coerce(value, ty, &compiled.static_ctx.namespaces)?,
                None => value,
            };
            self.globals.insert(global.name.clone(), value);
        }
        Ok(())
    }

    fn push(&mut self, seq: XdmSequence) {
        self.stack.push(seq);
    }

    fn pop(&mut self) -> XdmSequence {
        self.stack.pop().unwrap_or_default()
    }

    /// Pops the top `n` sequences, bottom first.
    fn pop_n(&mut self, n: usize) -> Vec<XdmSequence> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.drain(at..).collect()
    }

    fn pop_bool(&mut self) -> Result<bool, Error> {
        let seq = self.pop();
        effective_boolean_value(&seq)
    }

    /// Executes `code` with `focus` and returns the sequence it leaves on the stack.
    fn run(&mut self, code: &InstrSeq, focus: &Focus) -> Result<XdmSequence, Error> {
        let base = self.stack.len();
        if let Err(e) = self.execute(code, focus) {
            self.stack.truncate(base);
            return Err(e);
        }
        Ok(self.pop())
    }

    fn execute(&mut self, code: &InstrSeq, focus: &Focus) -> Result<(), Error> {
        let ops = &code.0;
        let mut ip = 0;
        while ip < ops.len() {
            match &ops[ip] {
                OpCode::JumpIfTrue(d) => {
                    if self.pop_bool()? {
                        ip += 1 + d;
                        continue;
                    }
                }
                OpCode::JumpIfFalse(d) => {
                    if !self.pop_bool()? {
                        ip += 1 + d;
                        continue;
                    }
                }
                OpCode::Jump(d) => {
                    ip += 1 + d;
                    continue;
                }
                op => self.step(op, focus)?,
            }
            ip += 1;
        }
        Ok(())
    }

    fn step(&mut self, op: &OpCode, focus: &Focus) -> Result<(), Error> {
        match op {
            OpCode::PushAtomic(v) => self.push(vec![XdmItem::Atomic(v.clone())]),
            OpCode::LoadVarByName(name) => {
                let value = self.lookup_variable(name)?;
                self.push(value);
            }
            OpCode::LoadContextItem => self.push(vec![focus.context_item()?.clone()]),
            OpCode::Position => self.push(integer(focus.position()?)),
            OpCode::Last => self.push(integer(focus.size()?)),
            OpCode::ToRoot => {
                let root = focus.context_node()?.root();
                if root.kind() != NodeKind::Document {
                    return Err(Error::from_code(
                        ErrorCode::XPDY0050,
                        format!("root of the context node is a {} node, not a document node", root.kind().as_str()),
                    ));
                }
                self.push(vec![XdmItem::Node(root)]);
            }

            OpCode::AxisStep { axis, test, preds, first } => {
                let input = self.pop();
                let multiple = input.len() > 1;
                let mut out = Vec::new();
                for item in input {
                    let node = match item {
                        XdmItem::Node(n) => n,
                        XdmItem::Atomic(a) => {
                            let code = if *first { ErrorCode::XPTY0020 } else { ErrorCode::XPTY0019 };
                            return Err(Error::from_code(
                                code,
                                format!("axis step applied to {}, expected a node", a.type_name()),
                            ));
                        }
                    };
                    let step = Step { axis: *axis, test, predicates: preds.as_slice() };
                    out.extend(evaluate_step(&Focus::of(node), step, |p, f| self.run(p, f))?);
                }
                let out = if multiple { set_ops::sort_distinct(out) } else { out };
                self.push(nodes_to_sequence(out));
            }
            OpCode::PathMap(body) => {
                let mapped = self.path_map(body)?;
                self.push(mapped);
            }
            OpCode::SimpleMap(body) => {
                let input = self.pop();
                let mut out = Vec::new();
                self.for_each_focus(input, |vm, focus| {
                    out.extend(vm.run(body, &focus)?);
                    Ok(())
                })?;
                self.push(out);
            }
            OpCode::ApplyPredicates(preds) => {
                let input = self.pop();
                let kept = filter_by_predicates(input, preds, &mut |p, f| self.run(p, f))?;
                self.push(kept);
            }

            OpCode::Add => self.arithmetic(ArithOp::Add)?,
            OpCode::Sub => self.arithmetic(ArithOp::Sub)?,
            OpCode::Mul => self.arithmetic(ArithOp::Mul)?,
            OpCode::Div => self.arithmetic(ArithOp::Div)?,
            OpCode::IDiv => self.arithmetic(ArithOp::IDiv)?,
            OpCode::Mod => self.arithmetic(ArithOp::Mod)?,
            OpCode::Neg | OpCode::Plus => {
                let operand = self.pop();
                let out = numeric::unary(operand, matches!(op, OpCode::Neg))?;
                self.push(out);
            }
            OpCode::ToEBV => {
                let b = self.pop_bool()?;
                self.push(boolean(b));
            }
            OpCode::Pop => {
                self.pop();
            }
            OpCode::JumpIfTrue(_) | OpCode::JumpIfFalse(_) | OpCode::Jump(_) => {
                unreachable!("jumps are handled by execute")
            }

            OpCode::CompareValue(cmp) => {
                let rhs = self.pop();
                let lhs = self.pop();
                let out = comparison::value_compare(*cmp, lhs, rhs)?;
                self.push(out);
            }
            OpCode::CompareGeneral(cmp) => {
                let rhs = self.pop();
                let lhs = self.pop();
                let b = comparison::general_compare(*cmp, &lhs, &rhs)?;
                self.push(boolean(b));
            }
            OpCode::NodeIs | OpCode::NodeBefore | OpCode::NodeAfter => {
                let rhs = single_node(self.pop())?;
                let lhs = single_node(self.pop())?;
                let out = match (lhs, rhs) {
                    (Some(a), Some(b)) => boolean(match op {
                        OpCode::NodeIs => a == b,
                        OpCode::NodeBefore => a.compare_document_order(&b).is_lt(),
                        _ => a.compare_document_order(&b).is_gt(),
                    }),
                    _ => Vec::new(),
                };
                self.push(out);
            }

            OpCode::MakeSeq(n) => {
                let parts = self.pop_n(*n);
                self.push(parts.into_iter().flatten().collect());
            }
            OpCode::StringConcat(n) => {
                let mut out = String::new();
                for part in self.pop_n(*n) {
                    match part.as_slice() {
                        [] => {}
                        [item] => out.push_str(&item.atomize().canonical_string()),
                        _ => {
                            return Err(Error::from_code(
                                ErrorCode::XPTY0004,
                                "operand of || must be a single value or empty",
                            ));
                        }
                    }
                }
                self.push(vec![XdmItem::Atomic(XdmAtomicValue::String(out))]);
            }
            OpCode::Union | OpCode::Intersect | OpCode::Except => {
                let rhs = self.pop();
                let lhs = self.pop();
                let out = match op {
                    OpCode::Union => set_ops::union(lhs, rhs)?,
                    OpCode::Intersect => set_ops::intersect(lhs, rhs)?,
                    _ => set_ops::except(lhs, rhs)?,
                };
                self.push(out);
            }
            OpCode::RangeTo => {
                let end = self.range_bound()?;
                let start = self.range_bound()?;
                let out = match (start, end) {
                    (Some(a), Some(b)) if a <= b => (a..=b).map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(i))).collect(),
                    _ => Vec::new(),
                };
                self.push(out);
            }

            OpCode::LetStartByName(name) => {
                let value = self.pop();
                self.locals.push((name.clone(), value));
            }
            OpCode::LetEnd => {
                self.locals.pop();
            }
            OpCode::ForLoop { var, pos_var, body } => {
                let input = self.pop();
                let mut out = Vec::new();
                for (i, item) in input.into_iter().enumerate() {
                    self.locals.push((var.clone(), vec![item]));
                    if let Some(p) = pos_var {
                        self.locals.push((p.clone(), integer(i + 1)));
                    }
                    let result = self.run(body, focus);
                    if pos_var.is_some() {
                        self.locals.pop();
                    }
                    self.locals.pop();
                    out.extend(result?);
                }
                self.push(out);
            }
            OpCode::QuantLoop { kind, var, body } => {
                let input = self.pop();
                let want = matches!(kind, QuantifierKind::Some);
                let mut outcome = !want;
                for item in input {
                    self.locals.push((var.clone(), vec![item]));
                    let result = self.run(body, focus);
                    self.locals.pop();
                    if effective_boolean_value(&result?)? == want {
                        outcome = want;
                        break;
                    }
                }
                self.push(boolean(outcome));
            }

            OpCode::Cast(ty) => {
                let operand = self.pop();
                let out = match self.cast(operand, ty)? {
                    Some(v) => vec![XdmItem::Atomic(v)],
                    None => Vec::new(),
                };
                self.push(out);
            }
            OpCode::Castable(ty) => {
                let operand = self.pop();
                let ok = self.cast(operand, ty).is_ok();
                self.push(boolean(ok));
            }
            OpCode::Treat(ty) => {
                let value = self.pop();
                if !type_check::instance_of(&value, ty) {
                    return Err(Error::from_code(
                        ErrorCode::XPDY0050,
                        format!("treat as {}: value does not match", type_check::describe(ty)),
                    ));
                }
                self.push(value);
            }
            OpCode::InstanceOf(ty) => {
                let value = self.pop();
                self.push(boolean(type_check::instance_of(&value, ty)));
            }
            OpCode::Coerce(ty) => {
                let value = self.pop();
                let out = type_check::coerce(value, ty, &self.compiled.static_ctx.namespaces)?;
                self.push(out);
            }

            OpCode::CallByName(name, argc) => {
                let args = self.pop_n(*argc);
                let static_ctx = &*self.compiled.static_ctx;
                let f = static_ctx.functions.resolve(name, *argc).map_err(|e| e.into_error(*argc))?;
                let ctx = CallCtx { dyn_ctx: self.dyn_ctx, static_ctx, focus };
                let out = f(&ctx, &args)?;
                self.push(out);
            }
            OpCode::CallUser(index, argc) => {
                let out = self.call_user(*index, *argc)?;
                self.push(out);
            }

            OpCode::ConstructDocument => {
                let content = self.pop();
                let node = constructors::construct_document(&content)?;
                self.push(vec![XdmItem::Node(node)]);
            }
            OpCode::ConstructText => {
                let content = self.pop();
                let out = constructors::construct_text(&content).map(XdmItem::Node).into_iter().collect();
                self.push(out);
            }
            OpCode::ConstructComment => {
                let content = self.pop();
                let node = constructors::construct_comment(&content)?;
                self.push(vec![XdmItem::Node(node)]);
            }
            OpCode::ConstructPI(target) => {
                let content = self.pop();
                let target = match target {
                    Some(t) => t.clone(),
                    None => constructors::resolve_pi_target(&self.pop())?,
                };
                let node = constructors::construct_processing_instruction(&target, &content)?;
                self.push(vec![XdmItem::Node(node)]);
            }
            OpCode::ConstructAttribute(name) => {
                let value = constructors::join_atomized(&self.pop());
                let qname = self.constructor_name(name, NameRole::Attribute)?;
                let node = constructors::construct_attribute(qname, &value)?;
                self.push(vec![XdmItem::Node(node)]);
            }
            OpCode::ConstructElement { name, namespaces, parts } => {
                let content = self.pop_n(*parts);
                let qname = self.constructor_name(name, NameRole::Element)?;
                let node = constructors::construct_element(qname, namespaces, &content)?;
                self.push(vec![XdmItem::Node(node)]);
            }
            OpCode::JoinAtomized => {
                let joined = constructors::join_atomized(&self.pop());
                self.push(vec![XdmItem::Atomic(XdmAtomicValue::String(joined))]);
            }
        }
        Ok(())
    }

    fn lookup_variable(&self, name: &ExpandedName) -> Result<XdmSequence, Error> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        self.globals
            .get(name)
            .or_else(|| self.dyn_ctx.variable(name))
            .cloned()
            .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, format!("variable ${name} has no value")))
    }

    fn arithmetic(&mut self, op: ArithOp) -> Result<(), Error> {
        let rhs = self.pop();
        let lhs = self.pop();
        let out = numeric::arithmetic(op, lhs, rhs)?;
        self.push(out);
        Ok(())
    }

    /// `E1/E2` where `E2` is not an axis step.
    /// Runs `f` with each item of `input` as the context item, position and size set.
    fn for_each_focus(
        &mut self,
        input: XdmSequence,
        mut f: impl FnMut(&mut Self, Focus) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let size = input.len();
        for (i, item) in input.into_iter().enumerate() {
            f(self, Focus::new(item, i + 1, size))?;
        }
        Ok(())
    }

    fn path_map(&mut self, body: &InstrSeq) -> Result<XdmSequence, Error> {
        let input = self.pop();
        if let Some(XdmItem::Atomic(a)) = input.iter().find(|item| matches!(item, XdmItem::Atomic(_))) {
            return Err(Error::from_code(
                ErrorCode::XPTY0019,
                format!("left operand of '/' contains {}, expected nodes only", a.type_name()),
            ));
        }
        let mut nodes = Vec::new();
        let mut atomics = Vec::new();
        self.for_each_focus(input, |vm, focus| {
            for result in vm.run(body, &focus)? {
                match result {
                    XdmItem::Node(n) => nodes.push(n),
                    atomic @ XdmItem::Atomic(_) => atomics.push(atomic),
                }
            }
            if !nodes.is_empty() && !atomics.is_empty() {
                return Err(Error::from_code(
                    ErrorCode::XPTY0018,
                    "result of a path step mixes nodes and atomic values",
                ));
            }
            Ok(())
        })?;
        if atomics.is_empty() {
            Ok(nodes_to_sequence(set_ops::sort_distinct(nodes)))
        } else {
            Ok(atomics)
        }
    }

    fn range_bound(&mut self) -> Result<Option<i64>, Error> {
        let seq = self.pop();
        let atom = match seq.as_slice() {
            [] => return Ok(None),
            [item] => item.atomize(),
            _ => return Err(Error::from_code(ErrorCode::XPTY0004, "operand of 'to' must be a single value")),
        };
        let atom = match atom {
            XdmAtomicValue::UntypedAtomic(_) => {
                casting::cast_atomic(&atom, "integer", &self.compiled.static_ctx.namespaces)?
            }
            other => other,
        };
        match atom {
            XdmAtomicValue::Integer(i) => Ok(Some(i)),
            other => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("operand of 'to' must be xs:integer, got {}", other.type_name()),
            )),
        }
    }

    fn cast(&self, operand: XdmSequence, ty: &SingleTypeIR) -> Result<Option<XdmAtomicValue>, Error> {
        let atom = match operand.as_slice() {
            [] if ty.optional => return Ok(None),
            [] => return Err(Error::from_code(ErrorCode::XPTY0004, format!("cannot cast an empty sequence to {}", ty.atomic))),
            [item] => item.atomize(),
            _ => return Err(Error::from_code(ErrorCode::XPTY0004, "cast operand must be a single value")),
        };
        casting::cast_atomic(&atom, &ty.atomic.local, &self.compiled.static_ctx.namespaces).map(Some)
    }

    fn constructor_name(&mut self, name: &ConstructorName, role: NameRole) -> Result<QName, Error> {
        match name {
            ConstructorName::Static(q) => Ok(q.clone()),
            ConstructorName::Dynamic(namespaces) => {
                let value = self.pop();
                constructors::resolve_constructor_name(&value, namespaces, role)
            }
        }
    }

    fn call_user(&mut self, index: usize, argc: usize) -> Result<XdmSequence, Error> {
        let compiled = self.compiled;
        let Some(func) = compiled.functions.get(index) else {
            return Err(Error::from_code(ErrorCode::XPST0017, format!("no user function with index {index}")));
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::from_code(
                ErrorCode::FOER0000,
                format!("maximum call depth of {MAX_CALL_DEPTH} exceeded calling {}", func.name),
            ));
        }
        let args = self.pop_n(argc);
        let mut frame = SmallVec::new();
        for ((name, ty), value) in func.params.iter().zip(args) {
            let value = match ty {
                Some(ty) => type_check::coerce(value, ty, &compiled.static_ctx.namespaces)?,
                None => value,
            };
            frame.push((name.clone(), value));
        }
        tracing::trace!(function = %func.name, depth = self.depth, "calling user function");
        let saved = mem::replace(&mut self.locals, frame);
        self.depth += 1;
        let result = self.run(&func.body, &Focus::absent());
        self.depth -= 1;
        self.locals = saved;
        result
    }
}

/// Operand of a node comparison: empty, or exactly one node.
fn single_node(seq: XdmSequence) -> Result<Option<Node>, Error> {
    let mut items = seq.into_iter();
    match (items.next(), items.next()) {
        (None, _) => Ok(None),
        (Some(XdmItem::Node(n)), None) => Ok(Some(n)),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "operand of a node comparison must be a single node")),
    }
}
