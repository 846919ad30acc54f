//! The tree-walking evaluator.
//!
//! Compiled templates are executed by walking the optimized statement
//! tree against a layered [`Context`].  Dispatch is a tagged match
//! over the node kinds; template inheritance, macros and recursive
//! loops re-enter the evaluator with freshly prepared state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::output::{CaptureMode, Output};
use crate::program::CompiledTemplate;
use crate::sandbox::{SandboxBinOp, SandboxUnaryOp};
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::{
    ops, UndefinedKind, UndefinedOrigin, Value, ValueIter, ValueMap,
};

pub(crate) mod blocks;
pub(crate) mod context;
pub(crate) mod loops;
pub(crate) mod macro_object;
pub(crate) mod namespace;
mod state;

pub use self::state::State;

use self::blocks::{BlockRef, SelfRef};
use self::context::{Context, Frame};
use self::loops::{LoopObject, LoopState, RecurseInfo};
use self::macro_object::{MacroObject, ModuleObject};
use self::namespace::Namespace;

// the cost of a single include against the recursion limit
const INCLUDE_RECURSION_COST: usize = 10;

// the cost of a macro call against the recursion limit
const MACRO_RECURSION_COST: usize = 4;

/// Control flow out of a statement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
}

pub(crate) fn undefined_kind(behavior: UndefinedBehavior) -> UndefinedKind {
    match behavior {
        UndefinedBehavior::Lenient => UndefinedKind::Lenient,
        UndefinedBehavior::Chainable => UndefinedKind::Chainable,
        UndefinedBehavior::Debug => UndefinedKind::Debug,
        UndefinedBehavior::Strict => UndefinedKind::Strict,
    }
}

/// Fails when a strict undefined is used as a boolean.
pub(crate) fn value_is_true(value: &Value) -> Result<bool, Error> {
    if value.undefined_kind() == Some(UndefinedKind::Strict) {
        Err(value.undefined_error())
    } else {
        Ok(value.is_true())
    }
}

fn assert_not_strict(value: &Value) -> Result<(), Error> {
    if value.undefined_kind() == Some(UndefinedKind::Strict) {
        Err(value.undefined_error())
    } else {
        Ok(())
    }
}

/// Evaluates macros from filter or object context.
pub(crate) fn call_macro<'env>(
    mac: &MacroObject,
    state: &State<'env>,
    locals: Vec<(String, Value)>,
) -> Result<Value, Error> {
    let env = state.env;
    let mut ctx = Context::new_with_frame(Frame::new(state.base_ctx()), env.recursion_limit());
    ctx.incr_depth(state.depth() + MACRO_RECURSION_COST)?;
    let mut frame = Frame::new(mac.closure.clone());
    for (key, value) in locals {
        frame.locals.insert(key, value);
    }
    ctx.push_frame(frame)?;
    let mut sub_state = State::new(
        env,
        ctx,
        state.auto_escape,
        BTreeMap::new(),
        state.name.clone(),
    );
    let mut buf = String::new();
    {
        let mut out = Output::with_string(&mut buf);
        let evaluator = Evaluator { env };
        evaluator.eval_stmts(&mac.body, &mut sub_state, &mut out)?;
    }
    Ok(if !matches!(state.auto_escape, AutoEscape::None) {
        Value::from_safe_string(buf)
    } else {
        Value::from(buf)
    })
}

/// Renders a compiled template into the given output.
pub(crate) fn render_template(
    env: &Environment,
    compiled: &Arc<CompiledTemplate>,
    root: Value,
    out: &mut Output,
) -> Result<(), Error> {
    let ctx = Context::new_with_frame(Frame::new(root), env.recursion_limit());
    let mut state = State::new(
        env,
        ctx,
        compiled.initial_auto_escape,
        BTreeMap::new(),
        Arc::from(compiled.name.as_str()),
    );
    let evaluator = Evaluator { env };
    evaluator
        .eval_template(&mut state, compiled.clone(), out)
        .map_err(|mut err| {
            err.attach_template_source(&compiled.source);
            err
        })
}

/// Evaluates a standalone expression against a context value.
pub(crate) fn eval_expression(
    env: &Environment,
    expr: &ast::Expr,
    root: Value,
) -> Result<Value, Error> {
    let ctx = Context::new_with_frame(Frame::new(root), env.recursion_limit());
    let mut state = State::new(
        env,
        ctx,
        AutoEscape::None,
        BTreeMap::new(),
        Arc::from("<expression>"),
    );
    let evaluator = Evaluator { env };
    evaluator.eval_expr(expr, &mut state)
}

pub(crate) struct Evaluator<'env> {
    pub(crate) env: &'env Environment,
}

impl<'env> Evaluator<'env> {
    /// Evaluates a template, following the inheritance chain.
    ///
    /// Blocks of the template are registered first; when an `extends`
    /// executes, everything the child emits afterwards is discarded
    /// and the parent's root is rendered with the merged block table.
    fn eval_template(
        &self,
        state: &mut State<'env>,
        first: Arc<CompiledTemplate>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let mut current = first;
        let mut seen = vec![current.name.clone()];

        for (name, layer) in &current.program.blocks {
            state
                .blocks
                .entry(name.clone())
                .or_default()
                .push_outer(layer.clone());
        }

        loop {
            self.eval_stmts(&current.program.root, state, out)?;
            match state.pending_parent.take() {
                None => break,
                Some(parent_name) => {
                    // everything the extending template emitted after
                    // the extends tag goes nowhere
                    out.end_capture(AutoEscape::None);
                    if seen.contains(&parent_name) {
                        return Err(Error::new(
                            ErrorKind::InvalidOperation,
                            format!("template {parent_name:?} extends itself"),
                        ));
                    }
                    let parent = self.env.get_compiled_template(&parent_name)?;
                    seen.push(parent_name);
                    for (name, layer) in &parent.program.blocks {
                        state
                            .blocks
                            .entry(name.clone())
                            .or_default()
                            .push_outer(layer.clone());
                    }
                    state.name = Arc::from(parent.name.as_str());
                    current = parent;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn eval_stmts(
        &self,
        stmts: &[ast::Stmt],
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        for stmt in stmts {
            match self.eval_stmt(stmt, state, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_stmt(
        &self,
        stmt: &ast::Stmt,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let name = state.name.clone();
        self.eval_stmt_impl(stmt, state, out).map_err(|mut err| {
            err.set_location(&name, stmt.line());
            err
        })
    }

    fn eval_stmt_impl(
        &self,
        stmt: &ast::Stmt,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        match stmt {
            ast::Stmt::Template(node) => return self.eval_stmts(&node.children, state, out),
            ast::Stmt::EmitRaw(node) => {
                out.log_raw(&node.raw);
                out.write_str(&node.raw)?;
            }
            ast::Stmt::EmitExpr(node) => {
                let value = self.eval_expr(&node.expr, state)?;
                let value = self.env.finalize_value(state, value)?;
                out.log_value(&value);
                self.env.format(&value, state, out)?;
            }
            ast::Stmt::ForLoop(node) => {
                let iter_value = self.eval_expr(&node.iter, state)?;
                assert_not_strict(&iter_value)?;
                let iter =
                    self.prepare_loop_iter(&node.target, node.filter_expr.as_ref(), iter_value, state)?;
                let recurse = node.recursive.then(|| {
                    Arc::new(RecurseInfo {
                        target: node.target.clone(),
                        body: node.body.clone(),
                        filter_expr: node.filter_expr.clone(),
                    })
                });
                self.run_loop(
                    &node.target,
                    &node.body[..],
                    &node.else_body,
                    recurse,
                    iter,
                    state,
                    out,
                    0,
                )?;
            }
            ast::Stmt::IfCond(node) => {
                let value = self.eval_expr(&node.expr, state)?;
                let flow = if value_is_true(&value)? {
                    self.eval_stmts(&node.true_body, state, out)?
                } else {
                    self.eval_stmts(&node.false_body, state, out)?
                };
                return Ok(flow);
            }
            ast::Stmt::WithBlock(node) => {
                state.ctx.push_frame(Frame::default())?;
                for (target, expr) in &node.assignments {
                    let value = self.eval_expr(expr, state)?;
                    self.assign(target, value, state)?;
                }
                let flow = self.eval_stmts(&node.body, state, out)?;
                state.ctx.pop_frame();
                return Ok(flow);
            }
            ast::Stmt::Set(node) => {
                let value = self.eval_expr(&node.expr, state)?;
                self.assign(&node.target, value, state)?;
            }
            ast::Stmt::SetBlock(node) => {
                out.begin_capture(CaptureMode::Capture);
                let flow = self.eval_stmts(&node.body, state, out);
                let value = out.end_capture(state.auto_escape);
                let flow = flow?;
                let value = match node.filter {
                    Some(ast::Expr::Filter(ref filter)) => {
                        self.eval_filter_node(&**filter, state, Some(&value))?
                    }
                    _ => value,
                };
                self.assign(&node.target, value, state)?;
                return Ok(flow);
            }
            ast::Stmt::AutoEscape(node) => {
                let value = self.eval_expr(&node.enabled, state)?;
                let old = state.auto_escape;
                state.auto_escape = derive_auto_escape(&value)?;
                let flow = self.eval_stmts(&node.body, state, out);
                state.auto_escape = old;
                return flow;
            }
            ast::Stmt::FilterBlock(node) => {
                out.begin_capture(CaptureMode::Capture);
                let flow = self.eval_stmts(&node.body, state, out);
                let value = out.end_capture(state.auto_escape);
                let flow = flow?;
                let value = match node.filter {
                    ast::Expr::Filter(ref filter) => {
                        self.eval_filter_node(&**filter, state, Some(&value))?
                    }
                    _ => value,
                };
                self.env.format(&value, state, out)?;
                return Ok(flow);
            }
            ast::Stmt::Block(node) => {
                self.render_block_layer(&node.name, 0, node.scoped, state, out)?;
            }
            ast::Stmt::Extends(node) => {
                let value = self.eval_expr(&node.name, state)?;
                let name = value.as_str().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        "extends requires a template name",
                    )
                })?;
                state.pending_parent = Some(name.to_string());
                out.begin_capture(CaptureMode::Discard);
            }
            ast::Stmt::Include(node) => {
                self.eval_include(node, state, out)?;
            }
            ast::Stmt::Import(node) => {
                let module = self.load_module(&node.expr, node.with_context, state)?;
                self.assign(&node.name, module, state)?;
            }
            ast::Stmt::FromImport(node) => {
                let module = self.load_module(&node.expr, node.with_context, state)?;
                for (name, alias) in &node.names {
                    let name_str = match name {
                        ast::Expr::Var(var) => var.id.as_str(),
                        _ => continue,
                    };
                    let value = module.get_attr_fast(name_str).unwrap_or_else(|| {
                        Value::undefined_with(
                            undefined_kind(self.env.undefined_behavior()),
                            UndefinedOrigin {
                                owner: Some("imported template".to_string()),
                                name: name_str.to_string(),
                            },
                        )
                    });
                    let target = alias.as_ref().unwrap_or(name);
                    self.assign(target, value, state)?;
                }
            }
            ast::Stmt::Macro(node) => {
                let value = self.build_macro(node, state)?;
                state.ctx.store(&node.name, value);
            }
            ast::Stmt::CallBlock(node) => {
                let caller = self.build_macro(&node.macro_decl, state)?;
                let value = self.eval_call(&node.call, state, Some(caller))?;
                self.env.format(&value, state, out)?;
            }
            ast::Stmt::Do(node) => {
                self.eval_expr(&node.expr, state)?;
            }
            ast::Stmt::Trans(node) => {
                crate::i18n::render_trans(self, node, state, out)?;
            }
            ast::Stmt::Continue(_) => return Ok(Flow::Continue),
            ast::Stmt::Break(_) => return Ok(Flow::Break),
        }
        Ok(Flow::Normal)
    }

    /// Applies the optional inline loop filter, materializing the
    /// filtered stream.  Unfiltered loops keep streaming lazily.
    fn prepare_loop_iter(
        &self,
        target: &ast::Expr,
        filter: Option<&ast::Expr>,
        value: Value,
        state: &mut State<'env>,
    ) -> Result<ValueIter, Error> {
        let iter = value.try_iter()?;
        let filter = match filter {
            None => return Ok(iter),
            Some(filter) => filter,
        };
        state.ctx.push_frame(Frame::default())?;
        let mut rv = Vec::new();
        for item in iter {
            self.assign(target, item.clone(), state)?;
            if value_is_true(&self.eval_expr(filter, state)?)? {
                rv.push(item);
            }
        }
        state.ctx.pop_frame();
        Ok(Value::from(rv).try_iter().unwrap())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_loop(
        &self,
        target: &ast::Expr,
        body: &[ast::Stmt],
        else_body: &[ast::Stmt],
        recurse: Option<Arc<RecurseInfo>>,
        iter: ValueIter,
        state: &mut State<'env>,
        out: &mut Output,
        depth: usize,
    ) -> Result<(), Error> {
        let mut frame = Frame::default();
        frame.current_loop = Some(LoopState::new(iter, depth, recurse));
        state.ctx.push_frame(frame)?;
        loop {
            let item = match state.ctx.current_loop().unwrap().advance() {
                Some(item) => item,
                None => break,
            };
            self.assign(target, item, state)?;
            if let Flow::Break = self.eval_stmts(body, state, out)? {
                break;
            }
        }
        let frame = state.ctx.pop_frame();
        let did_not_iterate = frame
            .current_loop
            .map_or(true, |l| l.did_not_iterate());
        if did_not_iterate && !else_body.is_empty() {
            self.eval_stmts(else_body, state, out)?;
        }
        Ok(())
    }

    fn eval_include(
        &self,
        node: &ast::Include,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let name_value = self.eval_expr(&node.name, state)?;
        let mut choices = Vec::new();
        if name_value.as_str().is_some() {
            choices.push(name_value.clone());
        } else if let Ok(iter) = name_value.try_iter() {
            choices.extend(iter);
        }
        if choices.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "include requires a template name or a list of names",
            ));
        }

        let multiple = choices.len() > 1;
        let mut not_found = None;
        for choice in &choices {
            let name = choice.as_str().ok_or_else(|| {
                Error::new(ErrorKind::InvalidOperation, "template names must be strings")
            })?;
            match self.env.get_compiled_template(name) {
                Ok(tmpl) => {
                    let ctx_value = if node.with_context {
                        state.ctx.snapshot_value()
                    } else {
                        Value::UNDEFINED
                    };
                    let mut ctx = Context::new_with_frame(
                        Frame::new(ctx_value),
                        self.env.recursion_limit(),
                    );
                    ctx.incr_depth(state.depth() + INCLUDE_RECURSION_COST)?;
                    let mut sub_state = State::new(
                        self.env,
                        ctx,
                        tmpl.initial_auto_escape,
                        BTreeMap::new(),
                        Arc::from(tmpl.name.as_str()),
                    );
                    return self
                        .eval_template(&mut sub_state, tmpl, out)
                        .map_err(|err| {
                            Error::new(
                                ErrorKind::BadInclude,
                                format!("error in included template {name:?}"),
                            )
                            .with_source(err)
                        });
                }
                Err(err) if err.kind() == ErrorKind::TemplateNotFound => {
                    not_found = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        if node.ignore_missing {
            return Ok(());
        }
        if multiple {
            Err(Error::new(
                ErrorKind::TemplatesNotFound,
                format!(
                    "none of the templates could be included: {}",
                    choices
                        .iter()
                        .map(|x| format!("{x:?}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ))
        } else {
            Err(not_found.unwrap())
        }
    }

    /// Evaluates another template for its exports.
    fn load_module(
        &self,
        name_expr: &ast::Expr,
        with_context: bool,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        let name_value = self.eval_expr(name_expr, state)?;
        let name = name_value.as_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "template names must be strings")
        })?;
        let tmpl = self.env.get_compiled_template(name)?;
        let ctx_value = if with_context {
            state.ctx.snapshot_value()
        } else {
            Value::UNDEFINED
        };
        let mut ctx =
            Context::new_with_frame(Frame::new(ctx_value), self.env.recursion_limit());
        ctx.incr_depth(state.depth() + INCLUDE_RECURSION_COST)?;
        let mut sub_state = State::new(
            self.env,
            ctx,
            tmpl.initial_auto_escape,
            BTreeMap::new(),
            Arc::from(tmpl.name.as_str()),
        );
        let mut sink = crate::output::NullWriter;
        {
            let mut null_out = Output::with_write(&mut sink);
            self.eval_template(&mut sub_state, tmpl.clone(), &mut null_out)?;
        }
        let fields = sub_state
            .ctx
            .exports()
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect::<ValueMap>();
        Ok(Value::from_object(ModuleObject {
            name: tmpl.name.clone(),
            fields,
        }))
    }

    fn build_macro(&self, node: &ast::Macro, state: &mut State<'env>) -> Result<Value, Error> {
        let closure = state.ctx.ensure_closure();
        for name in &node.referenced {
            state.ctx.enclose(self.env, name);
        }
        let mut defaults = Vec::with_capacity(node.defaults.len());
        for default in &node.defaults {
            defaults.push(self.eval_expr(default, state)?);
        }
        let catch_varargs = node.referenced.iter().any(|x| x == "varargs");
        let catch_kwargs = node.referenced.iter().any(|x| x == "kwargs");
        Ok(Value::from_object(MacroObject {
            name: node.name.clone(),
            arg_names: node.args.clone(),
            defaults,
            body: node.body.clone(),
            closure: Value::from_dyn_object(closure),
            caller_referenced: node.caller_referenced,
            catch_varargs,
            catch_kwargs,
        }))
    }

    /// Renders one layer of a block into the output.
    fn render_block_layer(
        &self,
        name: &str,
        offset: usize,
        scoped: bool,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let stack = match state.blocks.get(name) {
            Some(stack) => stack.clone(),
            None => {
                return Err(Error::new(
                    ErrorKind::UnknownBlock,
                    format!("block {name:?} is not defined"),
                ))
            }
        };
        let layer = match stack.get(offset) {
            Some(layer) => layer.clone(),
            None => {
                return Err(Error::new(
                    ErrorKind::UnknownBlock,
                    format!("block {name:?} has no further parent block"),
                ))
            }
        };
        if offset == 0 && layer.required {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("required block {name:?} was not overridden"),
            ));
        }

        let frame = if scoped {
            Frame::default()
        } else {
            Frame::new_barrier(state.ctx.base_snapshot())
        };
        state.ctx.push_frame(frame)?;
        if offset + 1 < stack.len() {
            state.ctx.store(
                "super",
                Value::from_object(BlockRef {
                    name: name.to_string(),
                    offset: offset + 1,
                }),
            );
        }
        let old_block = state.current_block.replace(name.to_string());
        let rv = self.eval_stmts(&layer.body, state, out);
        state.current_block = old_block;
        state.ctx.pop_frame();
        rv.map(|_| ())
    }

    /// Renders a block reference (`super()` or `self.name()`) into a
    /// captured value.
    fn render_block_ref(
        &self,
        name: &str,
        offset: usize,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        let scoped = state
            .blocks
            .get(name)
            .and_then(|stack| stack.get(offset))
            .map_or(false, |layer| layer.scoped);
        let mut buf = String::new();
        {
            let mut sub_out = Output::with_string(&mut buf);
            self.render_block_layer(name, offset, scoped, state, &mut sub_out)?;
        }
        Ok(if !matches!(state.auto_escape, AutoEscape::None) {
            Value::from_safe_string(buf)
        } else {
            Value::from(buf)
        })
    }

    fn recurse_loop(
        &self,
        recurse: Arc<RecurseInfo>,
        depth: usize,
        args: &[Value],
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        let iterable = args.first().cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArguments,
                "a recursive loop invocation requires an iterable",
            )
        })?;
        assert_not_strict(&iterable)?;
        let iter = self.prepare_loop_iter(
            &recurse.target,
            recurse.filter_expr.as_ref(),
            iterable,
            state,
        )?;
        let mut buf = String::new();
        {
            let mut sub_out = Output::with_string(&mut buf);
            self.run_loop(
                &recurse.target,
                &recurse.body[..],
                &[],
                Some(recurse.clone()),
                iter,
                state,
                &mut sub_out,
                depth + 1,
            )?;
        }
        Ok(if !matches!(state.auto_escape, AutoEscape::None) {
            Value::from_safe_string(buf)
        } else {
            Value::from(buf)
        })
    }

    /// Performs an assignment to a target expression.
    fn assign(
        &self,
        target: &ast::Expr,
        value: Value,
        state: &mut State<'env>,
    ) -> Result<(), Error> {
        match target {
            ast::Expr::Var(var) => {
                state.ctx.store(&var.id, value);
                Ok(())
            }
            ast::Expr::GetAttr(attr) => {
                let base = self.eval_expr(&attr.expr, state)?;
                match base.downcast_object_ref::<Namespace>() {
                    Some(ns) => {
                        ns.set_value(&attr.name, value);
                        Ok(())
                    }
                    None => Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!("can only assign to namespaces, not {}", base.kind()),
                    )),
                }
            }
            ast::Expr::List(list) => {
                assert_not_strict(&value)?;
                let items = value.try_iter()?.collect::<Vec<_>>();
                if items.len() != list.items.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            list.items.len()
                        ),
                    ));
                }
                for (target, item) in list.items.iter().zip(items) {
                    self.assign(target, item, state)?;
                }
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                "invalid assignment target",
            )),
        }
    }

    fn resolve_var(&self, name: &str, state: &State<'env>) -> Option<Value> {
        if let Some(value) = state.lookup(name) {
            return Some(value);
        }
        if name == "self" {
            return Some(Value::from_object(SelfRef));
        }
        None
    }

    pub(crate) fn eval_expr(
        &self,
        expr: &ast::Expr,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match expr {
            ast::Expr::Var(node) => Ok(match self.resolve_var(&node.id, state) {
                Some(value) => value,
                None => Value::undefined_with(
                    undefined_kind(self.env.undefined_behavior()),
                    UndefinedOrigin {
                        owner: None,
                        name: node.id.clone(),
                    },
                ),
            }),
            ast::Expr::Const(node) => Ok(node.value.clone()),
            ast::Expr::UnaryOp(node) => {
                let value = self.eval_expr(&node.expr, state)?;
                match node.op {
                    ast::UnaryOpKind::Not => Ok(Value::from(!value_is_true(&value)?)),
                    ast::UnaryOpKind::Neg => {
                        if let Some(sandbox) = self.env.sandbox() {
                            if sandbox.intercepts_unop(SandboxUnaryOp::Neg) {
                                return sandbox.call_unop(state, SandboxUnaryOp::Neg, &value);
                            }
                        }
                        ops::neg(&value)
                    }
                }
            }
            ast::Expr::BinOp(node) => self.eval_binop(node, state),
            ast::Expr::Compare(node) => {
                let mut left = self.eval_expr(&node.expr, state)?;
                for (op, operand) in &node.ops {
                    let right = self.eval_expr(operand, state)?;
                    if !ops::compare_op(*op, &left, &right)? {
                        return Ok(Value::from(false));
                    }
                    left = right;
                }
                Ok(Value::from(true))
            }
            ast::Expr::IfExpr(node) => {
                let value = self.eval_expr(&node.test_expr, state)?;
                if value_is_true(&value)? {
                    self.eval_expr(&node.true_expr, state)
                } else {
                    match node.false_expr {
                        Some(ref false_expr) => self.eval_expr(false_expr, state),
                        None => Ok(Value::UNDEFINED),
                    }
                }
            }
            ast::Expr::Filter(node) => self.eval_filter_node(node, state, None),
            ast::Expr::Test(node) => {
                let value = self.eval_expr(&node.expr, state)?;
                let mut args = self.build_call_args(&node.args, state, None)?;
                args.insert(0, value);
                Ok(Value::from(state.perform_test(&node.name, &args)?))
            }
            ast::Expr::GetAttr(node) => {
                let base = self.eval_expr(&node.expr, state)?;
                self.lookup_attr(&base, &node.name, state)
            }
            ast::Expr::GetItem(node) => {
                let base = self.eval_expr(&node.expr, state)?;
                let key = self.eval_expr(&node.subscript_expr, state)?;
                self.lookup_item(&base, &key, state)
            }
            ast::Expr::Slice(node) => {
                let base = self.eval_expr(&node.expr, state)?;
                assert_not_strict(&base)?;
                let mut parts = Vec::with_capacity(3);
                for part in [&node.start, &node.stop, &node.step] {
                    parts.push(match part {
                        Some(expr) => self.eval_expr(expr, state)?,
                        None => Value::from(()),
                    });
                }
                let step = parts.pop().unwrap();
                let stop = parts.pop().unwrap();
                let start = parts.pop().unwrap();
                ops::slice(base, start, stop, step)
            }
            ast::Expr::Call(node) => self.eval_call(node, state, None),
            ast::Expr::List(node) => {
                let mut rv = Vec::with_capacity(node.items.len());
                for item in &node.items {
                    rv.push(self.eval_expr(item, state)?);
                }
                Ok(Value::from(rv))
            }
            ast::Expr::Map(node) => {
                let mut rv = ValueMap::new();
                for (key, value) in node.keys.iter().zip(node.values.iter()) {
                    rv.insert(self.eval_expr(key, state)?, self.eval_expr(value, state)?);
                }
                Ok(Value::from_map(rv))
            }
        }
    }

    fn eval_binop(
        &self,
        node: &ast::BinOp,
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        match node.op {
            ast::BinOpKind::ScAnd => {
                let left = self.eval_expr(&node.left, state)?;
                if !value_is_true(&left)? {
                    Ok(left)
                } else {
                    self.eval_expr(&node.right, state)
                }
            }
            ast::BinOpKind::ScOr => {
                let left = self.eval_expr(&node.left, state)?;
                if value_is_true(&left)? {
                    Ok(left)
                } else {
                    self.eval_expr(&node.right, state)
                }
            }
            op => {
                let left = self.eval_expr(&node.left, state)?;
                let right = self.eval_expr(&node.right, state)?;
                let sandbox_op = match op {
                    ast::BinOpKind::Add => SandboxBinOp::Add,
                    ast::BinOpKind::Sub => SandboxBinOp::Sub,
                    ast::BinOpKind::Mul => SandboxBinOp::Mul,
                    ast::BinOpKind::Div => SandboxBinOp::Div,
                    ast::BinOpKind::FloorDiv => SandboxBinOp::FloorDiv,
                    ast::BinOpKind::Rem => SandboxBinOp::Rem,
                    ast::BinOpKind::Pow => SandboxBinOp::Pow,
                    ast::BinOpKind::Concat => SandboxBinOp::Concat,
                    ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => unreachable!(),
                };
                if let Some(sandbox) = self.env.sandbox() {
                    if sandbox.intercepts_binop(sandbox_op) {
                        return sandbox.call_binop(state, sandbox_op, &left, &right);
                    }
                }
                match op {
                    ast::BinOpKind::Add => ops::add(&left, &right),
                    ast::BinOpKind::Sub => ops::sub(&left, &right),
                    ast::BinOpKind::Mul => ops::mul(&left, &right),
                    ast::BinOpKind::Div => ops::div(&left, &right),
                    ast::BinOpKind::FloorDiv => ops::int_div(&left, &right),
                    ast::BinOpKind::Rem => ops::rem(&left, &right),
                    ast::BinOpKind::Pow => ops::pow(&left, &right),
                    ast::BinOpKind::Concat => Ok(ops::string_concat(&left, &right)),
                    ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => unreachable!(),
                }
            }
        }
    }

    fn lookup_attr(
        &self,
        base: &Value,
        name: &str,
        state: &State<'env>,
    ) -> Result<Value, Error> {
        if let Some(sandbox) = self.env.sandbox() {
            let attr = base.get_attr_fast(name);
            if !sandbox.is_safe_attribute(base, name, attr.as_ref().unwrap_or(&Value::UNDEFINED))
            {
                return Err(Error::new(
                    ErrorKind::SecurityError,
                    format!(
                        "access to attribute {name:?} of {} object is unsafe",
                        base.kind()
                    ),
                ));
            }
            if let Some(attr) = attr {
                return Ok(attr);
            }
        } else if let Some(attr) = base.get_attr_fast(name) {
            return Ok(attr);
        }
        if base.is_undefined() {
            return match base.undefined_kind() {
                Some(UndefinedKind::Chainable) => Ok(Value::undefined_with(
                    UndefinedKind::Chainable,
                    UndefinedOrigin {
                        owner: Some("undefined value".to_string()),
                        name: name.to_string(),
                    },
                )),
                _ => Err(base.undefined_error()),
            };
        }
        let _ = state;
        Ok(Value::undefined_with(
            undefined_kind(self.env.undefined_behavior()),
            UndefinedOrigin {
                owner: Some(format!("{} object", base.kind())),
                name: name.to_string(),
            },
        ))
    }

    fn lookup_item(
        &self,
        base: &Value,
        key: &Value,
        state: &State<'env>,
    ) -> Result<Value, Error> {
        if let Some(name) = key.as_str() {
            if let Some(sandbox) = self.env.sandbox() {
                let attr = base.get_item_opt(key);
                if !sandbox.is_safe_attribute(base, name, attr.as_ref().unwrap_or(&Value::UNDEFINED))
                {
                    return Err(Error::new(
                        ErrorKind::SecurityError,
                        format!(
                            "access to item {name:?} of {} object is unsafe",
                            base.kind()
                        ),
                    ));
                }
            }
        }
        if base.is_undefined() {
            return match base.undefined_kind() {
                Some(UndefinedKind::Chainable) => Ok(Value::undefined_with(
                    UndefinedKind::Chainable,
                    UndefinedOrigin {
                        owner: Some("undefined value".to_string()),
                        name: key.to_string(),
                    },
                )),
                _ => Err(base.undefined_error()),
            };
        }
        let _ = state;
        match base.get_item_opt(key) {
            Some(value) => Ok(value),
            None => Ok(Value::undefined_with(
                undefined_kind(self.env.undefined_behavior()),
                UndefinedOrigin {
                    owner: Some(format!("{} object", base.kind())),
                    name: key.to_string(),
                },
            )),
        }
    }

    pub(crate) fn eval_filter_node(
        &self,
        node: &ast::Filter,
        state: &mut State<'env>,
        leaf: Option<&Value>,
    ) -> Result<Value, Error> {
        let piped = match node.expr {
            Some(ast::Expr::Filter(ref inner)) => self.eval_filter_node(&**inner, state, leaf)?,
            Some(ref expr) => self.eval_expr(expr, state)?,
            None => leaf.cloned().ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    "filter chain is missing an input value",
                )
            })?,
        };
        let mut args = self.build_call_args(&node.args, state, None)?;
        args.insert(0, piped);
        state.apply_filter(&node.name, &args)
    }

    fn build_call_args(
        &self,
        args: &[ast::CallArg],
        state: &mut State<'env>,
        caller: Option<Value>,
    ) -> Result<Vec<Value>, Error> {
        let mut positional = Vec::new();
        let mut kwargs = ValueMap::new();
        let mut has_kwargs = caller.is_some();
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr) => positional.push(self.eval_expr(expr, state)?),
                ast::CallArg::Kwarg(name, expr) => {
                    kwargs.insert(Value::from(name.as_str()), self.eval_expr(expr, state)?);
                    has_kwargs = true;
                }
                ast::CallArg::PosSplat(expr) => {
                    let value = self.eval_expr(expr, state)?;
                    assert_not_strict(&value)?;
                    positional.extend(value.try_iter()?);
                }
                ast::CallArg::KwargSplat(expr) => {
                    let value = self.eval_expr(expr, state)?;
                    match value.as_map() {
                        Some(map) => {
                            for (key, val) in map.iter() {
                                kwargs.insert(key.clone(), val.clone());
                            }
                        }
                        None => {
                            return Err(Error::new(
                                ErrorKind::InvalidArguments,
                                "** requires a map of keyword arguments",
                            ))
                        }
                    }
                    has_kwargs = true;
                }
            }
        }
        if let Some(caller) = caller {
            kwargs.insert(Value::from("caller"), caller);
        }
        if has_kwargs {
            positional.push(Value::from_kwargs(kwargs));
        }
        Ok(positional)
    }

    pub(crate) fn eval_call(
        &self,
        node: &ast::Call,
        state: &mut State<'env>,
        caller: Option<Value>,
    ) -> Result<Value, Error> {
        let args = self.build_call_args(&node.args, state, caller)?;
        match &node.expr {
            ast::Expr::Var(var) => match self.resolve_var(&var.id, state) {
                Some(value) => self.call_value(&value, &args, state),
                None => Err(Error::new(
                    ErrorKind::UnknownFunction,
                    format!("{} is unknown", var.id),
                )),
            },
            ast::Expr::GetAttr(attr) => {
                let base = self.eval_expr(&attr.expr, state)?;
                if base.downcast_object_ref::<SelfRef>().is_some() {
                    return self.render_block_ref(&attr.name, 0, state);
                }
                if base.is_undefined() {
                    return Err(base.undefined_error());
                }
                if let Some(sandbox) = self.env.sandbox() {
                    if !sandbox.is_safe_attribute(&base, &attr.name, &Value::UNDEFINED) {
                        return Err(Error::new(
                            ErrorKind::SecurityError,
                            format!(
                                "access to attribute {:?} of {} object is unsafe",
                                attr.name,
                                base.kind()
                            ),
                        ));
                    }
                }
                // block references resolved through attributes still
                // need the evaluator
                if let Some(attr_value) = base.get_attr_fast(&attr.name) {
                    if attr_value.downcast_object_ref::<BlockRef>().is_some()
                        || attr_value.downcast_object_ref::<LoopObject>().is_some()
                    {
                        return self.call_value(&attr_value, &args, state);
                    }
                }
                base.call_method(state, &attr.name, &args)
            }
            expr => {
                let value = self.eval_expr(expr, state)?;
                self.call_value(&value, &args, state)
            }
        }
    }

    fn call_value(
        &self,
        value: &Value,
        args: &[Value],
        state: &mut State<'env>,
    ) -> Result<Value, Error> {
        if let Some(block_ref) = value.downcast_object_ref::<BlockRef>() {
            let (name, offset) = (block_ref.name.clone(), block_ref.offset);
            return self.render_block_ref(&name, offset, state);
        }
        if let Some(loop_obj) = value.downcast_object_ref::<LoopObject>() {
            if let Some(recurse) = loop_obj.recurse.clone() {
                let depth = loop_obj.depth();
                return self.recurse_loop(recurse, depth, args, state);
            }
        }
        if value.is_undefined() {
            return Err(value.undefined_error());
        }
        if let Some(sandbox) = self.env.sandbox() {
            if !sandbox.is_safe_callable(value) {
                return Err(Error::new(
                    ErrorKind::SecurityError,
                    format!("{value:?} is not safely callable"),
                ));
            }
        }
        value.call(state, args)
    }
}

fn derive_auto_escape(value: &Value) -> Result<AutoEscape, Error> {
    match (value.as_str(), value.is_true()) {
        (Some("html"), _) => Ok(AutoEscape::Html),
        (Some("json"), _) => Ok(AutoEscape::Json),
        (Some("none"), _) | (None, false) => Ok(AutoEscape::None),
        (None, true) => Ok(AutoEscape::Html),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            "invalid value to autoescape tag",
        )),
    }
}
