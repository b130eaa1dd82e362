//! Tree-walking evaluator
//!
//! One [`Evaluator`] performs one render. It owns the per-render state (the
//! resolved block chains, the `super()` cursor, the recursion depth) and
//! borrows the environment for filters, tests, globals and template loading.
//! Templates themselves are never mutated, which is what makes concurrent
//! renders of the same template safe.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use super::context::Context;
use super::state::LoopState;
use super::value::{Callable, Kwargs, Value};
use crate::environment::{Environment, Template};
use crate::error::{Error, InheritanceError, Result};
use crate::filters::lookup_path;
use crate::helpers::html_escape;
use crate::macros::{Binding, Macro, MacroRegistry};
use crate::syntax::ast::{
    AssignTarget, BinaryOp, Block, CallArgs, CompFor, CompareOp, Expr, ExprKind, FilterCall,
    ForLoop, Literal, Node, UnaryOp,
};

/// How a statement list finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// The template whose code is currently executing
#[derive(Debug, Clone)]
struct Scope {
    template: String,
    macros: Arc<MacroRegistry>,
    autoescape: bool,
}

impl Scope {
    fn of(template: &Template) -> Self {
        Scope {
            template: template.name().to_string(),
            macros: template.macros().clone(),
            autoescape: template.autoescape(),
        }
    }
}

type BlockChains = IndexMap<String, Vec<(Arc<Block>, Scope)>>;

pub struct Evaluator<'env> {
    env: &'env Environment,
    scope: Scope,
    /// Name of the template the render started from
    root: String,
    /// Bindings the render started with
    globals: Context,
    /// Block name to its bodies, most-derived first
    blocks: BlockChains,
    /// Block being rendered and its position in the chain, innermost last
    super_stack: Vec<(String, usize)>,
    depth: usize,
    /// Nesting of `is defined` / `default` operands, which never raise
    lenient: usize,
    /// Templates loaded during this render, kept alive for their macros
    loaded: Vec<Arc<Template>>,
}

impl<'env> Evaluator<'env> {
    pub fn new(env: &'env Environment, template: &Template) -> Self {
        Self::with_scope(env, Scope::of(template))
    }

    /// An evaluator positioned inside the template that defined `mac`
    pub(crate) fn for_macro(env: &'env Environment, mac: &Macro) -> Self {
        Self::with_scope(
            env,
            Scope {
                template: mac.template.clone(),
                macros: mac.siblings(),
                autoescape: mac.autoescape,
            },
        )
    }

    fn with_scope(env: &'env Environment, scope: Scope) -> Self {
        Evaluator {
            env,
            root: scope.template.clone(),
            scope,
            globals: Context::new(),
            blocks: IndexMap::new(),
            super_stack: Vec::new(),
            depth: 0,
            lenient: 0,
            loaded: Vec::new(),
        }
    }

    /// Render `template` with `ctx`, following its inheritance chain
    pub fn render(mut self, template: &Template, ctx: &mut Context) -> Result<String> {
        self.root = template.name().to_string();
        self.globals = ctx.clone();
        self.render_template(template, ctx)
    }

    // ========================================================================
    // Templates and inheritance
    // ========================================================================

    fn render_template(&mut self, template: &Template, ctx: &mut Context) -> Result<String> {
        let parents = self.resolve_parents(template, ctx)?;
        let chain: Vec<&Template> = std::iter::once(template)
            .chain(parents.iter().map(|t| t.as_ref()))
            .collect();

        self.blocks.clear();
        for t in &chain {
            collect_blocks(&t.ast().nodes, &Scope::of(t), &mut self.blocks);
        }

        let (base, children) = match chain.split_last() {
            Some(split) => split,
            None => return Ok(String::new()),
        };
        for child in children {
            let prev = self.enter_scope(Scope::of(child));
            let result = self.run_statements(&child.ast().nodes, ctx);
            self.scope = prev;
            result?;
        }

        let prev = self.enter_scope(Scope::of(base));
        let mut out = String::new();
        let result = self.render_nodes(&base.ast().nodes, ctx, &mut out);
        self.scope = prev;
        result?;
        self.loaded.extend(parents);
        Ok(out)
    }

    /// Ancestors of `template`, nearest first
    fn resolve_parents(&mut self, template: &Template, ctx: &Context) -> Result<Vec<Arc<Template>>> {
        let mut parents: Vec<Arc<Template>> = Vec::new();
        let mut seen = vec![template.name().to_string()];
        let mut next = self.parent_name(template, ctx)?;

        while let Some(parent) = next {
            let child = seen.last().cloned().unwrap_or_default();
            if seen.contains(&parent) {
                seen.push(parent);
                return Err(InheritanceError::CyclicExtends(seen).into());
            }
            tracing::trace!("{} extends {}", child, parent);
            let loaded = match self.env.get_template(&parent) {
                Ok(t) => t,
                Err(Error::TemplateNotFound(_)) => {
                    return Err(InheritanceError::MissingParent { child, parent }.into())
                }
                Err(e) => return Err(e),
            };
            next = self.parent_name(&loaded, ctx)?;
            seen.push(parent);
            parents.push(loaded);
        }
        Ok(parents)
    }

    fn parent_name(&mut self, template: &Template, ctx: &Context) -> Result<Option<String>> {
        let Some(expr) = &template.ast().extends else {
            return Ok(None);
        };
        let value = self
            .eval(expr, ctx)
            .map_err(|e| e.located(template.name(), expr.span.line))?;
        match value.as_str() {
            Some(name) => Ok(Some(name.to_string())),
            None => Err(Error::invalid(format!(
                "extends expects a template name, got {}",
                value.kind_name()
            ))
            .located(template.name(), expr.span.line)),
        }
    }

    /// Execute the top-level statements of a template for their bindings
    /// only; blocks and output are skipped
    fn run_statements(&mut self, nodes: &[Node], ctx: &mut Context) -> Result<()> {
        let mut sink = String::new();
        for node in nodes {
            match node {
                Node::Block(_)
                | Node::Text(_)
                | Node::Output { .. }
                | Node::Include { .. }
                | Node::Raw(_)
                | Node::Comment(_) => continue,
                _ => {}
            }
            if let Err(e) = self.render_node(node, ctx, &mut sink) {
                return Err(self.locate(e, node));
            }
            sink.clear();
        }
        Ok(())
    }

    fn render_block(&mut self, name: &str, index: usize, ctx: &Context, out: &mut String) -> Result<()> {
        let entry = self
            .blocks
            .get(name)
            .and_then(|chain| chain.get(index))
            .cloned();
        let Some((block, scope)) = entry else {
            return Err(InheritanceError::NoParentBlock(name.to_string()).into());
        };
        if index == 0 && block.required {
            return Err(InheritanceError::RequiredBlock(name.to_string()).into());
        }

        self.enter()?;
        self.super_stack.push((name.to_string(), index));
        let prev = self.enter_scope(scope);
        let mut block_ctx = ctx.child();
        let result = self.render_nodes(&block.body, &mut block_ctx, out);
        self.scope = prev;
        self.super_stack.pop();
        self.leave();
        result.map(|_| ())
    }

    fn render_super(&mut self, ctx: &Context) -> Result<Value> {
        let (name, index) = self
            .super_stack
            .last()
            .cloned()
            .ok_or(InheritanceError::SuperOutsideBlock)?;
        let has_parent = self
            .blocks
            .get(&name)
            .map(|chain| chain.len() > index + 1)
            .unwrap_or(false);
        if !has_parent {
            return Err(InheritanceError::NoParentBlock(name).into());
        }
        let mut out = String::new();
        self.render_block(&name, index + 1, ctx, &mut out)?;
        Ok(Value::Safe(out))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn render_nodes(&mut self, nodes: &[Node], ctx: &mut Context, out: &mut String) -> Result<Flow> {
        for node in nodes {
            match self.render_node(node, ctx, out) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(e) => return Err(self.locate(e, node)),
            }
        }
        Ok(Flow::Normal)
    }

    fn locate(&self, err: Error, node: &Node) -> Error {
        match node.line() {
            Some(line) => err.located(&self.scope.template, line),
            None => err,
        }
    }

    fn render_node(&mut self, node: &Node, ctx: &mut Context, out: &mut String) -> Result<Flow> {
        match node {
            Node::Text(text) => out.push_str(text.visible()),
            Node::Raw(text) => out.push_str(text),
            Node::Comment(_) => {}
            Node::Output { expr, autoescape } => {
                let value = self.eval(expr, ctx)?;
                let escape = autoescape.unwrap_or(self.scope.autoescape);
                write_value(out, &value, escape);
            }
            Node::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, ctx)?.is_true() {
                        return self.render_nodes(body, ctx, out);
                    }
                }
                if let Some(body) = else_body {
                    return self.render_nodes(body, ctx, out);
                }
            }
            Node::For(lp) => {
                let iterable = self.eval(&lp.iter, ctx)?;
                self.render_for(lp, iterable, 0, ctx, out)?;
            }
            Node::Block(block) => {
                if self.blocks.contains_key(&block.name) {
                    self.render_block(&block.name, 0, ctx, out)?;
                } else {
                    let mut block_ctx = ctx.child();
                    self.render_nodes(&block.body, &mut block_ctx, out)?;
                }
            }
            Node::Include {
                names,
                ignore_missing,
                with_context,
                ..
            } => self.render_include(names, *ignore_missing, *with_context, ctx, out)?,
            Node::Import {
                template,
                alias,
                with_context,
                ..
            } => {
                let name = self.template_name(template, ctx)?;
                let module = self.import_module(&name, *with_context, ctx)?;
                ctx.set(alias.as_str(), Value::from_map(module));
            }
            Node::FromImport {
                template,
                names,
                with_context,
                ..
            } => {
                let name = self.template_name(template, ctx)?;
                let module = self.import_module(&name, *with_context, ctx)?;
                for (export, alias) in names {
                    let value = module.get(export).cloned().ok_or_else(|| Error::ImportNotFound {
                        template: name.clone(),
                        name: export.clone(),
                    })?;
                    ctx.set(alias.as_deref().unwrap_or(export), value);
                }
            }
            Node::Macro(def) => {
                let mac = Macro::new(
                    def.clone(),
                    &self.scope.template,
                    &self.scope.macros,
                    self.scope.autoescape,
                )
                .with_closure(ctx.clone());
                ctx.set(def.name.as_str(), Value::Callable(Callable::Macro(Arc::new(mac))));
            }
            Node::CallBlock { call, caller } => {
                let ExprKind::Call { callee, args } = &call.kind else {
                    return Err(Error::invalid("call block expects a macro call"));
                };
                let caller = Macro::new(
                    caller.clone(),
                    &self.scope.template,
                    &self.scope.macros,
                    self.scope.autoescape,
                )
                .with_closure(ctx.clone());
                let target = self.eval(callee, ctx)?;
                let (args, kwargs) = self.eval_args(args, ctx)?;
                let result = match &target {
                    Value::Callable(Callable::Macro(mac)) => self.call_macro(
                        mac,
                        args,
                        kwargs,
                        Some(Value::Callable(Callable::Macro(Arc::new(caller)))),
                    )?,
                    other => return Err(Error::NotCallable(describe_callee(callee, other))),
                };
                write_value(out, &result, self.scope.autoescape);
            }
            Node::Set { target, value, .. } => {
                let value = self.eval(value, ctx)?;
                assign(target, value, ctx)?;
            }
            Node::SetBlock {
                target,
                filters,
                body,
                autoescape,
                ..
            } => {
                let escape = autoescape.unwrap_or(self.scope.autoescape);
                let value = self.capture(body, ctx, escape, filters)?;
                assign(target, value, ctx)?;
            }
            Node::With { bindings, body } => {
                let mut with_ctx = ctx.child();
                for (name, expr) in bindings {
                    let value = self.eval(expr, &with_ctx)?;
                    with_ctx.set(name.as_str(), value);
                }
                return self.render_nodes(body, &mut with_ctx, out);
            }
            Node::FilterBlock {
                filters,
                body,
                autoescape,
                ..
            } => {
                let escape = autoescape.unwrap_or(self.scope.autoescape);
                let value = self.capture(body, ctx, escape, filters)?;
                write_value(out, &value, escape);
            }
            Node::Do(expr) => {
                self.eval(expr, ctx)?;
            }
            Node::Autoescape { enabled, body } => {
                let prev = self.scope.autoescape;
                self.scope.autoescape = *enabled;
                let result = self.render_nodes(body, ctx, out);
                self.scope.autoescape = prev;
                return result;
            }
            Node::Break(_) => return Ok(Flow::Break),
            Node::Continue(_) => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    /// Render a body into a value and pass it through a filter chain
    fn capture(&mut self, body: &[Node], ctx: &Context, escape: bool, filters: &[FilterCall]) -> Result<Value> {
        let mut text = String::new();
        let mut body_ctx = ctx.child();
        self.render_nodes(body, &mut body_ctx, &mut text)?;
        let mut value = if escape {
            Value::Safe(text)
        } else {
            Value::String(text)
        };
        for filter in filters {
            value = self.apply_filter(&filter.name, value, &filter.args, ctx)?;
        }
        Ok(value)
    }

    fn render_for(
        &mut self,
        lp: &Arc<ForLoop>,
        iterable: Value,
        depth0: usize,
        ctx: &Context,
        out: &mut String,
    ) -> Result<()> {
        let mut items = iterable.try_iter()?;
        if let Some(condition) = &lp.filter {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                let mut filter_ctx = ctx.child();
                bind_targets(&lp.targets, &item, &mut filter_ctx)?;
                if self.eval(condition, &filter_ctx)?.is_true() {
                    kept.push(item);
                }
            }
            items = kept;
        }

        if items.is_empty() {
            if let Some(body) = &lp.else_body {
                let mut else_ctx = ctx.child();
                self.render_nodes(body, &mut else_ctx, out)?;
            }
            return Ok(());
        }

        let changed = Arc::new(Mutex::new(None));
        let length = items.len();
        for (index0, item) in items.iter().enumerate() {
            let mut iter_ctx = ctx.child();
            bind_targets(&lp.targets, item, &mut iter_ctx)?;
            let state = LoopState {
                index0,
                length,
                depth0,
                previtem: index0.checked_sub(1).map(|i| items[i].clone()),
                nextitem: items.get(index0 + 1).cloned(),
                changed: changed.clone(),
                recursive: lp.recursive.then(|| lp.clone()),
            };
            iter_ctx.set("loop", Value::Callable(Callable::Loop(Arc::new(state))));
            if self.render_nodes(&lp.body, &mut iter_ctx, out)? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn render_include(
        &mut self,
        names: &Expr,
        ignore_missing: bool,
        with_context: bool,
        ctx: &Context,
        out: &mut String,
    ) -> Result<()> {
        let candidates: Vec<String> = match self.eval(names, ctx)? {
            Value::Seq(items) => items.iter().map(Value::key_string).collect(),
            other => vec![other.key_string()],
        };

        let mut found = None;
        for name in &candidates {
            match self.env.get_template(name) {
                Ok(template) => {
                    found = Some(template);
                    break;
                }
                Err(Error::TemplateNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let Some(template) = found else {
            if ignore_missing {
                tracing::warn!("Skipping missing include: {}", candidates.join(", "));
                return Ok(());
            }
            return Err(Error::TemplateNotFound(candidates.join(", ")));
        };
        tracing::trace!("Including {} from {}", template.name(), self.scope.template);

        let mut include_ctx = if with_context {
            ctx.child()
        } else {
            self.globals.child()
        };
        self.enter()?;
        let blocks = std::mem::take(&mut self.blocks);
        let supers = std::mem::take(&mut self.super_stack);
        let prev = self.scope.clone();
        let result = self.render_template(&template, &mut include_ctx);
        self.blocks = blocks;
        self.super_stack = supers;
        self.scope = prev;
        self.leave();
        out.push_str(&result?);
        self.loaded.push(template);
        Ok(())
    }

    fn template_name(&mut self, expr: &Expr, ctx: &Context) -> Result<String> {
        let value = self.eval(expr, ctx)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid(format!("expected a template name, got {}", value.kind_name())))
    }

    /// Execute a template's top level and return its public bindings
    fn import_module(&mut self, name: &str, with_context: bool, ctx: &Context) -> Result<IndexMap<String, Value>> {
        let template = self.env.get_template(name)?;
        tracing::trace!("Importing {} into {}", name, self.scope.template);

        let mut module_ctx = if with_context {
            ctx.child()
        } else {
            Context::new()
        };
        self.enter()?;
        let prev = self.enter_scope(Scope::of(&template));
        let result = self.run_statements(&template.ast().nodes, &mut module_ctx);
        self.scope = prev;
        self.leave();
        result?;

        let exports = module_ctx
            .top_frame()
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.loaded.push(template);
        Ok(exports)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Invoke a macro; the result is its rendered body as a safe string
    pub(crate) fn call_macro(
        &mut self,
        mac: &Arc<Macro>,
        args: Vec<Value>,
        kwargs: Kwargs,
        caller: Option<Value>,
    ) -> Result<Value> {
        let bound = mac.bind_arguments(args, kwargs)?;
        self.enter()?;

        let mut macro_ctx = mac.closure.child();
        macro_ctx.set(mac.name(), Value::Callable(Callable::Macro(mac.clone())));
        if let Some(caller) = caller {
            macro_ctx.set("caller", caller);
        }
        let prev = self.enter_scope(Scope {
            template: mac.template.clone(),
            macros: mac.siblings(),
            autoescape: mac.autoescape,
        });

        let mut out = String::new();
        let result = (|| {
            for (name, binding) in bound.bindings {
                let value = match binding {
                    Binding::Value(value) => value,
                    Binding::Default(expr) => self.eval(expr, &macro_ctx)?,
                };
                macro_ctx.set(name, value);
            }
            self.render_nodes(&mac.def.body, &mut macro_ctx, &mut out)
        })();

        self.scope = prev;
        self.leave();
        result?;
        Ok(Value::Safe(out))
    }

    fn call_value(&mut self, target: &Value, args: Vec<Value>, kwargs: Kwargs, ctx: &Context, name: &str) -> Result<Value> {
        match target {
            Value::Callable(Callable::Macro(mac)) => {
                let mut kwargs = kwargs;
                let caller = if mac.def.params.iter().any(|p| p == "caller") {
                    None
                } else {
                    kwargs.shift_remove("caller")
                };
                self.call_macro(mac, args, kwargs, caller)
            }
            Value::Callable(Callable::Function { name, func }) => {
                func(&args, &kwargs).map_err(|e| Error::FunctionExecution {
                    name: name.clone(),
                    message: e.0,
                })
            }
            Value::Callable(Callable::Joiner(joiner)) => Ok(joiner.call()),
            Value::Callable(Callable::Loop(state)) => {
                let Some(lp) = &state.recursive else {
                    return Err(Error::NotCallable("loop of a non-recursive for".to_string()));
                };
                let iterable = args.into_iter().next().unwrap_or_default();
                self.enter()?;
                let mut out = String::new();
                let result = self.render_for(lp, iterable, state.depth0 + 1, ctx, &mut out);
                self.leave();
                result?;
                Ok(Value::Safe(out))
            }
            Value::Undefined => Err(Error::UndefinedVariable(name.to_string())),
            other => Err(Error::NotCallable(format!("'{}' ({})", name, other.kind_name()))),
        }
    }

    /// `obj.name(args)`: callable attributes first, then built-in methods
    fn call_method(&mut self, obj: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs, ctx: &Context) -> Result<Value> {
        if let Some(attr @ Value::Callable(_)) = obj.get_attr(name) {
            return self.call_value(&attr, args, kwargs, ctx, name);
        }
        match (obj, name) {
            (Value::Callable(Callable::Cycler(cycler)), "next") => return Ok(cycler.next()),
            (Value::Callable(Callable::Cycler(cycler)), "reset") => {
                cycler.reset();
                return Ok(Value::None);
            }
            (Value::Callable(Callable::Loop(state)), "cycle") => {
                return state.cycle(&args).map_err(|e| Error::FunctionExecution {
                    name: "loop.cycle".to_string(),
                    message: e.0,
                })
            }
            (Value::Callable(Callable::Loop(state)), "changed") => {
                return Ok(Value::Bool(state.changed(&args)))
            }
            _ => {}
        }
        if let Some(result) = obj.call_method(name, &args) {
            return result;
        }
        match obj {
            Value::Undefined => Err(Error::UndefinedVariable(name.to_string())),
            other => Err(Error::NotCallable(format!("{}.{}", other.kind_name(), name))),
        }
    }

    fn eval_args(&mut self, args: &CallArgs, ctx: &Context) -> Result<(Vec<Value>, Kwargs)> {
        let mut positional = Vec::with_capacity(args.positional.len());
        for expr in &args.positional {
            positional.push(self.eval(expr, ctx)?);
        }
        let mut keyword = Kwargs::new();
        for (name, expr) in &args.keyword {
            let value = self.eval(expr, ctx)?;
            keyword.insert(name.clone(), value);
        }
        Ok((positional, keyword))
    }

    // ========================================================================
    // Filters and tests
    // ========================================================================

    fn apply_filter(&mut self, name: &str, value: Value, args: &CallArgs, ctx: &Context) -> Result<Value> {
        let (args, kwargs) = self.eval_args(args, ctx)?;
        match name {
            "map" => self.filter_map(name, &value, args, &kwargs),
            "select" | "reject" => self.filter_select(name, &value, args, name == "select"),
            "selectattr" | "rejectattr" => self.filter_selectattr(name, &value, args, name == "selectattr"),
            _ => self.call_filter(name, &value, &args, &kwargs),
        }
    }

    fn call_filter(&self, name: &str, value: &Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        let filter = self
            .env
            .filter(name)
            .ok_or_else(|| Error::UnknownFilter(name.to_string()))?;
        filter(value, args, kwargs).map_err(|e| Error::FilterExecution {
            name: name.to_string(),
            message: e.0,
        })
    }

    fn call_test(&self, name: &str, value: &Value, args: &[Value]) -> Result<bool> {
        let test = self
            .env
            .test(name)
            .ok_or_else(|| Error::UnknownTest(name.to_string()))?;
        test(value, args).map_err(|e| Error::TestExecution {
            name: name.to_string(),
            message: e.0,
        })
    }

    /// `map(attribute='x', default=...)` or `map('filter', args...)`
    fn filter_map(&self, name: &str, value: &Value, args: Vec<Value>, kwargs: &Kwargs) -> Result<Value> {
        let items = value.try_iter()?;
        if let Some(attribute) = kwargs.get("attribute") {
            let path = attribute.key_string();
            let default = kwargs.get("default");
            let mapped = items
                .iter()
                .map(|item| match (lookup_path(item, &path), default) {
                    (Value::Undefined, Some(fallback)) => fallback.clone(),
                    (found, _) => found,
                })
                .collect();
            return Ok(Value::from_seq(mapped));
        }

        let mut args = args.into_iter();
        let filter = args
            .next()
            .ok_or_else(|| Error::FilterExecution {
                name: name.to_string(),
                message: "expected a filter name or attribute=".to_string(),
            })?
            .key_string();
        let rest: Vec<Value> = args.collect();
        let mut rest_kwargs = kwargs.clone();
        rest_kwargs.shift_remove("attribute");
        let mapped = items
            .iter()
            .map(|item| self.call_filter(&filter, item, &rest, &rest_kwargs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::from_seq(mapped))
    }

    fn filter_select(&self, _name: &str, value: &Value, args: Vec<Value>, keep: bool) -> Result<Value> {
        let mut args = args.into_iter();
        let test = args.next().map(|t| t.key_string());
        let rest: Vec<Value> = args.collect();
        let mut selected = Vec::new();
        for item in value.try_iter()? {
            let passed = match &test {
                Some(test) => self.call_test(test, &item, &rest)?,
                None => item.is_true(),
            };
            if passed == keep {
                selected.push(item);
            }
        }
        Ok(Value::from_seq(selected))
    }

    fn filter_selectattr(&self, name: &str, value: &Value, args: Vec<Value>, keep: bool) -> Result<Value> {
        let mut args = args.into_iter();
        let path = args
            .next()
            .ok_or_else(|| Error::FilterExecution {
                name: name.to_string(),
                message: "expected an attribute name".to_string(),
            })?
            .key_string();
        let test = args.next().map(|t| t.key_string());
        let rest: Vec<Value> = args.collect();
        let mut selected = Vec::new();
        for item in value.try_iter()? {
            let attr = lookup_path(&item, &path);
            let passed = match &test {
                Some(test) => self.call_test(test, &attr, &rest)?,
                None => attr.is_true(),
            };
            if passed == keep {
                selected.push(item);
            }
        }
        Ok(Value::from_seq(selected))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub(crate) fn eval(&mut self, expr: &Expr, ctx: &Context) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::String(s.clone()),
            }),
            ExprKind::Var(name) => self.lookup(name, ctx),
            ExprKind::GetAttr { value, attr } => {
                let target = self.eval(value, ctx)?;
                match target.get_attr(attr) {
                    Some(found) => Ok(found),
                    None => self.undefined(&format!("{}.{}", describe(value), attr)),
                }
            }
            ExprKind::GetItem { value, index } => {
                let target = self.eval(value, ctx)?;
                let key = self.eval(index, ctx)?;
                let found = target
                    .get_item(&key)
                    .or_else(|| key.as_str().and_then(|k| target.get_attr(k)));
                match found {
                    Some(found) => Ok(found),
                    None => self.undefined(&format!("{}[{}]", describe(value), key.repr())),
                }
            }
            ExprKind::Slice {
                value,
                start,
                stop,
                step,
            } => {
                let target = self.eval(value, ctx)?;
                let start = self.eval_index(start.as_deref(), ctx)?;
                let stop = self.eval_index(stop.as_deref(), ctx)?;
                let step = self.eval_index(step.as_deref(), ctx)?;
                target.slice(start, stop, step)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, ctx)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_true())),
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => value.pos(),
                }
            }
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, ctx),
            ExprKind::Compare { left, ops } => {
                let mut lhs = self.eval(left, ctx)?;
                for (op, right) in ops {
                    let rhs = self.eval(right, ctx)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition, ctx)?.is_true() {
                    self.eval(then, ctx)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise, ctx),
                        None => Ok(Value::Undefined),
                    }
                }
            }
            ExprKind::Filter { value, name, args } => {
                let value = if matches!(name.as_str(), "default" | "d") {
                    self.eval_lenient(value, ctx)?
                } else {
                    self.eval(value, ctx)?
                };
                self.apply_filter(name, value, args, ctx)
            }
            ExprKind::Test {
                value,
                name,
                args,
                negated,
            } => {
                let value = if matches!(name.as_str(), "defined" | "undefined") {
                    self.eval_lenient(value, ctx)?
                } else {
                    self.eval(value, ctx)?
                };
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, ctx)?);
                }
                Ok(Value::Bool(self.call_test(name, &value, &evaluated)? != *negated))
            }
            ExprKind::Call { callee, args } => {
                if let ExprKind::GetAttr { value, attr } = &callee.kind {
                    let obj = self.eval(value, ctx)?;
                    let (args, kwargs) = self.eval_args(args, ctx)?;
                    return self.call_method(&obj, attr, args, kwargs, ctx);
                }
                let target = self.eval(callee, ctx)?;
                let (args, kwargs) = self.eval_args(args, ctx)?;
                self.call_value(&target, args, kwargs, ctx, &describe(callee))
            }
            ExprKind::Super => self.render_super(ctx),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, ctx)?);
                }
                Ok(Value::from_seq(values))
            }
            ExprKind::Dict(pairs) => {
                let mut map = IndexMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval(key, ctx)?.key_string();
                    let value = self.eval(value, ctx)?;
                    map.insert(key, value);
                }
                Ok(Value::from_map(map))
            }
            ExprKind::ListComp {
                element,
                clauses,
                conditions,
            } => {
                let mut items = Vec::new();
                self.comprehend(clauses, conditions, ctx, &mut |ev, scope| {
                    items.push(ev.eval(element, scope)?);
                    Ok(())
                })?;
                Ok(Value::from_seq(items))
            }
            ExprKind::DictComp {
                key,
                value,
                clauses,
                conditions,
            } => {
                let mut map = IndexMap::new();
                self.comprehend(clauses, conditions, ctx, &mut |ev, scope| {
                    let k = ev.eval(key, scope)?.key_string();
                    let v = ev.eval(value, scope)?;
                    map.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::from_map(map))
            }
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, ctx: &Context) -> Result<Value> {
        // Short-circuit operators return the deciding operand
        match op {
            BinaryOp::And => {
                let lhs = self.eval(left, ctx)?;
                return if lhs.is_true() { self.eval(right, ctx) } else { Ok(lhs) };
            }
            BinaryOp::Or => {
                let lhs = self.eval(left, ctx)?;
                return if lhs.is_true() { Ok(lhs) } else { self.eval(right, ctx) };
            }
            _ => {}
        }

        let lhs = self.eval(left, ctx)?;
        let rhs = self.eval(right, ctx)?;
        match op {
            BinaryOp::Add => lhs.add(&rhs),
            BinaryOp::Sub => lhs.sub(&rhs),
            BinaryOp::Mul => lhs.mul(&rhs),
            BinaryOp::Div => lhs.div(&rhs),
            BinaryOp::FloorDiv => lhs.floor_div(&rhs),
            BinaryOp::Mod => lhs.rem(&rhs),
            BinaryOp::Pow => lhs.pow(&rhs),
            BinaryOp::Concat => {
                if self.scope.autoescape && (lhs.is_safe() || rhs.is_safe()) {
                    Ok(Value::Safe(format!("{}{}", escaped(&lhs), escaped(&rhs))))
                } else {
                    Ok(Value::String(format!("{}{}", lhs, rhs)))
                }
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn eval_index(&mut self, expr: Option<&Expr>, ctx: &Context) -> Result<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr, ctx)? {
            Value::None | Value::Undefined => Ok(None),
            value => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::invalid("slice indices must be integers")),
        }
    }

    /// Evaluate without raising on undefined names
    fn eval_lenient(&mut self, expr: &Expr, ctx: &Context) -> Result<Value> {
        self.lenient += 1;
        let result = self.eval(expr, ctx);
        self.lenient -= 1;
        result
    }

    /// Run nested comprehension clauses, calling `emit` for every binding
    /// combination that passes all conditions
    fn comprehend(
        &mut self,
        clauses: &[CompFor],
        conditions: &[Expr],
        ctx: &Context,
        emit: &mut dyn FnMut(&mut Evaluator<'env>, &Context) -> Result<()>,
    ) -> Result<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            for condition in conditions {
                if !self.eval(condition, ctx)?.is_true() {
                    return Ok(());
                }
            }
            return emit(self, ctx);
        };
        let iterable = self.eval(&clause.iter, ctx)?;
        for item in iterable.try_iter()? {
            let mut inner = ctx.child();
            bind_targets(&clause.targets, &item, &mut inner)?;
            self.comprehend(rest, conditions, &inner, emit)?;
        }
        Ok(())
    }

    /// Name resolution: render scope, then template macros, environment
    /// macros and globals
    fn lookup(&self, name: &str, ctx: &Context) -> Result<Value> {
        if let Some(value) = ctx.get(name) {
            return Ok(value.clone());
        }
        if let Some(mac) = self.scope.macros.get(name) {
            let mac = if mac.template == self.root {
                Arc::new(mac.rebind(self.globals.clone()))
            } else {
                mac
            };
            return Ok(Value::Callable(Callable::Macro(mac)));
        }
        if let Some(mac) = self.env.macros().get(name) {
            return Ok(Value::Callable(Callable::Macro(mac)));
        }
        if let Some(value) = self.env.global(name) {
            return Ok(value);
        }
        self.undefined(name)
    }

    fn undefined(&self, name: &str) -> Result<Value> {
        if self.env.config().strict_undefined && self.lenient == 0 {
            Err(Error::UndefinedVariable(name.to_string()))
        } else {
            Ok(Value::Undefined)
        }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn enter_scope(&mut self, scope: Scope) -> Scope {
        std::mem::replace(&mut self.scope, scope)
    }

    /// Count one level of macro, include, import, block or recursive loop nesting
    fn enter(&mut self) -> Result<()> {
        let limit = self.env.config().max_recursion;
        if self.depth >= limit {
            return Err(Error::invalid(format!(
                "maximum recursion depth of {} exceeded",
                limit
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn collect_blocks(nodes: &[Node], scope: &Scope, blocks: &mut BlockChains) {
    for node in nodes {
        match node {
            Node::Block(block) => {
                blocks
                    .entry(block.name.clone())
                    .or_default()
                    .push((block.clone(), scope.clone()));
                collect_blocks(&block.body, scope, blocks);
            }
            Node::If {
                branches,
                else_body,
            } => {
                for (_, body) in branches {
                    collect_blocks(body, scope, blocks);
                }
                if let Some(body) = else_body {
                    collect_blocks(body, scope, blocks);
                }
            }
            Node::For(lp) => {
                collect_blocks(&lp.body, scope, blocks);
                if let Some(body) = &lp.else_body {
                    collect_blocks(body, scope, blocks);
                }
            }
            Node::With { body, .. }
            | Node::FilterBlock { body, .. }
            | Node::Autoescape { body, .. } => collect_blocks(body, scope, blocks),
            _ => {}
        }
    }
}

/// Bind loop or unpacking targets to one item
fn bind_targets(targets: &[String], item: &Value, ctx: &mut Context) -> Result<()> {
    if let [name] = targets {
        ctx.set(name.as_str(), item.clone());
        return Ok(());
    }
    let values = item.try_iter()?;
    if values.len() != targets.len() {
        return Err(Error::invalid(format!(
            "cannot unpack {} values into {} names",
            values.len(),
            targets.len()
        )));
    }
    for (name, value) in targets.iter().zip(values) {
        ctx.set(name.as_str(), value);
    }
    Ok(())
}

fn assign(target: &AssignTarget, value: Value, ctx: &mut Context) -> Result<()> {
    match target {
        AssignTarget::Name(name) => {
            ctx.set(name.as_str(), value);
            Ok(())
        }
        AssignTarget::Attr { namespace, attr } => match ctx.get(namespace) {
            Some(Value::Namespace(ns)) => {
                ns.set(attr, value);
                Ok(())
            }
            Some(other) => Err(Error::invalid(format!(
                "cannot assign attribute '{}' on {} '{}'; only namespace objects support it",
                attr,
                other.kind_name(),
                namespace
            ))),
            None => Err(Error::UndefinedVariable(namespace.clone())),
        },
        AssignTarget::Unpack(names) => bind_targets(names, &value, ctx),
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool> {
    Ok(match op {
        CompareOp::Eq => lhs.loose_eq(rhs),
        CompareOp::Ne => !lhs.loose_eq(rhs),
        CompareOp::Lt => lhs.compare(rhs)? == Ordering::Less,
        CompareOp::Le => lhs.compare(rhs)? != Ordering::Greater,
        CompareOp::Gt => lhs.compare(rhs)? == Ordering::Greater,
        CompareOp::Ge => lhs.compare(rhs)? != Ordering::Less,
        CompareOp::In => rhs.contains(lhs)?,
        CompareOp::NotIn => !rhs.contains(lhs)?,
    })
}

fn write_value(out: &mut String, value: &Value, escape: bool) {
    match value {
        Value::Safe(s) => out.push_str(s),
        Value::Undefined | Value::None => {}
        other if escape => out.push_str(&html_escape(&other.to_string())),
        other => out.push_str(&other.to_string()),
    }
}

fn escaped(value: &Value) -> String {
    match value {
        Value::Safe(s) => s.clone(),
        other => html_escape(&other.to_string()),
    }
}

/// Dotted path of a variable expression, for error messages
fn describe(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Var(name) => name.clone(),
        ExprKind::GetAttr { value, attr } => format!("{}.{}", describe(value), attr),
        ExprKind::GetItem { value, .. } => format!("{}[...]", describe(value)),
        ExprKind::Call { callee, .. } => format!("{}()", describe(callee)),
        _ => "expression".to_string(),
    }
}

fn describe_callee(expr: &Expr, value: &Value) -> String {
    format!("'{}' ({})", describe(expr), value.kind_name())
}
