//! The template environment: configuration, registries, loading and caching

mod config;

pub use config::{AutoEscape, EnvironmentConfig, SyntaxConfig};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::Serialize;

use crate::cache::{CacheStats, TemplateCache};
use crate::error::{CallError, Error, MacroError, Result};
use crate::filters::FilterFn;
use crate::loader::{Loader, MemoryLoader};
use crate::macros::{Macro, MacroRegistry};
use crate::runtime::{Context, Evaluator, Kwargs, Value};
use crate::syntax::ast::{Node, TemplateAst};
use crate::tests::TestFn;

/// Name given to templates compiled from a bare string
pub const STRING_TEMPLATE_NAME: &str = "<string>";

/// A compiled template.
///
/// The AST and the macro registry are immutable after compilation, so one
/// template can be rendered from many threads at once.
#[derive(Debug)]
pub struct Template {
    name: String,
    ast: TemplateAst,
    macros: Arc<MacroRegistry>,
    autoescape: bool,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> &TemplateAst {
        &self.ast
    }

    /// Macros defined at the top level of this template
    pub fn macros(&self) -> &Arc<MacroRegistry> {
        &self.macros
    }

    /// Whether output is HTML-escaped by default
    pub fn autoescape(&self) -> bool {
        self.autoescape
    }

    /// Render against a context. The caller's context is never modified.
    pub fn render(&self, env: &Environment, ctx: &Context) -> Result<String> {
        let mut ctx = ctx.clone();
        Evaluator::new(env, self).render(self, &mut ctx)
    }

    /// Render against any serializable map-like value
    pub fn render_with<S: Serialize + ?Sized>(&self, env: &Environment, data: &S) -> Result<String> {
        let ctx = Context::from_serialize(data)?;
        self.render(env, &ctx)
    }
}

/// Configuration and registries shared by every render.
///
/// Registration methods take `&self` and use reader/writer locks, so an
/// environment behind an `Arc` can gain filters or templates while other
/// threads render.
pub struct Environment {
    config: EnvironmentConfig,
    templates: MemoryLoader,
    loader: Option<Arc<dyn Loader>>,
    filters: RwLock<HashMap<String, Arc<FilterFn>>>,
    tests: RwLock<HashMap<String, Arc<TestFn>>>,
    globals: RwLock<IndexMap<String, Value>>,
    macros: Arc<MacroRegistry>,
    /// Templates whose macros were published through `import_macros`
    pinned: RwLock<Vec<Arc<Template>>>,
    cache: TemplateCache,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::with_config(EnvironmentConfig::default())
    }

    pub fn with_config(config: EnvironmentConfig) -> Self {
        let globals = crate::functions::builtin_globals(&config);
        Self {
            config,
            templates: MemoryLoader::new(),
            loader: None,
            filters: RwLock::new(crate::filters::builtin_filters()),
            tests: RwLock::new(crate::tests::builtin_tests()),
            globals: RwLock::new(globals),
            macros: Arc::new(MacroRegistry::new()),
            pinned: RwLock::new(Vec::new()),
            cache: TemplateCache::new(),
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Use `loader` for templates not added with [`Environment::add_template`]
    pub fn set_loader<L: Loader + 'static>(&mut self, loader: L) {
        self.loader = Some(Arc::new(loader));
        self.cache.clear();
    }

    pub fn with_loader<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.set_loader(loader);
        self
    }

    /// Register an in-memory template, replacing any cached version
    pub fn add_template(&self, name: &str, source: &str) {
        self.templates.add(name, source);
        self.cache.invalidate(name);
    }

    pub fn add_filter<F>(&self, name: &str, filter: F)
    where
        F: Fn(&Value, &[Value], &Kwargs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::new(filter));
    }

    pub fn add_test<F>(&self, name: &str, test: F)
    where
        F: Fn(&Value, &[Value]) -> Result<bool, CallError> + Send + Sync + 'static,
    {
        self.tests
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::new(test));
    }

    /// Register a global function callable from every template
    pub fn add_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.add_global(name, Value::function(name, func));
    }

    pub fn add_global(&self, name: &str, value: impl Into<Value>) {
        self.globals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.into());
    }

    pub(crate) fn filter(&self, name: &str) -> Option<Arc<FilterFn>> {
        self.filters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn test(&self, name: &str) -> Option<Arc<TestFn>> {
        self.tests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Environment-wide macros, visible from every template
    pub fn macros(&self) -> &Arc<MacroRegistry> {
        &self.macros
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Fetch a compiled template, loading and compiling it on a cache miss.
    ///
    /// Lex and parse errors are returned as is and nothing is cached.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.cache.get(name) {
            return Ok(template);
        }
        let source = self.load_source(name)?;
        let template = self.compile(name, &source)?;
        Ok(self.cache.insert(template))
    }

    fn load_source(&self, name: &str) -> Result<String> {
        if let Some(source) = self.templates.load(name)? {
            return Ok(source);
        }
        if let Some(loader) = &self.loader {
            if let Some(source) = loader.load(name)? {
                tracing::debug!("Resolved template {} through loader", name);
                return Ok(source);
            }
        }
        Err(Error::TemplateNotFound(name.to_string()))
    }

    /// Compile a template from source without caching it
    pub fn template_from_str(&self, name: &str, source: &str) -> Result<Arc<Template>> {
        self.compile(name, source)
    }

    fn compile(&self, name: &str, source: &str) -> Result<Arc<Template>> {
        tracing::debug!("Compiling template {}", name);
        let ast = crate::syntax::parse(name, source, &self.config)?;
        let autoescape = self.config.autoescape_for(name);

        let macros = Arc::new(MacroRegistry::new());
        let defined: Vec<Arc<Macro>> = ast
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Macro(def) => Some(Arc::new(Macro::new(
                    def.clone(),
                    name,
                    &macros,
                    autoescape,
                ))),
                _ => None,
            })
            .collect();
        macros.register_all(defined)?;

        Ok(Arc::new(Template {
            name: name.to_string(),
            ast,
            macros,
            autoescape,
        }))
    }

    /// Names of every template reachable from this environment
    pub fn list_templates(&self) -> Result<Vec<String>> {
        let mut names = self.templates.list()?;
        if let Some(loader) = &self.loader {
            for name in loader.list()? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop one compiled template so the next lookup reloads it
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache.invalidate(name)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    pub fn render_template(&self, name: &str, ctx: &Context) -> Result<String> {
        self.get_template(name)?.render(self, ctx)
    }

    /// Render a named template against any serializable map-like value
    pub fn render<S: Serialize + ?Sized>(&self, name: &str, data: &S) -> Result<String> {
        self.get_template(name)?.render_with(self, data)
    }

    /// Compile and render template source in one step
    pub fn render_str(&self, source: &str, ctx: &Context) -> Result<String> {
        self.template_from_str(STRING_TEMPLATE_NAME, source)?
            .render(self, ctx)
    }

    // ========================================================================
    // Environment macros
    // ========================================================================

    /// Publish macros of `template` so every template can call them by name.
    /// An empty `names` list publishes all of them.
    pub fn import_macros(&self, template: &str, names: &[&str]) -> Result<()> {
        let source = self.get_template(template)?;
        let selected = if names.is_empty() {
            source
                .macros()
                .names()
                .iter()
                .filter_map(|name| source.macros().get(name))
                .collect()
        } else {
            names
                .iter()
                .map(|name| {
                    source
                        .macros()
                        .get(name)
                        .ok_or_else(|| MacroError::NotFound(name.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        tracing::debug!(
            "Importing {} macro(s) from {} into the environment",
            selected.len(),
            template
        );
        self.macros.register_all(selected)?;
        self.pinned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(source);
        Ok(())
    }

    /// Call an environment macro from Rust; returns its rendered text
    pub fn call_macro(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<String> {
        let mac = self
            .macros
            .get(name)
            .ok_or_else(|| MacroError::NotFound(name.to_string()))?;
        let value = Evaluator::for_macro(self, &mac).call_macro(&mac, args, kwargs, None)?;
        Ok(value.to_string())
    }
}
