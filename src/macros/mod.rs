//! Macros: definitions bound to their template, registries and argument binding

use std::sync::{Arc, RwLock, Weak};

use indexmap::IndexMap;

use crate::error::{MacroError, Result};
use crate::runtime::{Context, Kwargs, Value};
use crate::syntax::ast::{Expr, MacroDef};

/// A macro bound to the template that defined it
#[derive(Debug)]
pub struct Macro {
    pub def: Arc<MacroDef>,
    /// Name of the defining template
    pub template: String,
    /// Macros defined alongside this one
    pub(crate) siblings: Weak<MacroRegistry>,
    /// Autoescape default of the defining template
    pub(crate) autoescape: bool,
    /// Variables visible where the macro was defined
    pub(crate) closure: Context,
}

impl Macro {
    pub fn new(def: Arc<MacroDef>, template: &str, siblings: &Arc<MacroRegistry>, autoescape: bool) -> Self {
        Self {
            def,
            template: template.to_string(),
            siblings: Arc::downgrade(siblings),
            autoescape,
            closure: Context::new(),
        }
    }

    pub(crate) fn with_closure(mut self, closure: Context) -> Self {
        self.closure = closure;
        self
    }

    /// The same definition seeing `closure` as its defining scope
    pub(crate) fn rebind(&self, closure: Context) -> Macro {
        Macro {
            def: self.def.clone(),
            template: self.template.clone(),
            siblings: self.siblings.clone(),
            autoescape: self.autoescape,
            closure,
        }
    }

    /// Registry of the defining template; empty once that template is dropped
    pub(crate) fn siblings(&self) -> Arc<MacroRegistry> {
        self.siblings.upgrade().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Whether `other` comes from the same definition site
    fn same_definition(&self, other: &Macro) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
            || (self.template == other.template
                && self.def.span == other.def.span
                && self.def.params == other.def.params)
    }

    /// Match call arguments to parameters.
    ///
    /// Keyword arguments are bound first, then positionals fill the remaining
    /// parameters in declaration order. Parameters still unbound are returned
    /// with their default expression so the caller can evaluate it in the
    /// macro's own scope.
    pub fn bind_arguments(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<BoundArguments<'_>, MacroError> {
        let params = &self.def.params;
        let mut values: IndexMap<String, Option<Value>> =
            params.iter().map(|p| (p.clone(), None)).collect();

        for (name, value) in kwargs {
            match values.get_mut(&name) {
                Some(slot) => *slot = Some(value),
                None => {
                    return Err(MacroError::UnknownParameter {
                        macro_name: self.def.name.clone(),
                        param: name,
                    })
                }
            }
        }

        let given = args.len();
        let mut positional = args.into_iter();
        for slot in values.values_mut() {
            if slot.is_none() {
                match positional.next() {
                    Some(value) => *slot = Some(value),
                    None => break,
                }
            }
        }
        if positional.next().is_some() {
            return Err(MacroError::TooManyArguments {
                macro_name: self.def.name.clone(),
                expected: params.len(),
                given,
            });
        }

        let mut bound = Vec::with_capacity(params.len());
        for (name, value) in values {
            let slot = match value {
                Some(value) => Binding::Value(value),
                None => match self.def.defaults.get(&name) {
                    Some(expr) => Binding::Default(expr),
                    None => {
                        return Err(MacroError::MissingParameter {
                            macro_name: self.def.name.clone(),
                            param: name,
                        })
                    }
                },
            };
            bound.push((name, slot));
        }
        Ok(BoundArguments { bindings: bound })
    }
}

/// How one parameter receives its value
#[derive(Debug)]
pub enum Binding<'a> {
    Value(Value),
    Default(&'a Expr),
}

/// Parameters paired with their bound values, in declaration order
#[derive(Debug)]
pub struct BoundArguments<'a> {
    pub bindings: Vec<(String, Binding<'a>)>,
}

// ============================================================================
// Registry
// ============================================================================

/// Named macros of one template, or of the whole environment
#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: RwLock<IndexMap<String, Arc<Macro>>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a macro; re-registering the same definition is a no-op
    pub fn register(&self, mac: Arc<Macro>) -> Result<(), MacroError> {
        self.register_all(vec![mac])
    }

    /// Register several macros at once; either all are added or none
    pub fn register_all(&self, macros: Vec<Arc<Macro>>) -> Result<(), MacroError> {
        let mut map = self.macros.write().unwrap_or_else(|e| e.into_inner());
        let mut pending: IndexMap<String, Arc<Macro>> = IndexMap::new();
        for mac in macros {
            let name = mac.name().to_string();
            let existing = pending.get(&name).or_else(|| map.get(&name));
            match existing {
                Some(prev) if prev.same_definition(&mac) => continue,
                Some(_) => return Err(MacroError::AlreadyRegistered(name)),
                None => {
                    pending.insert(name, mac);
                }
            }
        }
        map.extend(pending);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Macro>> {
        self.macros
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.macros
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.macros.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentConfig;
    use crate::syntax::ast::Node;

    fn macro_from(source: &str, template: &str) -> Arc<Macro> {
        let ast = crate::syntax::parse(template, source, &EnvironmentConfig::default()).unwrap();
        let registry = Arc::new(MacroRegistry::new());
        match ast.nodes.into_iter().next() {
            Some(Node::Macro(def)) => Arc::new(Macro::new(def, template, &registry, false)),
            other => panic!("expected macro, got {:?}", other),
        }
    }

    fn greet() -> Arc<Macro> {
        macro_from(
            "{% macro greet(name, greeting='Hello') %}{{ greeting }} {{ name }}{% endmacro %}",
            "m.html",
        )
    }

    #[test]
    fn test_bind_keyword_then_default() {
        let mac = greet();
        let mut kwargs = Kwargs::new();
        kwargs.insert("name".into(), Value::from("World"));
        let bound = mac.bind_arguments(vec![], kwargs).unwrap();
        assert!(matches!(&bound.bindings[0], (n, Binding::Value(v)) if n == "name" && *v == Value::from("World")));
        assert!(matches!(&bound.bindings[1], (n, Binding::Default(_)) if n == "greeting"));
    }

    #[test]
    fn test_bind_positional_fills_unset_in_order() {
        let mac = greet();
        let mut kwargs = Kwargs::new();
        kwargs.insert("name".into(), Value::from("World"));
        let bound = mac.bind_arguments(vec![Value::from("Hi")], kwargs).unwrap();
        assert!(matches!(&bound.bindings[1], (_, Binding::Value(v)) if *v == Value::from("Hi")));
    }

    #[test]
    fn test_bind_errors() {
        let mac = greet();
        assert!(matches!(
            mac.bind_arguments(vec![], Kwargs::new()),
            Err(MacroError::MissingParameter { param, .. }) if param == "name"
        ));

        let mut kwargs = Kwargs::new();
        kwargs.insert("nope".into(), Value::Int(1));
        assert!(matches!(
            mac.bind_arguments(vec![Value::from("x")], kwargs),
            Err(MacroError::UnknownParameter { param, .. }) if param == "nope"
        ));

        let args = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        assert!(matches!(
            mac.bind_arguments(args, Kwargs::new()),
            Err(MacroError::TooManyArguments { expected: 2, given: 3, .. })
        ));
    }

    #[test]
    fn test_registry_idempotent_and_atomic() {
        let registry = MacroRegistry::new();
        let mac = greet();
        registry.register(mac.clone()).unwrap();
        registry.register(mac.clone()).unwrap();
        assert_eq!(registry.len(), 1);

        let other = macro_from("{% macro greet() %}x{% endmacro %}", "other.html");
        let fresh = macro_from("{% macro fresh() %}y{% endmacro %}", "other.html");
        let err = registry.register_all(vec![fresh, other]).unwrap_err();
        assert_eq!(err, MacroError::AlreadyRegistered("greet".into()));
        assert_eq!(registry.names(), vec!["greet"]);
        assert!(registry.get("fresh").is_none());
    }
}
