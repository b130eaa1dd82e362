//! Stateful helper objects exposed to templates: `loop`, cycler, joiner
//! and namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;

use super::value::Value;
use crate::error::CallError;
use crate::syntax::ast::ForLoop;

// ============================================================================
// Loop state
// ============================================================================

/// The `loop` variable of one for-loop iteration
#[derive(Debug)]
pub struct LoopState {
    pub index0: usize,
    pub length: usize,
    pub depth0: usize,
    pub previtem: Option<Value>,
    pub nextitem: Option<Value>,
    /// Last arguments seen by `loop.changed()`, shared across iterations
    pub(crate) changed: Arc<Mutex<Option<Vec<Value>>>>,
    /// Set for `recursive` loops; `loop(items)` re-enters this loop
    pub(crate) recursive: Option<Arc<ForLoop>>,
}

impl LoopState {
    pub fn attr(&self, name: &str) -> Option<Value> {
        let value = match name {
            "index0" => Value::from(self.index0),
            "index" => Value::from(self.index0 + 1),
            "revindex0" => Value::from(self.length - self.index0 - 1),
            "revindex" => Value::from(self.length - self.index0),
            "first" => Value::Bool(self.index0 == 0),
            "last" => Value::Bool(self.index0 + 1 == self.length),
            "length" => Value::from(self.length),
            "depth0" => Value::from(self.depth0),
            "depth" => Value::from(self.depth0 + 1),
            "previtem" => self.previtem.clone().unwrap_or_default(),
            "nextitem" => self.nextitem.clone().unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    /// `loop.cycle(a, b, ...)`
    pub fn cycle(&self, args: &[Value]) -> Result<Value, CallError> {
        if args.is_empty() {
            return Err(CallError::new("loop.cycle() needs at least one value"));
        }
        Ok(args[self.index0 % args.len()].clone())
    }

    /// `loop.changed(value, ...)`: true when the arguments differ from the
    /// previous call in this loop
    pub fn changed(&self, args: &[Value]) -> bool {
        let mut last = self.changed.lock().unwrap_or_else(|e| e.into_inner());
        let same = last
            .as_ref()
            .map(|prev| prev.len() == args.len() && prev.iter().zip(args).all(|(a, b)| a.loose_eq(b)))
            .unwrap_or(false);
        if !same {
            *last = Some(args.to_vec());
        }
        !same
    }
}

// ============================================================================
// Cycler
// ============================================================================

/// Rotates through a fixed list of values
#[derive(Debug)]
pub struct Cycler {
    items: Vec<Value>,
    pos: Mutex<usize>,
}

impl Cycler {
    pub fn new(items: Vec<Value>) -> Result<Self, CallError> {
        if items.is_empty() {
            return Err(CallError::new("cycler needs at least one item"));
        }
        Ok(Self {
            items,
            pos: Mutex::new(0),
        })
    }

    /// Return the current item and advance
    pub fn next(&self) -> Value {
        let mut pos = self.pos.lock().unwrap_or_else(|e| e.into_inner());
        let item = self.items[*pos].clone();
        *pos = (*pos + 1) % self.items.len();
        item
    }

    pub fn current(&self) -> Value {
        let pos = self.pos.lock().unwrap_or_else(|e| e.into_inner());
        self.items[*pos].clone()
    }

    pub fn reset(&self) {
        *self.pos.lock().unwrap_or_else(|e| e.into_inner()) = 0;
    }
}

// ============================================================================
// Joiner
// ============================================================================

/// Returns an empty string on its first call and the separator afterwards
#[derive(Debug)]
pub struct Joiner {
    separator: String,
    used: AtomicBool,
}

impl Joiner {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            used: AtomicBool::new(false),
        }
    }

    pub fn call(&self) -> Value {
        if self.used.swap(true, Ordering::SeqCst) {
            Value::String(self.separator.clone())
        } else {
            Value::String(String::new())
        }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Mutable mapping shared by reference, the one way to carry state out of a
/// loop iteration
#[derive(Debug, Clone, Default)]
pub struct Namespace(Arc<RwLock<IndexMap<String, Value>>>);

impl Namespace {
    pub fn new(initial: IndexMap<String, Value>) -> Self {
        Namespace(Arc::new(RwLock::new(initial)))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
