//! Variable scopes for a single render

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::value::Value;
use crate::error::{Error, Result};

/// A stack of binding frames; the innermost frame shadows outer ones.
///
/// Frames are reference counted and copied on first write, so cloning a
/// context (for a loop iteration, macro call or `with` block) is cheap and the
/// clone never writes back into the frames it was made from.
#[derive(Debug, Clone)]
pub struct Context {
    frames: Vec<Arc<IndexMap<String, Value>>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            frames: vec![Arc::new(IndexMap::new())],
        }
    }

    /// Build a context from any serializable map-like value
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        match Value::from_serialize(value)? {
            Value::Map(map) => Ok(Self { frames: vec![map] }),
            Value::None => Ok(Self::new()),
            other => Err(Error::invalid(format!(
                "context must be a mapping, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Build a context from a JSON object
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Self::from_serialize(json)
    }

    /// A new context with an empty innermost frame on top of this one
    pub fn child(&self) -> Context {
        let mut frames = self.frames.clone();
        frames.push(Arc::new(IndexMap::new()));
        Context { frames }
    }

    /// Look a name up from the innermost frame outward
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind a name in the innermost frame
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(frame) = self.frames.last_mut() {
            Arc::make_mut(frame).insert(name.into(), value.into());
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set(name, Value::Bool(value));
    }

    /// Bind any serializable value
    pub fn set_object<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let value = Value::from_serialize(value)?;
        self.set(name, value);
        Ok(())
    }

    /// Bindings of the innermost frame
    pub fn top_frame(&self) -> &IndexMap<String, Value> {
        self.frames
            .last()
            .map(|f| f.as_ref())
            .unwrap_or_else(|| empty_frame())
    }

    /// All visible bindings with shadowing applied
    pub fn flatten(&self) -> IndexMap<String, Value> {
        let mut out = IndexMap::new();
        for frame in &self.frames {
            for (k, v) in frame.iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

fn empty_frame() -> &'static IndexMap<String, Value> {
    lazy_static::lazy_static! {
        static ref EMPTY: IndexMap<String, Value> = IndexMap::new();
    }
    &EMPTY
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_shadows_and_does_not_leak() {
        let mut ctx = Context::new();
        ctx.set("x", 1);
        let mut child = ctx.child();
        assert_eq!(child.get("x"), Some(&Value::Int(1)));
        child.set("x", 2);
        child.set("y", 3);
        assert_eq!(child.get("x"), Some(&Value::Int(2)));
        assert_eq!(ctx.get("x"), Some(&Value::Int(1)));
        assert!(ctx.get("y").is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut ctx = Context::new();
        ctx.set("a", "one");
        let mut copy = ctx.clone();
        copy.set("a", "two");
        assert_eq!(ctx.get("a"), Some(&Value::from("one")));
        assert_eq!(copy.get("a"), Some(&Value::from("two")));
    }

    #[test]
    fn test_from_serialize() {
        let ctx = Context::from_json(&json!({"user": {"name": "ada"}, "n": 3})).unwrap();
        assert_eq!(ctx.get("n"), Some(&Value::Int(3)));
        assert!(Context::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_set_object_and_flatten() {
        #[derive(Serialize)]
        struct Site {
            title: String,
        }
        let mut ctx = Context::new();
        ctx.set_object("site", &Site { title: "Blog".into() }).unwrap();
        let mut child = ctx.child();
        child.set_bool("flag", true);
        let flat = child.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(
            flat["site"].get_attr("title"),
            Some(Value::from("Blog"))
        );
    }
}
