//! Compiled template cache
//!
//! Parsed templates are immutable and shared between renders; the cache maps a
//! template name to its compiled form and tracks how often lookups hit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::environment::Template;

/// Hit/miss counters of a [`TemplateCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Cache of compiled templates keyed by name
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, Arc<Template>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a compiled template, counting the hit or miss
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Template cache hit: {}", name);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Template cache miss: {}", name);
        }
        found
    }

    /// Store a template; when another thread compiled the same name first,
    /// that entry is kept and returned
    pub fn insert(&self, template: Arc<Template>) -> Arc<Template> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(template.name().to_string())
            .or_insert(template)
            .clone()
    }

    /// Drop one template; returns whether it was cached
    pub fn invalidate(&self, name: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }
}
