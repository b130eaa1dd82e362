//! Template loaders - resolve a template name to its source text

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Resolves template names to source text.
///
/// `Ok(None)` means the template does not exist; `Err` is reserved for
/// failures while reading a template that does.
pub trait Loader: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<String>>;

    /// Names of all templates this loader can resolve, when enumerable
    fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Memory loader
// ============================================================================

/// Templates held in memory, keyed by name
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: RwLock<IndexMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(self, name: &str, source: &str) -> Self {
        self.add(name, source);
        self
    }

    pub fn add(&self, name: &str, source: &str) {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(name)
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}

// ============================================================================
// Filesystem loader
// ============================================================================

/// Loads templates from one or more directories, first match wins
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    search_paths: Vec<PathBuf>,
}

impl FileSystemLoader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            search_paths: vec![dir.as_ref().to_path_buf()],
        }
    }

    pub fn with_paths<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            search_paths: dirs.into_iter().map(|d| d.as_ref().to_path_buf()).collect(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Template names are relative, `/`-separated and may not leave the search path
    fn safe_relative(name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::invalid(format!(
                        "template name '{}' escapes the search path",
                        name
                    )))
                }
            }
        }
        Ok(out)
    }
}

impl Loader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let relative = Self::safe_relative(name)?;
        for dir in &self.search_paths {
            let path = dir.join(&relative);
            if path.is_file() {
                tracing::debug!("Loading template {:?} from {:?}", name, path);
                return Ok(Some(fs::read_to_string(&path)?));
            }
        }
        Ok(None)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dir in &self.search_paths {
            for entry in WalkDir::new(dir)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(dir) else {
                    continue;
                };
                // Skip hidden files and directories
                let hidden = relative.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                });
                if hidden {
                    continue;
                }
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

// ============================================================================
// Closure loader
// ============================================================================

/// Delegates resolution to a closure
pub struct FnLoader<F>
where
    F: Fn(&str) -> Result<Option<String>> + Send + Sync,
{
    func: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&str) -> Result<Option<String>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Loader for FnLoader<F>
where
    F: Fn(&str) -> Result<Option<String>> + Send + Sync,
{
    fn load(&self, name: &str) -> Result<Option<String>> {
        (self.func)(name)
    }
}
