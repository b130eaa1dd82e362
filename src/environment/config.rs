//! Environment configuration (delimiters, whitespace and escaping policy)

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub syntax: SyntaxConfig,
    pub autoescape: AutoEscape,
    /// Remove the first newline after a block or comment tag
    pub trim_blocks: bool,
    /// Strip indentation before a block or comment tag that starts a line
    pub lstrip_blocks: bool,
    /// Raise on undefined variables instead of rendering them empty
    pub strict_undefined: bool,
    pub keep_trailing_newline: bool,
    /// Limit for nested macro calls, includes, recursive loops and super()
    pub max_recursion: usize,
    /// Maximum number of items `range()` may produce
    pub max_range: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            syntax: SyntaxConfig::default(),
            autoescape: AutoEscape::default(),
            trim_blocks: false,
            lstrip_blocks: false,
            strict_undefined: false,
            keep_trailing_newline: true,
            max_recursion: 100,
            max_range: 100_000,
        }
    }
}

impl EnvironmentConfig {
    /// Load from a YAML or TOML file, chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        tracing::debug!("Loaded environment config from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EnvironmentConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::invalid(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EnvironmentConfig = toml::from_str(content)
            .map_err(|e| Error::invalid(format!("invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Delimiters must be non-empty and distinct
    pub fn validate(&self) -> Result<()> {
        let s = &self.syntax;
        let starts = [&s.variable_start, &s.block_start, &s.comment_start];
        let ends = [&s.variable_end, &s.block_end, &s.comment_end];
        if starts.iter().chain(ends.iter()).any(|d| d.is_empty()) {
            return Err(Error::invalid("template delimiters must not be empty"));
        }
        for (i, a) in starts.iter().enumerate() {
            if starts.iter().skip(i + 1).any(|b| a == b) {
                return Err(Error::invalid(format!("delimiter '{}' is used twice", a)));
            }
        }
        Ok(())
    }

    /// Whether output of the named template is escaped by default
    pub fn autoescape_for(&self, name: &str) -> bool {
        self.autoescape.applies_to(name)
    }
}

/// Tag delimiters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntaxConfig {
    pub variable_start: String,
    pub variable_end: String,
    pub block_start: String,
    pub block_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl Default for SyntaxConfig {
    fn default() -> Self {
        Self {
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            comment_start: "{#".to_string(),
            comment_end: "#}".to_string(),
        }
    }
}

/// Autoescape policy: on/off, or on for templates with one of the extensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoEscape {
    Enabled(bool),
    Extensions(Vec<String>),
}

impl Default for AutoEscape {
    fn default() -> Self {
        AutoEscape::Enabled(false)
    }
}

impl AutoEscape {
    /// The usual HTML/XML extension policy
    pub fn html() -> Self {
        AutoEscape::Extensions(
            ["html", "htm", "xml", "xhtml"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn applies_to(&self, name: &str) -> bool {
        match self {
            AutoEscape::Enabled(on) => *on,
            AutoEscape::Extensions(exts) => {
                let ext = Path::new(name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                exts.iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
            }
        }
    }
}

impl From<bool> for AutoEscape {
    fn from(on: bool) -> Self {
        AutoEscape::Enabled(on)
    }
}
