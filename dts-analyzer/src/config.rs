use std::path::PathBuf;

/// Number of pins assumed for a GPIO controller without an `ngpios` property.
pub const DEFAULT_NGPIOS: usize = 32;

/// Analyzer settings. Passed explicitly to [`Context::new`](crate::Context::new); there is no
/// global configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directories searched for `#include` targets, after the including file's directory.
    pub include_paths: Vec<PathBuf>,
    /// Macros defined before the board file is preprocessed, as `(name, value)`.
    pub defines: Vec<(String, String)>,
    /// Pin count of GPIO controllers that don't declare `ngpios`.
    pub default_ngpios: usize,
    /// Nodes whose properties are not checked against their type.
    pub exempt_nodes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            defines: Vec::new(),
            default_ngpios: DEFAULT_NGPIOS,
            exempt_nodes: ["chosen", "aliases", "zephyr,user"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn include(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// Add a predefined macro from a `NAME[=VALUE]` string. A bare name is defined as `1`.
    pub fn define(mut self, spec: &str) -> Self {
        let (name, value) = match spec.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (spec.trim(), "1"),
        };

        if !name.is_empty() {
            self.defines.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn is_exempt(&self, node_name: &str) -> bool {
        self.exempt_nodes.iter().any(|n| n == node_name)
    }
}
