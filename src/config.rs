use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a module runtime instance, read once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Deliver automocks by default instead of real modules
    pub automock: bool,
    /// Patterns exempting module paths from automocking; compiled into a
    /// single union at construction
    pub unmock_patterns: Vec<String>,
    /// Extensions probed during resolution and used for not-found hints
    pub module_file_extensions: Vec<String>,
    /// Names looked up on the environment global and appended to every
    /// module wrapper invocation
    pub extra_globals: Vec<String>,
    /// Files evaluated before the test file; under automock, setup files
    /// inside the dependency root are exempted transitively
    pub setup_files: Vec<PathBuf>,
    pub root_dir: PathBuf,
    pub cache_directory: PathBuf,
    /// Paths matching any of these patterns are ignored by the resolver
    pub module_path_ignore_patterns: Vec<String>,
    /// Forwarded untouched to the external haste-map factory
    pub haste: HasteConfig,
    /// Ask the transformer to instrument for coverage
    pub collect_coverage: bool,
}

/// Options passed through to the haste-map factory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HasteConfig {
    pub platforms: Vec<String>,
    pub enable_symlinks: bool,
    pub throw_on_module_collision: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            automock: false,
            unmock_patterns: Vec::new(),
            module_file_extensions: vec![
                "js".to_string(),
                "json".to_string(),
                "node".to_string(),
            ],
            extra_globals: Vec::new(),
            setup_files: Vec::new(),
            root_dir: PathBuf::from("."),
            cache_directory: default_cache_directory(),
            module_path_ignore_patterns: Vec::new(),
            haste: HasteConfig::default(),
            collect_coverage: false,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> RuntimeResult<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
        toml::from_str(&text).map_err(|e| RuntimeError::Config(e.to_string()))
    }
}

fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("assay")
}
