use crate::error::RuntimeResult;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable opaque identifier for a (caller, request) pair.
///
/// Produced only by the resolver. Distinct requests may map to one id (a
/// manually mocked name reached through different spellings); mock
/// registries and every policy-input map key on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        ModuleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for directory-scoped resolution
#[derive(Debug, Clone, Default)]
pub struct ResolveInDirOptions {
    /// Do not walk the dependency-root chain above `dir`
    pub skip_dependency_resolution: bool,
}

/// Path resolution strategy consumed by the runtime.
///
/// Shared across runtimes and treated as read-mostly: the runtime never asks
/// the resolver to mutate anything, and virtual-mock knowledge is passed in
/// per call.
pub trait PathResolver {
    /// Stable module id for a request made from `from`. With `request`
    /// absent, the id of the `from` module itself.
    fn module_id(
        &self,
        virtual_mocks: &HashSet<PathBuf>,
        from: &Path,
        request: Option<&str>,
    ) -> ModuleId;

    /// Absolute path of the module `request` names when required from
    /// `from`.
    fn resolve(&self, from: &Path, request: &str) -> RuntimeResult<PathBuf>;

    /// Resolve `request` against one explicit directory, or None.
    fn resolve_from_dir_if_exists(
        &self,
        dir: &Path,
        request: &str,
        options: &ResolveInDirOptions,
    ) -> Option<PathBuf>;

    fn is_core_module(&self, name: &str) -> bool;

    /// Path of a by-name (haste) module, if one is registered.
    fn get_module(&self, name: &str) -> Option<PathBuf>;

    /// Path of a manual mock for `name` visible from `from`.
    fn get_mock_module(&self, from: &Path, name: &str) -> Option<PathBuf>;

    /// Path of a stub redirection for `name`, if configured.
    fn resolve_stub_module(&self, from: &Path, name: &str) -> Option<PathBuf>;

    /// Directory-search chain used for `require.resolve.paths` and module
    /// record `paths`.
    fn get_module_paths(&self, dir: &Path) -> Vec<PathBuf>;

    /// Path a module *would* occupy, whether or not it exists; anchors
    /// virtual mocks.
    fn get_module_path(&self, from: &Path, name: &str) -> PathBuf;
}
