use crate::error::{ModuleNotFoundError, RuntimeError, RuntimeResult};
use crate::interface::{normalize, ResolveInDirOptions};
use crate::registry::{RegistryRef, SharedRecord};
use crate::runtime::ModuleRuntime;
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

/// Options accepted by [`ModuleRequire::resolve`]
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Directories to try in order instead of the normal resolution walk
    pub paths: Option<Vec<PathBuf>>,
}

/// The caller-facing require surface, bound to one module record.
///
/// Holds the runtime weakly: records own their require, and a record must
/// not keep its runtime alive through that edge.
#[derive(Clone)]
pub struct ModuleRequire {
    runtime: Weak<ModuleRuntime>,
    filename: PathBuf,
    registry: Option<RegistryRef>,
    internal: bool,
}

impl ModuleRequire {
    pub(crate) fn new(
        runtime: Weak<ModuleRuntime>,
        filename: PathBuf,
        registry: Option<RegistryRef>,
        internal: bool,
    ) -> Self {
        Self {
            runtime,
            filename,
            registry,
            internal,
        }
    }

    /// Path of the module this require is bound to.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    fn runtime(&self) -> RuntimeResult<Rc<ModuleRuntime>> {
        self.runtime.upgrade().ok_or_else(|| {
            RuntimeError::Harness(
                "the module runtime backing this require surface has been dropped".to_string(),
            )
        })
    }

    /// Full-policy require. Internal-module requires stay internal.
    pub fn require(&self, request: &str) -> RuntimeResult<Value> {
        let runtime = self.runtime()?;
        if self.internal {
            runtime.require_internal_module(&self.filename, Some(request))
        } else {
            runtime.require_module_or_mock(&self.filename, request)
        }
    }

    /// Deliver the real module regardless of any mock decision.
    pub fn require_actual(&self, request: &str) -> RuntimeResult<Value> {
        self.runtime()?.require_actual(&self.filename, request)
    }

    /// Deliver the mock for `request`.
    pub fn require_mock(&self, request: &str) -> RuntimeResult<Value> {
        self.runtime()?.require_mock(&self.filename, request)
    }

    /// Resolve `request` to an absolute path.
    ///
    /// With an explicit `paths` option, each directory is tried in order
    /// and exhaustion fails with a message enumerating them. Without it, a
    /// failed normal resolution falls back to the manual-mock lookup before
    /// rethrowing.
    pub fn resolve(
        &self,
        request: &str,
        options: Option<&ResolveOptions>,
    ) -> RuntimeResult<PathBuf> {
        let runtime = self.runtime()?;

        if let Some(paths) = options.and_then(|options| options.paths.as_ref()) {
            let base = self.filename.parent().unwrap_or_else(|| Path::new(""));
            let dir_options = ResolveInDirOptions {
                skip_dependency_resolution: true,
            };
            let mut tried = Vec::new();
            for path in paths {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    normalize(&base.join(path))
                };
                if let Some(found) =
                    runtime
                        .resolver
                        .resolve_from_dir_if_exists(&absolute, request, &dir_options)
                {
                    return Ok(found);
                }
                tried.push(absolute);
            }
            return Err(ModuleNotFoundError::new(request, &self.filename)
                .with_tried_paths(tried)
                .into_error());
        }

        match runtime.resolve_module(&self.filename, request) {
            Ok(path) => Ok(path),
            Err(error) if error.is_not_found() => {
                match runtime.resolver.get_mock_module(&self.filename, request) {
                    Some(mock) => Ok(mock),
                    None => Err(error),
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Search-path sequence `request` would be resolved against: the
    /// caller's directory for relative requests, None for core modules,
    /// otherwise the resolver's directory chain.
    pub fn resolve_paths(&self, request: &str) -> RuntimeResult<Option<Vec<PathBuf>>> {
        if request.is_empty() {
            return Err(RuntimeError::BadResolveArg(
                "The first argument to require.resolve.paths must not be the empty string."
                    .to_string(),
            ));
        }
        let runtime = self.runtime()?;
        let dirname = self
            .filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if request.starts_with('.') {
            return Ok(Some(vec![dirname]));
        }
        if runtime.resolver.is_core_module(request) {
            return Ok(None);
        }
        Ok(Some(runtime.resolver.get_module_paths(&dirname)))
    }

    /// Read-only view of the caller-visible module cache.
    pub fn cache(&self) -> Vec<PathBuf> {
        self.runtime
            .upgrade()
            .map(|runtime| runtime.module_cache_keys())
            .unwrap_or_default()
    }

    /// Terminal ancestor of the caller's parent chain, following Node's
    /// `require.main` contract.
    pub fn main(&self) -> Option<SharedRecord> {
        let runtime = self.runtime.upgrade()?;
        let own_record = self.record(&runtime)?;
        let mut current = runtime.module_parent(&own_record.borrow())?;
        loop {
            let (parent, current_id) = {
                let record = current.borrow();
                (runtime.module_parent(&record), record.id.clone())
            };
            match parent {
                Some(parent) => {
                    if parent.borrow().id == current_id {
                        return Some(current);
                    }
                    current = parent;
                }
                None => return Some(current),
            }
        }
    }

    fn record(&self, runtime: &Rc<ModuleRuntime>) -> Option<SharedRecord> {
        match self.registry {
            Some(registry) => runtime.registries.get_record(registry, &self.filename),
            None => runtime.registries.find_record(&self.filename),
        }
    }
}
