use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::ExecutionState;
use crate::hooks::TestHooks;
use crate::interface::{
    normalize, HostFs, ModuleId, PathResolver, ScriptTransformer, TestEnvironment,
};
use crate::policy::{under_dependency_root, EarlyResolution, MockPolicy, RequireIntent, Resolution};
use crate::registry::{ModuleRecord, RegistrySet, SharedRecord};
use crate::require::ModuleRequire;
use crate::value::Value;
use log::debug;
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Directory name probed for manual mocks adjacent to a real module
pub(crate) const MOCKS_DIR: &str = "__mocks__";

/// One module runtime: registries, policy state and the evaluation plumbing
/// for a single test's module graph.
///
/// Everything here runs on one logical stream; interior mutability is cell
/// based and no borrow is held across a nested require.
pub struct ModuleRuntime {
    pub(crate) config: RuntimeConfig,
    pub(crate) resolver: Rc<dyn PathResolver>,
    pub(crate) environment: Rc<dyn TestEnvironment>,
    pub(crate) transformer: Rc<dyn ScriptTransformer>,
    pub(crate) fs: Rc<dyn HostFs>,
    pub(crate) registries: RegistrySet,
    pub(crate) policy: MockPolicy,
    pub(crate) exec_state: ExecutionState,
    pub(crate) cache_fs: RefCell<HashMap<PathBuf, String>>,
    pub(crate) source_maps: RefCell<HashMap<PathBuf, PathBuf>>,
    pub(crate) coverage_mapped: RefCell<HashSet<PathBuf>>,
    pub(crate) exit_code: Cell<Option<i32>>,
}

impl ModuleRuntime {
    pub fn new(
        config: RuntimeConfig,
        resolver: Rc<dyn PathResolver>,
        environment: Rc<dyn TestEnvironment>,
        transformer: Rc<dyn ScriptTransformer>,
        fs: Rc<dyn HostFs>,
    ) -> RuntimeResult<Rc<Self>> {
        let unmock_patterns = if config.unmock_patterns.is_empty() {
            None
        } else {
            let union = config.unmock_patterns.join("|");
            Some(Regex::new(&union).map_err(|e| {
                RuntimeError::Config(format!("invalid unmock pattern: {}", e))
            })?)
        };
        let policy = MockPolicy::new(unmock_patterns, config.automock);

        let runtime = Rc::new(Self {
            config,
            resolver,
            environment,
            transformer,
            fs,
            registries: RegistrySet::new(),
            policy,
            exec_state: ExecutionState::new(),
            cache_fs: RefCell::new(HashMap::new()),
            source_maps: RefCell::new(HashMap::new()),
            coverage_mapped: RefCell::new(HashSet::new()),
            exit_code: Cell::new(None),
        });

        // Setup files living under the dependency root must not drag their
        // own dependencies into automocking.
        if runtime.config.automock {
            for setup_file in runtime.config.setup_files.clone() {
                if under_dependency_root(&setup_file) {
                    let id = runtime.module_id_for(&setup_file, None);
                    runtime.policy.set_transitive(id, false);
                }
            }
        }

        Ok(runtime)
    }

    pub(crate) fn module_id_for(&self, from: &Path, request: Option<&str>) -> ModuleId {
        let virtual_mocks = self.policy.borrow_virtual_mocks();
        self.resolver.module_id(&virtual_mocks, from, request)
    }

    pub(crate) fn resolve_module(&self, from: &Path, request: &str) -> RuntimeResult<PathBuf> {
        self.resolver.resolve(from, request)
    }

    /// Full-policy require: what evaluated code's bare `require` runs.
    pub fn require_module_or_mock(
        self: &Rc<Self>,
        from: &Path,
        request: &str,
    ) -> RuntimeResult<Value> {
        self.require_dispatch(from, request)
            .map_err(|error| self.augment_not_found(error, from, request))
    }

    fn require_dispatch(self: &Rc<Self>, from: &Path, request: &str) -> RuntimeResult<Value> {
        match self.resolve_kind(from, request, RequireIntent::Normal)? {
            Resolution::UseCore(name) => self.environment.core_module(&name),
            Resolution::UseReal(path) | Resolution::UseManualMock(path) => {
                self.load_real(from, Some(request), &path, false)
            }
            Resolution::UseAutoMock(id) => self.deliver_mock(from, request, id),
        }
    }

    /// Load the real module for `request`, honoring manual-mock substitution
    /// and core modules but never the mock decision. `request = None` loads
    /// `from` itself (the root of a module graph).
    pub fn require_module(
        self: &Rc<Self>,
        from: &Path,
        request: Option<&str>,
    ) -> RuntimeResult<Value> {
        self.require_real(from, request, false)
    }

    /// As [`ModuleRuntime::require_module`], but into the internal registry:
    /// never mocked and untouched by `reset_modules`.
    pub fn require_internal_module(
        self: &Rc<Self>,
        from: &Path,
        request: Option<&str>,
    ) -> RuntimeResult<Value> {
        self.require_real(from, request, true)
    }

    /// Bypass every mock decision and deliver the real module.
    pub fn require_actual(self: &Rc<Self>, from: &Path, request: &str) -> RuntimeResult<Value> {
        match self.resolve_kind(from, request, RequireIntent::ForceReal)? {
            Resolution::UseReal(path) => self.load_real(from, Some(request), &path, false),
            // ForceReal resolution yields nothing but real paths.
            _ => Err(RuntimeError::Harness(
                "force-real resolution left the real branch".to_string(),
            )),
        }
    }

    /// Deliver the mock for `request`: cached entry, registered factory,
    /// manual mock file or generated automock, in that order.
    pub fn require_mock(self: &Rc<Self>, from: &Path, request: &str) -> RuntimeResult<Value> {
        let id = self.module_id_for(from, Some(request));
        self.deliver_mock(from, request, id)
    }

    fn require_real(
        self: &Rc<Self>,
        from: &Path,
        request: Option<&str>,
        internal: bool,
    ) -> RuntimeResult<Value> {
        match request {
            None => self.load_real(from, None, &from.to_path_buf(), internal),
            Some(name) => {
                let intent = if internal {
                    RequireIntent::InternalOnly
                } else {
                    RequireIntent::Normal
                };
                match self.early_resolution(from, name, intent) {
                    Some(EarlyResolution::Core(core)) => self.environment.core_module(&core),
                    Some(EarlyResolution::Manual(path)) => {
                        self.load_real(from, Some(name), &path, internal)
                    }
                    None => {
                        let path = self.resolve_module(from, name)?;
                        self.load_real(from, Some(name), &path, internal)
                    }
                }
            }
        }
    }

    /// Registry-aware real-module load with pre-registration.
    ///
    /// The pre-registered record is a scoped claim: released by
    /// `loaded = true` on success, or by a caller-driven `reset_modules`
    /// when the load fails.
    pub(crate) fn load_real(
        self: &Rc<Self>,
        from: &Path,
        request: Option<&str>,
        module_path: &Path,
        internal: bool,
    ) -> RuntimeResult<Value> {
        let registry = self.registries.select_real(internal, module_path);
        if let Some(existing) = self.registries.get_record(registry, module_path) {
            let exports = existing.borrow().exports.clone();
            self.link_child(from, &existing);
            return Ok(exports);
        }

        let record = ModuleRecord::pre_register(module_path);
        self.registries
            .put_record(registry, module_path.to_path_buf(), Rc::clone(&record));
        self.load_module(&record, from, request, module_path, Some(registry))?;

        let exports = record.borrow().exports.clone();
        self.link_child(from, &record);
        Ok(exports)
    }

    pub(crate) fn deliver_mock(
        self: &Rc<Self>,
        from: &Path,
        request: &str,
        id: ModuleId,
    ) -> RuntimeResult<Value> {
        if let Some(cached) = self.registries.lookup_mock(&id) {
            return Ok(cached);
        }

        if let Some(factory) = self.policy.factory(&id) {
            let exports = factory();
            self.registries.put_mock(id, exports.clone());
            return Ok(exports);
        }

        let manual_or_stub = self.resolver.get_mock_module(from, request);
        let (mut module_path, mut is_manual_mock) = match manual_or_stub {
            Some(path) => {
                let redirected = self.resolver.resolve_stub_module(from, request).is_some();
                (path, !redirected)
            }
            None => (self.resolve_module(from, request)?, false),
        };

        if !is_manual_mock {
            // A `__mocks__` directory sitting next to the real file wins
            // over generation.
            if let (Some(dir), Some(base)) = (module_path.parent(), module_path.file_name()) {
                let candidate = dir.join(MOCKS_DIR).join(base);
                if self.fs.exists(&candidate) {
                    is_manual_mock = true;
                    module_path = candidate;
                }
            }
        }

        // A manual mock's record is not registered anywhere; only its
        // exports live on, keyed by module id.
        let exports = if is_manual_mock {
            let record = ModuleRecord::pre_register(&module_path);
            self.load_module(&record, from, Some(request), &module_path, None)?;
            let exports = record.borrow().exports.clone();
            exports
        } else {
            self.generate_mock(from, request)?
        };
        self.registries.put_mock(id, exports.clone());
        Ok(exports)
    }

    /// Discard user-visible registries and reset the environment's mock and
    /// timer state. Policy inputs survive; the internal registry survives.
    pub fn reset_modules(&self) {
        self.registries.reset();
        if self.environment.global().is_some() {
            self.environment.module_mocker().clear_all_mocks();
            if let Some(timers) = self.environment.fake_timers() {
                timers.reset();
            }
        }
        debug!("module registries reset");
    }

    /// Run `f` against fresh isolated registries. The isolation is torn
    /// down when `f` returns, on every exit path.
    pub fn isolate_modules<R>(&self, f: impl FnOnce() -> R) -> RuntimeResult<R> {
        let _scope = self.registries.enter_isolation()?;
        Ok(f())
    }

    pub fn clear_all_mocks(&self) {
        self.environment.module_mocker().clear_all_mocks();
    }

    pub fn reset_all_mocks(&self) {
        self.environment.module_mocker().reset_all_mocks();
    }

    pub fn restore_all_mocks(&self) {
        self.environment.module_mocker().restore_all_mocks();
    }

    /// Require surface bound to `filename`, for embedding harnesses.
    pub fn create_require(self: &Rc<Self>, filename: &Path) -> ModuleRequire {
        ModuleRequire::new(Rc::downgrade(self), filename.to_path_buf(), None, false)
    }

    /// Reflective control object bound to `filename`, for embedding
    /// harnesses; evaluated modules receive their own.
    pub fn hooks_for(self: &Rc<Self>, filename: &Path) -> TestHooks {
        let require = self.create_require(filename);
        TestHooks::new(Rc::downgrade(self), filename.to_path_buf(), require)
    }

    /// Resolve the parent of a record by caller key, against the record's
    /// own registry.
    pub fn module_parent(&self, record: &ModuleRecord) -> Option<SharedRecord> {
        let key = record.parent_key.as_ref()?;
        match record.registry {
            Some(registry) => self.registries.get_record(registry, key),
            None => self.registries.find_record(key),
        }
    }

    /// Exit code recorded by torn-down diagnostics, for the embedding
    /// harness to apply at process exit.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get()
    }

    /// Source maps registered while executing modules.
    pub fn source_maps(&self) -> HashMap<PathBuf, PathBuf> {
        self.source_maps.borrow().clone()
    }

    /// Files whose coverage must be remapped through their source map.
    pub fn needs_coverage_mapped(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.coverage_mapped.borrow().iter().cloned().collect();
        files.sort();
        files
    }

    /// Keys of the shared real registry (the require-surface cache view).
    pub fn module_cache_keys(&self) -> Vec<PathBuf> {
        self.registries.real_keys()
    }

    fn link_child(&self, from: &Path, child: &SharedRecord) {
        if let Some(parent) = self.registries.find_record(from) {
            if Rc::ptr_eq(&parent, child) {
                return;
            }
            let mut parent = parent.borrow_mut();
            let linked = parent
                .children
                .iter()
                .any(|existing| Rc::ptr_eq(existing, child));
            if !linked {
                parent.children.push(Rc::clone(child));
            }
        }
    }

    fn augment_not_found(&self, error: RuntimeError, from: &Path, request: &str) -> RuntimeError {
        match error {
            RuntimeError::ModuleNotFound(mut not_found)
                if not_found.hint.is_none() && not_found.tried_paths.is_none() =>
            {
                if let Some(hint) = self.sibling_extension_hint(from, request) {
                    not_found.hint = Some(hint);
                }
                RuntimeError::ModuleNotFound(not_found)
            }
            other => other,
        }
    }

    /// Hint for a failed relative require: sibling files sharing the base
    /// name but carrying an extension outside the configured set.
    fn sibling_extension_hint(&self, from: &Path, request: &str) -> Option<String> {
        if !(request.starts_with("./") || request.starts_with("../")) {
            return None;
        }
        if Path::new(request).extension().is_some() {
            return None;
        }

        let target = normalize(&from.parent()?.join(request));
        let stem = target.file_name()?.to_string_lossy().into_owned();
        let entries = self.fs.read_dir(target.parent()?).ok()?;

        let mut found = Vec::new();
        for entry in entries {
            let Some(extension) = entry.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(file_stem) = entry.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if file_stem == stem
                && !self
                    .config
                    .module_file_extensions
                    .iter()
                    .any(|known| known == extension)
            {
                found.push(format!("'{}.{}'", stem, extension));
            }
        }
        if found.is_empty() {
            return None;
        }
        Some(format!(
            "However, the runtime was able to find: {}. You might want to include a file \
             extension in your import, or extend 'module-file-extensions' (currently [{}]).",
            found.join(", "),
            self.config
                .module_file_extensions
                .iter()
                .map(|extension| format!("'{}'", extension))
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}
