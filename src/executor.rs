use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::TestHooks;
use crate::interface::TransformOptions;
use crate::registry::{RegistryRef, SharedRecord};
use crate::require::ModuleRequire;
use crate::runtime::ModuleRuntime;
use crate::value::Value;
use log::error;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Callable produced by the environment for one transformed script.
///
/// The entry point of an evaluated module is a function taking a fixed
/// prefix of positional arguments plus a variadic extra-globals tail; both
/// are carried by [`ModuleArguments`].
pub type ModuleWrapper = Rc<dyn Fn(ModuleArguments) -> RuntimeResult<()>>;

/// Everything injected into a module body when it is evaluated.
pub struct ModuleArguments {
    pub module: SharedRecord,
    pub exports: Value,
    pub require: ModuleRequire,
    pub dirname: PathBuf,
    pub filename: PathBuf,
    pub global: Value,
    pub hooks: TestHooks,
    /// One entry per configured extra global, in configuration order
    pub extra_globals: Vec<Value>,
}

/// Reentrancy state of the runtime: which module body is on the stack and
/// which file counts as the currently executing manual mock.
pub struct ExecutionState {
    current_module: RefCell<PathBuf>,
    current_manual_mock: RefCell<Option<PathBuf>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            current_module: RefCell::new(PathBuf::new()),
            current_manual_mock: RefCell::new(None),
        }
    }

    /// Path of the module currently executing, empty when idle.
    pub fn current_module(&self) -> PathBuf {
        self.current_module.borrow().clone()
    }

    pub fn current_manual_mock(&self) -> Option<PathBuf> {
        self.current_manual_mock.borrow().clone()
    }

    /// Save the pair and point both entries at `filename`. The returned
    /// guard restores the saved values on drop, so restoration holds on
    /// every exit path out of an evaluation, including errors raised by the
    /// evaluated body.
    pub fn enter(&self, filename: &Path) -> ExecutionScope<'_> {
        let saved_module = self.current_module.replace(filename.to_path_buf());
        let saved_manual = self
            .current_manual_mock
            .replace(Some(filename.to_path_buf()));
        ExecutionScope {
            state: self,
            saved_module,
            saved_manual,
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard restoring the reentrancy pair when an evaluation unwinds
pub struct ExecutionScope<'a> {
    state: &'a ExecutionState,
    saved_module: PathBuf,
    saved_manual: Option<PathBuf>,
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        self.state
            .current_module
            .replace(std::mem::take(&mut self.saved_module));
        self.state
            .current_manual_mock
            .replace(self.saved_manual.take());
    }
}

impl ModuleRuntime {
    /// Evaluate a pre-registered record's body inside the environment.
    ///
    /// `from` is None for root loads. A torn-down environment is reported,
    /// never thrown: the record keeps its empty exports and the process
    /// exit code is recorded as 1.
    pub(crate) fn exec_module(
        self: &Rc<Self>,
        record: &SharedRecord,
        from: Option<&Path>,
        registry: Option<RegistryRef>,
    ) -> RuntimeResult<()> {
        let Some(global) = self.environment.global() else {
            self.report_torn_down();
            return Ok(());
        };

        let filename = record.borrow().filename.clone();
        let dirname = filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let _scope = self.exec_state.enter(&filename);

        let internal = matches!(registry, Some(RegistryRef::Internal));
        let require = ModuleRequire::new(Rc::downgrade(self), filename.clone(), registry, internal);
        {
            let mut module = record.borrow_mut();
            module.children.clear();
            module.parent_key = from.map(Path::to_path_buf);
            module.registry = registry;
            module.paths = self.resolver.get_module_paths(&dirname);
            module.require = Some(require.clone());
        }

        let source = self.cached_source(&filename)?;
        let options = self.transform_options();
        let transformed = self.transformer.transform(&filename, &options, &source)?;
        if let Some(map_path) = &transformed.source_map_path {
            self.source_maps
                .borrow_mut()
                .insert(filename.clone(), map_path.clone());
            if transformed.map_coverage {
                self.coverage_mapped.borrow_mut().insert(filename.clone());
            }
        }

        let Some(wrapper) = self.environment.run_script(&transformed.script) else {
            self.report_torn_down();
            return Ok(());
        };

        let hooks = TestHooks::new(Rc::downgrade(self), filename.clone(), require.clone());
        let mut extra_globals = Vec::with_capacity(self.config.extra_globals.len());
        for name in &self.config.extra_globals {
            match global.get(name) {
                Some(value) if !value.is_undefined() => extra_globals.push(value),
                _ => return Err(RuntimeError::MissingExtraGlobal(name.clone())),
            }
        }

        let exports = record.borrow().exports.clone();
        wrapper(ModuleArguments {
            module: Rc::clone(record),
            exports,
            require,
            dirname,
            filename,
            global,
            hooks,
            extra_globals,
        })
    }

    /// Source text for `filename`, read through the per-runtime text cache.
    pub(crate) fn cached_source(&self, filename: &Path) -> RuntimeResult<String> {
        if let Some(text) = self.cache_fs.borrow().get(filename) {
            return Ok(text.clone());
        }
        let text = self.fs.read_text(filename)?;
        self.cache_fs
            .borrow_mut()
            .insert(filename.to_path_buf(), text.clone());
        Ok(text)
    }

    pub(crate) fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            collect_coverage: self.config.collect_coverage,
        }
    }

    /// Log the torn-down diagnostic and record exit code 1. Deliberately
    /// does not return an error so harness shutdown races degrade
    /// gracefully.
    pub(crate) fn report_torn_down(&self) {
        error!(
            "You are trying to import a file after the test environment has been torn down \
             (while executing '{}').",
            self.exec_state.current_module().display()
        );
        self.exit_code.set(Some(1));
    }
}
