//! In-memory fakes for every collaborator interface, plus a small harness
//! wiring them into a runtime.

// Each integration suite exercises a different subset of the harness.
#![allow(dead_code)]

use assay_runtime::error::{ModuleNotFoundError, RuntimeError, RuntimeResult};
use assay_runtime::interface::{
    normalize, strip_bom, FakeTimers, HostFs, MockMetadata, ModuleId, ModuleMocker, PathResolver,
    ResolveInDirOptions, ScriptTransformer, TestEnvironment, TransformOptions, TransformResult,
    TransformedScript,
};
use assay_runtime::{ModuleArguments, ModuleRuntime, ModuleWrapper, RuntimeConfig, TestHooks, Value};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// In-memory host filesystem
pub struct MemoryFs {
    files: RefCell<HashMap<PathBuf, String>>,
    native: RefCell<HashMap<PathBuf, Value>>,
}

impl MemoryFs {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            files: RefCell::new(HashMap::new()),
            native: RefCell::new(HashMap::new()),
        })
    }

    pub fn add_file(&self, path: &str, text: &str) {
        self.files
            .borrow_mut()
            .insert(PathBuf::from(path), text.to_string());
    }

    pub fn add_native(&self, path: &str, exports: Value) {
        self.native
            .borrow_mut()
            .insert(PathBuf::from(path), exports);
    }
}

impl HostFs for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path) || self.native.borrow().contains_key(path)
    }

    fn read_text(&self, path: &Path) -> RuntimeResult<String> {
        match self.files.borrow().get(path) {
            Some(text) => Ok(strip_bom(text).to_string()),
            None => Err(RuntimeError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn read_dir(&self, dir: &Path) -> RuntimeResult<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = self
            .files
            .borrow()
            .keys()
            .chain(self.native.borrow().keys())
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn load_native_addon(&self, path: &Path) -> RuntimeResult<Value> {
        self.native
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::NativeAddon(path.to_path_buf()))
    }
}

/// Deterministic in-memory path resolver
pub struct FakeResolver {
    fs: Rc<MemoryFs>,
    root: PathBuf,
    extensions: Vec<String>,
    core: RefCell<HashSet<String>>,
    haste: RefCell<HashMap<String, PathBuf>>,
    manual_mocks: RefCell<HashMap<String, PathBuf>>,
    stubs: RefCell<HashMap<String, PathBuf>>,
}

impl FakeResolver {
    pub fn new(fs: Rc<MemoryFs>, root: &str) -> Rc<Self> {
        Rc::new(Self {
            fs,
            root: PathBuf::from(root),
            extensions: vec!["js".to_string(), "json".to_string(), "node".to_string()],
            core: RefCell::new(HashSet::new()),
            haste: RefCell::new(HashMap::new()),
            manual_mocks: RefCell::new(HashMap::new()),
            stubs: RefCell::new(HashMap::new()),
        })
    }

    pub fn add_core_module(&self, name: &str) {
        self.core.borrow_mut().insert(name.to_string());
    }

    pub fn add_haste_module(&self, name: &str, path: &str) {
        self.haste
            .borrow_mut()
            .insert(name.to_string(), PathBuf::from(path));
    }

    /// Register a by-name manual mock, the `__mocks__/<name>` idiom.
    pub fn add_manual_mock(&self, name: &str, path: &str) {
        self.manual_mocks
            .borrow_mut()
            .insert(name.to_string(), PathBuf::from(path));
    }

    pub fn add_stub(&self, name: &str, path: &str) {
        self.stubs
            .borrow_mut()
            .insert(name.to_string(), PathBuf::from(path));
    }

    fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        if self.fs.exists(candidate) {
            return Some(candidate.to_path_buf());
        }
        for extension in &self.extensions {
            let with_extension = PathBuf::from(format!("{}.{}", candidate.display(), extension));
            if self.fs.exists(&with_extension) {
                return Some(with_extension);
            }
        }
        let index = candidate.join("index.js");
        if self.fs.exists(&index) {
            return Some(index);
        }
        None
    }

    fn try_resolve(&self, from: &Path, request: &str) -> Option<PathBuf> {
        if request.starts_with('.') {
            let base = from.parent()?;
            return self.probe(&normalize(&base.join(request)));
        }
        if Path::new(request).is_absolute() {
            return self.probe(&normalize(Path::new(request)));
        }
        if let Some(path) = self.haste.borrow().get(request) {
            return Some(path.clone());
        }
        let mut dir = from.parent();
        while let Some(current) = dir {
            if let Some(found) = self.probe(&current.join("node_modules").join(request)) {
                return Some(found);
            }
            dir = current.parent();
        }
        None
    }
}

impl PathResolver for FakeResolver {
    fn module_id(
        &self,
        virtual_mocks: &HashSet<PathBuf>,
        from: &Path,
        request: Option<&str>,
    ) -> ModuleId {
        match request {
            None => ModuleId::new(from.display().to_string()),
            Some(name) => {
                if let Some(path) = self.try_resolve(from, name) {
                    return ModuleId::new(path.display().to_string());
                }
                let virtual_path = self.get_module_path(from, name);
                if virtual_mocks.contains(&virtual_path) {
                    return ModuleId::new(virtual_path.display().to_string());
                }
                if let Some(mock) = self.get_mock_module(from, name) {
                    return ModuleId::new(mock.display().to_string());
                }
                ModuleId::new(format!("{}::{}", from.display(), name))
            }
        }
    }

    fn resolve(&self, from: &Path, request: &str) -> RuntimeResult<PathBuf> {
        self.try_resolve(from, request)
            .ok_or_else(|| ModuleNotFoundError::new(request, from).into_error())
    }

    fn resolve_from_dir_if_exists(
        &self,
        dir: &Path,
        request: &str,
        _options: &ResolveInDirOptions,
    ) -> Option<PathBuf> {
        self.probe(&normalize(&dir.join(request)))
    }

    fn is_core_module(&self, name: &str) -> bool {
        self.core.borrow().contains(name)
    }

    fn get_module(&self, name: &str) -> Option<PathBuf> {
        self.haste.borrow().get(name).cloned()
    }

    fn get_mock_module(&self, _from: &Path, name: &str) -> Option<PathBuf> {
        self.manual_mocks.borrow().get(name).cloned()
    }

    fn resolve_stub_module(&self, _from: &Path, name: &str) -> Option<PathBuf> {
        self.stubs.borrow().get(name).cloned()
    }

    fn get_module_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut current = Some(dir);
        while let Some(directory) = current {
            paths.push(directory.join("node_modules"));
            current = directory.parent();
        }
        paths
    }

    fn get_module_path(&self, from: &Path, name: &str) -> PathBuf {
        if name.starts_with('.') {
            let base = from.parent().unwrap_or_else(|| Path::new(""));
            normalize(&base.join(name))
        } else {
            normalize(&self.root.join(name))
        }
    }
}

/// Mock facility with just enough behavior to observe delegation
pub struct FakeMocker {
    created: RefCell<Vec<Value>>,
    pub cleared: Cell<usize>,
    pub reset: Cell<usize>,
    pub restored: Cell<usize>,
}

impl FakeMocker {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            created: RefCell::new(Vec::new()),
            cleared: Cell::new(0),
            reset: Cell::new(0),
            restored: Cell::new(0),
        })
    }
}

impl ModuleMocker for FakeMocker {
    fn get_metadata(&self, exports: &Value) -> Option<MockMetadata> {
        let mut members = exports.keys();
        members.sort();
        let metadata = Value::object();
        metadata.set(
            "members",
            Value::array(members.into_iter().map(Value::string).collect()),
        );
        Some(MockMetadata(metadata))
    }

    fn generate_from_metadata(&self, metadata: &MockMetadata) -> Value {
        let mock = Value::object();
        mock.set("__automock__", Value::Bool(true));
        if let Some(Value::Array(members)) = metadata.0.get("members") {
            for member in members.borrow().iter() {
                if let Value::Str(name) = member {
                    mock.set(name.clone(), self.mock_fn());
                }
            }
        }
        mock
    }

    fn mock_fn(&self) -> Value {
        let mock = Value::function(|_args| Ok(Value::Undefined));
        self.created.borrow_mut().push(mock.clone());
        mock
    }

    fn spy_on(&self, object: &Value, method: &str) -> RuntimeResult<Value> {
        let spy = self.mock_fn();
        if !object.set(method, spy.clone()) {
            return Err(RuntimeError::Harness(format!(
                "cannot spy on '{}' of a non-object",
                method
            )));
        }
        Ok(spy)
    }

    fn is_mock_function(&self, value: &Value) -> bool {
        self.created.borrow().iter().any(|mock| mock.ref_eq(value))
    }

    fn clear_all_mocks(&self) {
        self.cleared.set(self.cleared.get() + 1);
    }

    fn reset_all_mocks(&self) {
        self.reset.set(self.reset.get() + 1);
    }

    fn restore_all_mocks(&self) {
        self.restored.set(self.restored.get() + 1);
    }
}

/// Fake-timer facility recording every delegated call
pub struct FakeTimerApi {
    pub fake_active: Cell<bool>,
    pub advanced_ms: Cell<u64>,
    pub run_all_calls: Cell<usize>,
    pub pending_runs: Cell<usize>,
    pub tick_runs: Cell<usize>,
    pub immediate_runs: Cell<usize>,
    pub clear_calls: Cell<usize>,
    pub step_calls: Cell<u64>,
    pub reset_calls: Cell<usize>,
    pub timer_count: Cell<usize>,
}

impl FakeTimerApi {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            fake_active: Cell::new(false),
            advanced_ms: Cell::new(0),
            run_all_calls: Cell::new(0),
            pending_runs: Cell::new(0),
            tick_runs: Cell::new(0),
            immediate_runs: Cell::new(0),
            clear_calls: Cell::new(0),
            step_calls: Cell::new(0),
            reset_calls: Cell::new(0),
            timer_count: Cell::new(0),
        })
    }
}

impl FakeTimers for FakeTimerApi {
    fn use_fake_timers(&self) {
        self.fake_active.set(true);
    }

    fn use_real_timers(&self) {
        self.fake_active.set(false);
    }

    fn clear_all_timers(&self) {
        self.clear_calls.set(self.clear_calls.get() + 1);
    }

    fn run_all_timers(&self) {
        self.run_all_calls.set(self.run_all_calls.get() + 1);
    }

    fn run_all_ticks(&self) {
        self.tick_runs.set(self.tick_runs.get() + 1);
    }

    fn run_all_immediates(&self) {
        self.immediate_runs.set(self.immediate_runs.get() + 1);
    }

    fn run_only_pending_timers(&self) {
        self.pending_runs.set(self.pending_runs.get() + 1);
    }

    fn advance_timers_by_time(&self, ms: u64) {
        self.advanced_ms.set(self.advanced_ms.get() + ms);
    }

    fn advance_timers_to_next_timer(&self, steps: u64) {
        self.step_calls.set(self.step_calls.get() + steps);
    }

    fn get_timer_count(&self) -> usize {
        self.timer_count.get()
    }

    fn reset(&self) {
        self.reset_calls.set(self.reset_calls.get() + 1);
    }
}

/// Sandbox environment delivering wrappers registered per path
pub struct FakeEnvironment {
    global: RefCell<Option<Value>>,
    wrappers: RefCell<HashMap<PathBuf, ModuleWrapper>>,
    mocker: Rc<FakeMocker>,
    timers: RefCell<Option<Rc<FakeTimerApi>>>,
    core: RefCell<HashMap<String, Value>>,
}

impl FakeEnvironment {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            global: RefCell::new(Some(Value::object())),
            wrappers: RefCell::new(HashMap::new()),
            mocker: FakeMocker::new(),
            timers: RefCell::new(Some(FakeTimerApi::new())),
            core: RefCell::new(HashMap::new()),
        })
    }

    pub fn define_wrapper(
        &self,
        path: &str,
        wrapper: impl Fn(ModuleArguments) -> RuntimeResult<()> + 'static,
    ) {
        self.wrappers
            .borrow_mut()
            .insert(PathBuf::from(path), Rc::new(wrapper));
    }

    pub fn tear_down(&self) {
        *self.global.borrow_mut() = None;
    }

    pub fn disable_timers(&self) {
        *self.timers.borrow_mut() = None;
    }

    pub fn timer_api(&self) -> Rc<FakeTimerApi> {
        self.timers
            .borrow()
            .clone()
            .expect("fake timers are disabled")
    }

    pub fn mocker(&self) -> Rc<FakeMocker> {
        Rc::clone(&self.mocker)
    }

    pub fn set_core_module(&self, name: &str, exports: Value) {
        self.core.borrow_mut().insert(name.to_string(), exports);
    }

    pub fn global_object(&self) -> Value {
        self.global.borrow().clone().expect("environment torn down")
    }
}

impl TestEnvironment for FakeEnvironment {
    fn global(&self) -> Option<Value> {
        self.global.borrow().clone()
    }

    fn module_mocker(&self) -> Rc<dyn ModuleMocker> {
        Rc::clone(&self.mocker) as Rc<dyn ModuleMocker>
    }

    fn fake_timers(&self) -> Option<Rc<dyn FakeTimers>> {
        self.timers
            .borrow()
            .clone()
            .map(|timers| timers as Rc<dyn FakeTimers>)
    }

    fn run_script(&self, script: &TransformedScript) -> Option<ModuleWrapper> {
        if self.global.borrow().is_none() {
            return None;
        }
        Some(
            self.wrappers
                .borrow()
                .get(&script.filename)
                .cloned()
                .unwrap_or_else(|| Rc::new(|_args| Ok(()))),
        )
    }

    fn parse_json(&self, text: &str) -> RuntimeResult<Value> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|error| RuntimeError::Harness(format!("invalid JSON: {}", error)))?;
        Ok(Value::from_json(&json))
    }

    fn core_module(&self, name: &str) -> RuntimeResult<Value> {
        self.core
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::CoreModuleUnavailable(name.to_string()))
    }
}

/// Pass-through transformer recording what it was asked to transform
pub struct FakeTransformer {
    pub transformed: RefCell<Vec<PathBuf>>,
    pub sources: RefCell<Vec<String>>,
    source_maps: RefCell<HashMap<PathBuf, PathBuf>>,
}

impl FakeTransformer {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            transformed: RefCell::new(Vec::new()),
            sources: RefCell::new(Vec::new()),
            source_maps: RefCell::new(HashMap::new()),
        })
    }

    pub fn add_source_map(&self, path: &str, map_path: &str) {
        self.source_maps
            .borrow_mut()
            .insert(PathBuf::from(path), PathBuf::from(map_path));
    }
}

impl ScriptTransformer for FakeTransformer {
    fn transform(
        &self,
        path: &Path,
        options: &TransformOptions,
        cached_source: &str,
    ) -> RuntimeResult<TransformResult> {
        self.transformed.borrow_mut().push(path.to_path_buf());
        self.sources.borrow_mut().push(cached_source.to_string());
        Ok(TransformResult {
            script: TransformedScript {
                filename: path.to_path_buf(),
                code: cached_source.to_string(),
            },
            source_map_path: self.source_maps.borrow().get(path).cloned(),
            map_coverage: options.collect_coverage,
        })
    }

    fn transform_json(
        &self,
        _path: &Path,
        _options: &TransformOptions,
        text: &str,
    ) -> RuntimeResult<String> {
        Ok(text.to_string())
    }
}

/// A runtime wired to in-memory collaborators
pub struct TestBed {
    pub fs: Rc<MemoryFs>,
    pub resolver: Rc<FakeResolver>,
    pub environment: Rc<FakeEnvironment>,
    pub transformer: Rc<FakeTransformer>,
    pub runtime: Rc<ModuleRuntime>,
}

/// Path every top-level require in the tests originates from
pub const TEST_FILE: &str = "/project/suite.test.js";

impl TestBed {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let fs = MemoryFs::new();
        let resolver = FakeResolver::new(Rc::clone(&fs), "/project");
        let environment = FakeEnvironment::new();
        let transformer = FakeTransformer::new();
        let runtime = ModuleRuntime::new(
            config,
            Rc::clone(&resolver) as Rc<dyn PathResolver>,
            Rc::clone(&environment) as Rc<dyn TestEnvironment>,
            Rc::clone(&transformer) as Rc<dyn ScriptTransformer>,
            Rc::clone(&fs) as Rc<dyn HostFs>,
        )
        .expect("runtime construction failed");
        Self {
            fs,
            resolver,
            environment,
            transformer,
            runtime,
        }
    }

    /// Register a module: a file on the fake disk plus its wrapper.
    pub fn add_module(
        &self,
        path: &str,
        wrapper: impl Fn(ModuleArguments) -> RuntimeResult<()> + 'static,
    ) {
        self.fs.add_file(path, "// module body");
        self.environment.define_wrapper(path, wrapper);
    }

    pub fn add_json(&self, path: &str, text: &str) {
        self.fs.add_file(path, text);
    }

    pub fn from_path(&self) -> PathBuf {
        PathBuf::from(TEST_FILE)
    }

    /// Full-policy require as issued by the test file itself.
    pub fn require(&self, request: &str) -> RuntimeResult<Value> {
        self.runtime
            .require_module_or_mock(&self.from_path(), request)
    }

    pub fn require_actual(&self, request: &str) -> RuntimeResult<Value> {
        self.runtime.require_actual(&self.from_path(), request)
    }

    pub fn require_mock(&self, request: &str) -> RuntimeResult<Value> {
        self.runtime.require_mock(&self.from_path(), request)
    }

    pub fn hooks(&self) -> TestHooks {
        self.runtime.hooks_for(&self.from_path())
    }
}
