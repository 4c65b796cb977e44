use crate::error::{RuntimeError, RuntimeResult};
use crate::interface::{
    FakeTimers, DEFAULT_TIMEOUT_FIELD, LEGACY_HARNESS_GLOBAL, RETRY_TIMES_GLOBAL,
    TEST_TIMEOUT_GLOBAL,
};
use crate::policy::MockFactory;
use crate::require::ModuleRequire;
use crate::runtime::ModuleRuntime;
use crate::value::Value;
use log::error;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

/// The per-module reflective control object.
///
/// One instance is created for every evaluated module, bound to that
/// module's filename and require surface. Mutators hand back the hooks so
/// calls chain; operations that resolve names can fail and return a
/// `RuntimeResult` instead.
#[derive(Clone)]
pub struct TestHooks {
    runtime: Weak<ModuleRuntime>,
    filename: PathBuf,
    require: ModuleRequire,
}

impl TestHooks {
    pub(crate) fn new(
        runtime: Weak<ModuleRuntime>,
        filename: PathBuf,
        require: ModuleRequire,
    ) -> Self {
        Self {
            runtime,
            filename,
            require,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The require surface this hooks object was created with.
    pub fn require(&self) -> &ModuleRequire {
        &self.require
    }

    fn runtime(&self) -> RuntimeResult<Rc<ModuleRuntime>> {
        self.runtime.upgrade().ok_or_else(|| {
            RuntimeError::Harness(
                "the module runtime backing this hooks object has been dropped".to_string(),
            )
        })
    }

    // ----- automock toggles -----

    pub fn auto_mock_on(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.policy.set_auto_mock(true);
        }
        self
    }

    pub fn auto_mock_off(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.policy.set_auto_mock(false);
        }
        self
    }

    pub fn enable_automock(&self) -> &Self {
        self.auto_mock_on()
    }

    pub fn disable_automock(&self) -> &Self {
        self.auto_mock_off()
    }

    // ----- per-name mock policy -----

    /// Mark `name` as mocked.
    pub fn mock(&self, name: &str) -> RuntimeResult<&Self> {
        let runtime = self.runtime()?;
        let id = runtime.module_id_for(&self.filename, Some(name));
        runtime.policy.set_explicit(id, true);
        Ok(self)
    }

    pub fn do_mock(&self, name: &str) -> RuntimeResult<&Self> {
        self.mock(name)
    }

    /// Mark `name` as mocked with a factory producing the exports.
    pub fn mock_with(
        &self,
        name: &str,
        factory: impl Fn() -> Value + 'static,
    ) -> RuntimeResult<&Self> {
        self.set_mock_impl(name, Rc::new(factory), false)
    }

    /// Register a factory mock for a name with no file on disk.
    pub fn mock_virtual(
        &self,
        name: &str,
        factory: impl Fn() -> Value + 'static,
    ) -> RuntimeResult<&Self> {
        self.set_mock_impl(name, Rc::new(factory), true)
    }

    /// Mark `name` as not mocked; dominates every other signal.
    pub fn unmock(&self, name: &str) -> RuntimeResult<&Self> {
        let runtime = self.runtime()?;
        let id = runtime.module_id_for(&self.filename, Some(name));
        runtime.policy.set_explicit(id, false);
        Ok(self)
    }

    pub fn dont_mock(&self, name: &str) -> RuntimeResult<&Self> {
        self.unmock(name)
    }

    /// Unmock `name` and propagate the decision through its dependencies.
    pub fn deep_unmock(&self, name: &str) -> RuntimeResult<&Self> {
        let runtime = self.runtime()?;
        let id = runtime.module_id_for(&self.filename, Some(name));
        runtime.policy.set_explicit(id.clone(), false);
        runtime.policy.set_transitive(id, false);
        Ok(self)
    }

    /// Register a mock factory for `name`.
    pub fn set_mock(
        &self,
        name: &str,
        factory: impl Fn() -> Value + 'static,
    ) -> RuntimeResult<&Self> {
        self.set_mock_impl(name, Rc::new(factory), false)
    }

    /// Convenience: register a constant value as the mock for `name`.
    pub fn set_mock_value(&self, name: &str, value: Value) -> RuntimeResult<&Self> {
        self.set_mock_impl(name, Rc::new(move || value.clone()), false)
    }

    fn set_mock_impl(
        &self,
        name: &str,
        factory: MockFactory,
        virtual_mock: bool,
    ) -> RuntimeResult<&Self> {
        let runtime = self.runtime()?;
        if virtual_mock {
            let mock_path = runtime.resolver.get_module_path(&self.filename, name);
            runtime.policy.add_virtual_mock(mock_path);
        }
        // The id is computed after the virtual path is registered so the
        // resolver can anchor it.
        let id = runtime.module_id_for(&self.filename, Some(name));
        runtime.policy.set_explicit(id.clone(), true);
        runtime.policy.set_factory(id, factory);
        Ok(self)
    }

    // ----- registry lifecycle -----

    pub fn reset_modules(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.reset_modules();
        }
        self
    }

    /// Run `f` against throwaway registries; see the runtime operation.
    pub fn isolate_modules(&self, f: impl FnOnce()) -> RuntimeResult<&Self> {
        self.runtime()?.isolate_modules(f)?;
        Ok(self)
    }

    // ----- environment mocker -----

    pub fn clear_all_mocks(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.clear_all_mocks();
        }
        self
    }

    pub fn reset_all_mocks(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.reset_all_mocks();
        }
        self
    }

    pub fn restore_all_mocks(&self) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.restore_all_mocks();
        }
        self
    }

    /// A fresh mock function from the environment's mocker.
    pub fn mock_fn(&self) -> Value {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.environment.module_mocker().mock_fn(),
            None => Value::Undefined,
        }
    }

    pub fn spy_on(&self, object: &Value, method: &str) -> RuntimeResult<Value> {
        let runtime = self.runtime()?;
        runtime.environment.module_mocker().spy_on(object, method)
    }

    pub fn is_mock_function(&self, value: &Value) -> bool {
        self.runtime
            .upgrade()
            .map(|runtime| runtime.environment.module_mocker().is_mock_function(value))
            .unwrap_or(false)
    }

    /// Generate a mock from the real module's shape without registering it.
    pub fn generate_mock_from_module(&self, name: &str) -> RuntimeResult<Value> {
        let runtime = self.runtime()?;
        runtime.generate_mock(&self.filename, name)
    }

    // ----- require forwards -----

    pub fn require_actual(&self, request: &str) -> RuntimeResult<Value> {
        self.require.require_actual(request)
    }

    pub fn require_mock(&self, request: &str) -> RuntimeResult<Value> {
        self.require.require_mock(request)
    }

    // ----- timers -----

    pub fn use_fake_timers(&self) -> &Self {
        self.with_timers("use_fake_timers", |timers| timers.use_fake_timers())
    }

    pub fn use_real_timers(&self) -> &Self {
        self.with_timers("use_real_timers", |timers| timers.use_real_timers())
    }

    pub fn clear_all_timers(&self) -> &Self {
        self.with_timers("clear_all_timers", |timers| timers.clear_all_timers())
    }

    pub fn run_all_timers(&self) -> &Self {
        self.with_timers("run_all_timers", |timers| timers.run_all_timers())
    }

    pub fn run_all_ticks(&self) -> &Self {
        self.with_timers("run_all_ticks", |timers| timers.run_all_ticks())
    }

    pub fn run_all_immediates(&self) -> &Self {
        self.with_timers("run_all_immediates", |timers| timers.run_all_immediates())
    }

    pub fn run_only_pending_timers(&self) -> &Self {
        self.with_timers("run_only_pending_timers", |timers| {
            timers.run_only_pending_timers()
        })
    }

    pub fn advance_timers_by_time(&self, ms: u64) -> &Self {
        self.with_timers("advance_timers_by_time", |timers| {
            timers.advance_timers_by_time(ms)
        })
    }

    /// Alias of [`TestHooks::advance_timers_by_time`] kept for older suites.
    pub fn run_timers_to_time(&self, ms: u64) -> &Self {
        self.advance_timers_by_time(ms)
    }

    pub fn advance_timers_to_next_timer(&self, steps: Option<u64>) -> &Self {
        self.with_timers("advance_timers_to_next_timer", |timers| {
            timers.advance_timers_to_next_timer(steps.unwrap_or(1))
        })
    }

    pub fn get_timer_count(&self) -> usize {
        let mut count = 0;
        self.with_timers("get_timer_count", |timers| count = timers.get_timer_count());
        count
    }

    fn with_timers(&self, operation: &str, f: impl FnOnce(&dyn FakeTimers)) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            match runtime.environment.fake_timers() {
                Some(timers) => f(timers.as_ref()),
                None => {
                    error!(
                        "'{}' was called from '{}' but fake timers are not in use; \
                         the environment may already be torn down.",
                        operation,
                        self.filename.display()
                    );
                    runtime.exit_code.set(Some(1));
                }
            }
        }
        self
    }

    // ----- harness knobs -----

    /// Default timeout for the tests defined in this module.
    pub fn set_test_timeout(&self, timeout_ms: u64) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            if let Some(global) = runtime.environment.global() {
                match global.get(LEGACY_HARNESS_GLOBAL) {
                    Some(harness) if harness.is_object() => {
                        harness.set(DEFAULT_TIMEOUT_FIELD, Value::number(timeout_ms as f64));
                    }
                    _ => {
                        global.set(TEST_TIMEOUT_GLOBAL, Value::number(timeout_ms as f64));
                    }
                }
            }
        }
        self
    }

    /// Retry failing tests up to `retries` times.
    pub fn retry_times(&self, retries: u64) -> &Self {
        if let Some(runtime) = self.runtime.upgrade() {
            if let Some(global) = runtime.environment.global() {
                global.set(RETRY_TIMES_GLOBAL, Value::number(retries as f64));
            }
        }
        self
    }

    /// Forward custom matchers to the legacy spec harness.
    pub fn add_matchers(&self, matchers: Value) -> RuntimeResult<&Self> {
        let runtime = self.runtime()?;
        let global = runtime.environment.global().ok_or_else(|| {
            RuntimeError::Harness("cannot add matchers: the environment is torn down".to_string())
        })?;
        let harness = global.get(LEGACY_HARNESS_GLOBAL).ok_or_else(|| {
            RuntimeError::Harness(
                "cannot add matchers: no spec harness is installed on the environment global"
                    .to_string(),
            )
        })?;
        let add_matchers = harness.get("addMatchers").ok_or_else(|| {
            RuntimeError::Harness(
                "cannot add matchers: the spec harness does not expose addMatchers".to_string(),
            )
        })?;
        add_matchers.call(&[matchers])?;
        Ok(self)
    }
}
