use crate::error::RuntimeResult;
use crate::executor::ModuleWrapper;
use crate::interface::transformer::TransformedScript;
use crate::value::Value;
use std::rc::Rc;

/// Key of the legacy spec-harness object on the environment global.
pub const LEGACY_HARNESS_GLOBAL: &str = "harness";

/// Field on the legacy harness holding its default timeout interval.
pub const DEFAULT_TIMEOUT_FIELD: &str = "defaultTimeoutInterval";

/// Environment-global key carrying the per-test timeout when no legacy
/// harness is installed.
pub const TEST_TIMEOUT_GLOBAL: &str = "__ASSAY_TEST_TIMEOUT__";

/// Environment-global key carrying the retry count for failing tests.
pub const RETRY_TIMES_GLOBAL: &str = "__ASSAY_RETRY_TIMES__";

/// Opaque mock metadata exchanged with the environment's mocker.
#[derive(Debug, Clone)]
pub struct MockMetadata(pub Value);

/// The sandboxed evaluation environment.
///
/// A `None` global means the environment has been torn down; the executor
/// short-circuits instead of evaluating anything against a dead sandbox.
pub trait TestEnvironment {
    /// The isolated global object, or None once torn down.
    fn global(&self) -> Option<Value>;

    fn module_mocker(&self) -> Rc<dyn ModuleMocker>;

    /// Fake-timer facility, None when real timers are installed.
    fn fake_timers(&self) -> Option<Rc<dyn FakeTimers>>;

    /// Turn a transformed script into a callable wrapper. None once the
    /// environment has been torn down.
    fn run_script(&self, script: &TransformedScript) -> Option<ModuleWrapper>;

    /// Parse JSON text with the sandbox's own parser.
    fn parse_json(&self, text: &str) -> RuntimeResult<Value>;

    /// Deliver a core module by name.
    fn core_module(&self, name: &str) -> RuntimeResult<Value>;
}

/// Mock metadata / factory facility provided by the environment.
pub trait ModuleMocker {
    /// Inspect exports and derive metadata, or None when the shape is not
    /// mockable.
    fn get_metadata(&self, exports: &Value) -> Option<MockMetadata>;

    /// Synthesize a mock object from previously derived metadata.
    fn generate_from_metadata(&self, metadata: &MockMetadata) -> Value;

    /// A fresh mock function.
    fn mock_fn(&self) -> Value;

    /// Replace `object.method` with a mock that records calls.
    fn spy_on(&self, object: &Value, method: &str) -> RuntimeResult<Value>;

    fn is_mock_function(&self, value: &Value) -> bool;

    fn clear_all_mocks(&self);
    fn reset_all_mocks(&self);
    fn restore_all_mocks(&self);
}

/// Fake-timer facility provided by the environment.
pub trait FakeTimers {
    fn use_fake_timers(&self);
    fn use_real_timers(&self);
    fn clear_all_timers(&self);
    fn run_all_timers(&self);
    fn run_all_ticks(&self);
    fn run_all_immediates(&self);
    fn run_only_pending_timers(&self);
    fn advance_timers_by_time(&self, ms: u64);
    fn advance_timers_to_next_timer(&self, steps: u64);
    fn get_timer_count(&self) -> usize;
    fn reset(&self);
}
