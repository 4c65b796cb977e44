use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ModuleRuntime;
use crate::value::Value;
use std::path::Path;
use std::rc::Rc;

impl ModuleRuntime {
    /// Synthesize an automock for `name` from the real module's shape.
    ///
    /// The real module is loaded under swapped-out registries so its
    /// top-level side effects stay contained, and the derived metadata is
    /// cached per module path so regeneration is cheap.
    pub(crate) fn generate_mock(self: &Rc<Self>, from: &Path, name: &str) -> RuntimeResult<Value> {
        let module_path = match self.resolver.resolve_stub_module(from, name) {
            Some(stub) => stub,
            None => self.resolve_module(from, name)?,
        };

        if self.policy.cached_metadata(&module_path).is_none() {
            let mocker = self.environment.module_mocker();

            // Seed the cache with empty-shape metadata first so a cyclic
            // dependency inside the loaded module terminates.
            let placeholder = mocker
                .get_metadata(&Value::object())
                .ok_or_else(|| RuntimeError::AutomockMetadataNull(module_path.clone()))?;
            self.policy.cache_metadata(module_path.clone(), placeholder);

            let saved = self.registries.begin_mock_isolation();
            let result = self.require_module(from, Some(name));
            self.registries.end_mock_isolation(saved);
            let exports = result?;

            let metadata = mocker
                .get_metadata(&exports)
                .ok_or_else(|| RuntimeError::AutomockMetadataNull(module_path.clone()))?;
            self.policy.cache_metadata(module_path.clone(), metadata);
        }

        let metadata = self
            .policy
            .cached_metadata(&module_path)
            .ok_or_else(|| RuntimeError::AutomockMetadataNull(module_path.clone()))?;
        Ok(self
            .environment
            .module_mocker()
            .generate_from_metadata(&metadata))
    }
}
