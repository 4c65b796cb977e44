use crate::error::RuntimeResult;
use crate::interface::{MockMetadata, ModuleId};
use crate::runtime::ModuleRuntime;
use crate::value::Value;
use regex::Regex;
use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Directory name marking the dependency root; the transitive-unmock rule
/// only fires when both caller and callee live below one.
pub(crate) const DEPENDENCY_ROOT: &str = "node_modules";

/// User-registered factory producing mock exports
pub type MockFactory = Rc<dyn Fn() -> Value>;

/// How a require call wants its request resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequireIntent {
    /// Full policy: manual mocks and the mock decision apply
    Normal,
    /// Framework-internal load; never mocked, internal registry
    InternalOnly,
    /// Bypass every mock decision (`require_actual`)
    ForceReal,
    /// Route straight to the mock branch (`require_mock`)
    MockOnly,
}

/// Outcome of the resolution policy for one (caller, request) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Load the real module at this path
    UseReal(PathBuf),
    /// Load this manual-mock file in place of the real module
    UseManualMock(PathBuf),
    /// Deliver from the mock branch under this id
    UseAutoMock(ModuleId),
    /// Deliver a core module from the environment
    UseCore(String),
}

/// Mutable policy inputs steering the resolution decision.
///
/// Owned by one runtime instance; construction and `reset_modules` are the
/// only lifecycle boundaries, and none of these maps is cleared by a reset.
pub struct MockPolicy {
    explicit_should_mock: RefCell<HashMap<ModuleId, bool>>,
    transitive_should_mock: RefCell<HashMap<ModuleId, bool>>,
    mock_factories: RefCell<HashMap<ModuleId, MockFactory>>,
    virtual_mocks: RefCell<HashSet<PathBuf>>,
    unmock_patterns: Option<Regex>,
    auto_mock: Cell<bool>,
    should_mock_cache: RefCell<HashMap<ModuleId, bool>>,
    transitive_unmock_cache: RefCell<HashSet<String>>,
    mock_metadata_cache: RefCell<HashMap<PathBuf, MockMetadata>>,
}

impl MockPolicy {
    pub fn new(unmock_patterns: Option<Regex>, auto_mock: bool) -> Self {
        Self {
            explicit_should_mock: RefCell::new(HashMap::new()),
            transitive_should_mock: RefCell::new(HashMap::new()),
            mock_factories: RefCell::new(HashMap::new()),
            virtual_mocks: RefCell::new(HashSet::new()),
            unmock_patterns,
            auto_mock: Cell::new(auto_mock),
            should_mock_cache: RefCell::new(HashMap::new()),
            transitive_unmock_cache: RefCell::new(HashSet::new()),
            mock_metadata_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn explicit(&self, id: &ModuleId) -> Option<bool> {
        self.explicit_should_mock.borrow().get(id).copied()
    }

    pub fn set_explicit(&self, id: ModuleId, mock: bool) {
        self.explicit_should_mock.borrow_mut().insert(id, mock);
    }

    pub fn transitive(&self, id: &ModuleId) -> Option<bool> {
        self.transitive_should_mock.borrow().get(id).copied()
    }

    pub fn set_transitive(&self, id: ModuleId, mock: bool) {
        self.transitive_should_mock.borrow_mut().insert(id, mock);
    }

    pub fn factory(&self, id: &ModuleId) -> Option<MockFactory> {
        self.mock_factories.borrow().get(id).cloned()
    }

    pub fn set_factory(&self, id: ModuleId, factory: MockFactory) {
        self.mock_factories.borrow_mut().insert(id, factory);
    }

    pub fn add_virtual_mock(&self, path: PathBuf) {
        self.virtual_mocks.borrow_mut().insert(path);
    }

    pub fn borrow_virtual_mocks(&self) -> Ref<'_, HashSet<PathBuf>> {
        self.virtual_mocks.borrow()
    }

    pub fn auto_mock(&self) -> bool {
        self.auto_mock.get()
    }

    pub fn set_auto_mock(&self, enabled: bool) {
        self.auto_mock.set(enabled);
    }

    pub fn unmock_patterns(&self) -> Option<&Regex> {
        self.unmock_patterns.as_ref()
    }

    pub fn cached_decision(&self, id: &ModuleId) -> Option<bool> {
        self.should_mock_cache.borrow().get(id).copied()
    }

    pub fn cache_decision(&self, id: ModuleId, mock: bool) {
        self.should_mock_cache.borrow_mut().insert(id, mock);
    }

    pub fn transitive_unmock_reached(&self, key: &str) -> bool {
        self.transitive_unmock_cache.borrow().contains(key)
    }

    pub fn record_transitive_unmock(&self, key: String) {
        self.transitive_unmock_cache.borrow_mut().insert(key);
    }

    pub fn cached_metadata(&self, path: &Path) -> Option<MockMetadata> {
        self.mock_metadata_cache.borrow().get(path).cloned()
    }

    pub fn cache_metadata(&self, path: PathBuf, metadata: MockMetadata) {
        self.mock_metadata_cache.borrow_mut().insert(path, metadata);
    }
}

/// Resolution outcomes decidable without touching the filesystem path of
/// the real module: core modules and the manual-mock substitution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EarlyResolution {
    Core(String),
    /// Manual-mock file substituted for the real module
    Manual(PathBuf),
}

/// Cache key for "a transitive unmock was reached from here".
fn transitive_cache_key(from: &Path, id: &ModuleId) -> String {
    format!("{}\u{0}{}", from.display(), id)
}

/// Whether a path sits below a dependency root.
pub(crate) fn under_dependency_root(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == DEPENDENCY_ROOT)
}

impl ModuleRuntime {
    /// Decide what a require of `request` from `from` resolves to.
    pub fn resolve_kind(
        &self,
        from: &Path,
        request: &str,
        intent: RequireIntent,
    ) -> RuntimeResult<Resolution> {
        let id = self.module_id_for(from, Some(request));

        match intent {
            RequireIntent::ForceReal => {
                Ok(Resolution::UseReal(self.resolve_module(from, request)?))
            }
            RequireIntent::MockOnly => Ok(Resolution::UseAutoMock(id)),
            RequireIntent::InternalOnly => {
                // Internal modules are never mocked.
                match self.early_resolution(from, request, intent) {
                    Some(EarlyResolution::Core(name)) => Ok(Resolution::UseCore(name)),
                    Some(EarlyResolution::Manual(path)) => Ok(Resolution::UseReal(path)),
                    None => Ok(Resolution::UseReal(self.resolve_module(from, request)?)),
                }
            }
            RequireIntent::Normal => match self.early_resolution(from, request, intent) {
                Some(EarlyResolution::Core(name)) => Ok(Resolution::UseCore(name)),
                Some(EarlyResolution::Manual(path)) => Ok(Resolution::UseManualMock(path)),
                // The real path is only resolved once the decision is
                // "real": a mocked name (a virtual mock in particular) may
                // have no file on disk at all.
                None => {
                    if self.should_mock(from, request, &id)? {
                        Ok(Resolution::UseAutoMock(id))
                    } else {
                        Ok(Resolution::UseReal(self.resolve_module(from, request)?))
                    }
                }
            },
        }
    }

    /// Core-module and manual-mock-substitution checks shared by every
    /// real-branch resolution. None means the real path must be resolved.
    pub(crate) fn early_resolution(
        &self,
        from: &Path,
        request: &str,
        intent: RequireIntent,
    ) -> Option<EarlyResolution> {
        if self.resolver.is_core_module(request) {
            return Some(EarlyResolution::Core(request.to_string()));
        }

        // A manual mock substitutes for the real module when nothing in the
        // haste map claims the name, unless the mock itself is the module
        // currently executing or an explicit unmock forbids it.
        if intent == RequireIntent::Normal && self.resolver.get_module(request).is_none() {
            if let Some(manual) = self.resolver.get_mock_module(from, request) {
                let id = self.module_id_for(from, Some(request));
                let executing = self.exec_state.current_manual_mock();
                if executing.as_deref() != Some(manual.as_path())
                    && self.policy.explicit(&id) != Some(false)
                {
                    return Some(EarlyResolution::Manual(manual));
                }
            }
        }

        None
    }

    /// The memoized mock decision for one (caller, request) pair.
    pub(crate) fn should_mock(
        &self,
        from: &Path,
        request: &str,
        id: &ModuleId,
    ) -> RuntimeResult<bool> {
        // An explicit entry dominates every other signal.
        if let Some(explicit) = self.policy.explicit(id) {
            return Ok(explicit);
        }
        if !self.policy.auto_mock() {
            return Ok(false);
        }
        if self.resolver.is_core_module(request) {
            return Ok(false);
        }

        let key = transitive_cache_key(from, id);
        if self.policy.transitive_unmock_reached(&key) {
            return Ok(false);
        }
        if let Some(cached) = self.policy.cached_decision(id) {
            return Ok(cached);
        }

        let module_path = match self.resolve_module(from, request) {
            Ok(path) => path,
            Err(error) if error.is_not_found() => {
                // Unresolvable but manually mocked: the mock is deliverable.
                if self.resolver.get_mock_module(from, request).is_some() {
                    self.policy.cache_decision(id.clone(), true);
                    return Ok(true);
                }
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        if let Some(patterns) = self.policy.unmock_patterns() {
            if patterns.is_match(&module_path.to_string_lossy()) {
                self.policy.cache_decision(id.clone(), false);
                return Ok(false);
            }
        }

        // Transitive unmocking: an unmocked caller under the dependency
        // root drags its dependency-root dependencies along, and an
        // explicitly propagated "no mock" on the caller always does.
        let caller_id = self.module_id_for(from, None);
        let caller_matches_patterns = self
            .policy
            .unmock_patterns()
            .map(|patterns| patterns.is_match(&from.to_string_lossy()))
            .unwrap_or(false);
        if self.policy.transitive(&caller_id) == Some(false)
            || (under_dependency_root(from)
                && under_dependency_root(&module_path)
                && (caller_matches_patterns
                    || self.policy.explicit(&caller_id) == Some(false)))
        {
            self.policy.set_transitive(id.clone(), false);
            self.policy.record_transitive_unmock(key);
            return Ok(false);
        }

        self.policy.cache_decision(id.clone(), true);
        Ok(true)
    }
}
