use crate::error::{RuntimeError, RuntimeResult};
use crate::interface::ModuleId;
use crate::require::ModuleRequire;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub type SharedRecord = Rc<RefCell<ModuleRecord>>;

/// A loaded (or loading) module.
///
/// Records are pre-registered before their body is evaluated: `exports`
/// starts as an empty shared object and `loaded` as false, so a circular
/// require resolves to the partially-initialized exports instead of
/// recursing.
pub struct ModuleRecord {
    pub id: PathBuf,
    pub filename: PathBuf,
    pub exports: Value,
    pub loaded: bool,
    /// Caller path; resolved to a record on demand rather than stored as a
    /// back-pointer
    pub parent_key: Option<PathBuf>,
    /// Registry the record lives in, None for mock-branch evaluations
    pub registry: Option<RegistryRef>,
    pub children: Vec<SharedRecord>,
    pub paths: Vec<PathBuf>,
    pub require: Option<ModuleRequire>,
}

impl ModuleRecord {
    /// Create the pre-registration state for a module at `path`.
    pub fn pre_register(path: &Path) -> SharedRecord {
        Rc::new(RefCell::new(ModuleRecord {
            id: path.to_path_buf(),
            filename: path.to_path_buf(),
            exports: Value::object(),
            loaded: false,
            parent_key: None,
            registry: None,
            children: Vec::new(),
            paths: Vec::new(),
            require: None,
        }))
    }
}

/// Which record registry a key belongs to.
///
/// Every registry mutation goes through [`RegistrySet`] with one of these,
/// which keeps the one-registry-per-key invariant in a single place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryRef {
    Internal,
    Real,
    IsolatedReal,
}

/// The coexisting module registries of one runtime instance.
pub struct RegistrySet {
    internal: RefCell<HashMap<PathBuf, SharedRecord>>,
    real: RefCell<HashMap<PathBuf, SharedRecord>>,
    isolated_real: RefCell<Option<HashMap<PathBuf, SharedRecord>>>,
    mock: RefCell<HashMap<ModuleId, Value>>,
    isolated_mock: RefCell<Option<HashMap<ModuleId, Value>>>,
}

impl RegistrySet {
    pub fn new() -> Self {
        Self {
            internal: RefCell::new(HashMap::new()),
            real: RefCell::new(HashMap::new()),
            isolated_real: RefCell::new(None),
            mock: RefCell::new(HashMap::new()),
            isolated_mock: RefCell::new(None),
        }
    }

    /// Pick the registry a real-module load for `key` belongs to.
    ///
    /// Keys already present in the shared registry stay there even inside an
    /// isolation scope; fresh keys go to the isolated registry while one is
    /// live.
    pub fn select_real(&self, internal: bool, key: &Path) -> RegistryRef {
        if internal {
            RegistryRef::Internal
        } else if self.real.borrow().contains_key(key) || self.isolated_real.borrow().is_none()
        {
            RegistryRef::Real
        } else {
            RegistryRef::IsolatedReal
        }
    }

    pub fn get_record(&self, registry: RegistryRef, key: &Path) -> Option<SharedRecord> {
        match registry {
            RegistryRef::Internal => self.internal.borrow().get(key).cloned(),
            RegistryRef::Real => self.real.borrow().get(key).cloned(),
            RegistryRef::IsolatedReal => self
                .isolated_real
                .borrow()
                .as_ref()
                .and_then(|map| map.get(key).cloned()),
        }
    }

    pub fn put_record(&self, registry: RegistryRef, key: PathBuf, record: SharedRecord) {
        match registry {
            RegistryRef::Internal => {
                self.internal.borrow_mut().insert(key, record);
            }
            RegistryRef::Real => {
                self.real.borrow_mut().insert(key, record);
            }
            RegistryRef::IsolatedReal => {
                if let Some(map) = self.isolated_real.borrow_mut().as_mut() {
                    map.insert(key, record);
                }
            }
        }
    }

    /// Look `key` up across the record registries, isolated first.
    pub fn find_record(&self, key: &Path) -> Option<SharedRecord> {
        if let Some(record) = self.get_record(RegistryRef::IsolatedReal, key) {
            return Some(record);
        }
        self.get_record(RegistryRef::Real, key)
            .or_else(|| self.get_record(RegistryRef::Internal, key))
    }

    /// Cached mock exports for `id`, isolated registry first.
    pub fn lookup_mock(&self, id: &ModuleId) -> Option<Value> {
        if let Some(map) = self.isolated_mock.borrow().as_ref() {
            if let Some(exports) = map.get(id) {
                return Some(exports.clone());
            }
        }
        self.mock.borrow().get(id).cloned()
    }

    /// Store mock exports in the isolated registry when one is live,
    /// otherwise in the shared one.
    pub fn put_mock(&self, id: ModuleId, exports: Value) {
        let mut isolated = self.isolated_mock.borrow_mut();
        match isolated.as_mut() {
            Some(map) => {
                map.insert(id, exports);
            }
            None => {
                self.mock.borrow_mut().insert(id, exports);
            }
        }
    }

    /// Discard isolated registries and clear the user-visible ones. The
    /// internal registry survives.
    pub fn reset(&self) {
        *self.isolated_real.borrow_mut() = None;
        *self.isolated_mock.borrow_mut() = None;
        self.real.borrow_mut().clear();
        self.mock.borrow_mut().clear();
    }

    /// Open an isolation scope. Both isolated registries are created
    /// together and discarded together when the returned guard drops,
    /// whatever the exit path.
    pub fn enter_isolation(&self) -> RuntimeResult<IsolationScope<'_>> {
        if self.isolated_real.borrow().is_some() || self.isolated_mock.borrow().is_some() {
            return Err(RuntimeError::NestedIsolation);
        }
        *self.isolated_real.borrow_mut() = Some(HashMap::new());
        *self.isolated_mock.borrow_mut() = Some(HashMap::new());
        Ok(IsolationScope { registries: self })
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated_real.borrow().is_some()
    }

    /// Swap the shared real and mock registries for fresh ones so a load can
    /// run without polluting them. Pair with [`RegistrySet::end_mock_isolation`].
    pub fn begin_mock_isolation(&self) -> SavedRegistries {
        SavedRegistries {
            real: self.real.replace(HashMap::new()),
            mock: self.mock.replace(HashMap::new()),
        }
    }

    pub fn end_mock_isolation(&self, saved: SavedRegistries) {
        self.real.replace(saved.real);
        self.mock.replace(saved.mock);
    }

    /// Keys of the shared real registry, for the require-surface cache view.
    pub fn real_keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.real.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for RegistrySet {
    fn default() -> Self {
        Self::new()
    }
}

/// Registries saved aside during automock generation
pub struct SavedRegistries {
    real: HashMap<PathBuf, SharedRecord>,
    mock: HashMap<ModuleId, Value>,
}

/// Guard for an `isolate_modules` bracket; tears the isolated registries
/// down on drop.
pub struct IsolationScope<'a> {
    registries: &'a RegistrySet,
}

impl Drop for IsolationScope<'_> {
    fn drop(&mut self) {
        *self.registries.isolated_real.borrow_mut() = None;
        *self.registries.isolated_mock.borrow_mut() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_prefers_existing_real_entry() {
        let registries = RegistrySet::new();
        let key = PathBuf::from("/project/a.js");
        registries.put_record(RegistryRef::Real, key.clone(), ModuleRecord::pre_register(&key));

        let _scope = registries.enter_isolation().unwrap();
        assert_eq!(registries.select_real(false, &key), RegistryRef::Real);
        assert_eq!(
            registries.select_real(false, Path::new("/project/b.js")),
            RegistryRef::IsolatedReal
        );
        assert_eq!(registries.select_real(true, &key), RegistryRef::Internal);
    }

    #[test]
    fn test_isolation_scope_discards_on_drop() {
        let registries = RegistrySet::new();
        {
            let _scope = registries.enter_isolation().unwrap();
            let key = PathBuf::from("/project/iso.js");
            registries.put_record(
                RegistryRef::IsolatedReal,
                key.clone(),
                ModuleRecord::pre_register(&key),
            );
            assert!(registries.get_record(RegistryRef::IsolatedReal, &key).is_some());
        }
        assert!(!registries.is_isolated());
        assert!(registries
            .get_record(RegistryRef::IsolatedReal, Path::new("/project/iso.js"))
            .is_none());
    }

    #[test]
    fn test_nested_isolation_rejected() {
        let registries = RegistrySet::new();
        let _scope = registries.enter_isolation().unwrap();
        assert!(matches!(
            registries.enter_isolation(),
            Err(RuntimeError::NestedIsolation)
        ));
    }

    #[test]
    fn test_reset_keeps_internal() {
        let registries = RegistrySet::new();
        let internal_key = PathBuf::from("/assay/internal.js");
        let real_key = PathBuf::from("/project/a.js");
        registries.put_record(
            RegistryRef::Internal,
            internal_key.clone(),
            ModuleRecord::pre_register(&internal_key),
        );
        registries.put_record(
            RegistryRef::Real,
            real_key.clone(),
            ModuleRecord::pre_register(&real_key),
        );
        registries.put_mock(ModuleId::new("m"), Value::object());

        registries.reset();

        assert!(registries.get_record(RegistryRef::Internal, &internal_key).is_some());
        assert!(registries.get_record(RegistryRef::Real, &real_key).is_none());
        assert!(registries.lookup_mock(&ModuleId::new("m")).is_none());
    }

    #[test]
    fn test_mock_isolation_swap_restores() {
        let registries = RegistrySet::new();
        registries.put_mock(ModuleId::new("kept"), Value::object());

        let saved = registries.begin_mock_isolation();
        assert!(registries.lookup_mock(&ModuleId::new("kept")).is_none());
        registries.put_mock(ModuleId::new("throwaway"), Value::object());
        registries.end_mock_isolation(saved);

        assert!(registries.lookup_mock(&ModuleId::new("kept")).is_some());
        assert!(registries.lookup_mock(&ModuleId::new("throwaway")).is_none());
    }

    #[test]
    fn test_isolated_mock_lookup_prefers_isolated() {
        let registries = RegistrySet::new();
        let shared = Value::object();
        shared.set("kind", Value::string("shared"));
        registries.put_mock(ModuleId::new("m"), shared.clone());

        let _scope = registries.enter_isolation().unwrap();
        // A shared entry is still visible from inside the scope.
        assert!(registries.lookup_mock(&ModuleId::new("m")).unwrap().ref_eq(&shared));

        let isolated = Value::object();
        registries.put_mock(ModuleId::new("n"), isolated.clone());
        assert!(registries.lookup_mock(&ModuleId::new("n")).unwrap().ref_eq(&isolated));
    }
}
