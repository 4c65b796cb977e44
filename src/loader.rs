use crate::error::RuntimeResult;
use crate::registry::{RegistryRef, SharedRecord};
use crate::runtime::ModuleRuntime;
use std::path::Path;
use std::rc::Rc;

/// Extension marking data-format modules
const DATA_EXTENSION: &str = "json";

/// Extension marking native addons
const NATIVE_EXTENSION: &str = "node";

impl ModuleRuntime {
    /// Populate a pre-registered record from the file at `path`,
    /// dispatching on file kind.
    pub(crate) fn load_module(
        self: &Rc<Self>,
        record: &SharedRecord,
        from: &Path,
        request: Option<&str>,
        path: &Path,
        registry: Option<RegistryRef>,
    ) -> RuntimeResult<()> {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(DATA_EXTENSION) => {
                let text = self.fs.read_text(path)?;
                let options = self.transform_options();
                let transformed = self.transformer.transform_json(path, &options, &text)?;
                // The sandbox's own parser produces the exports value.
                record.borrow_mut().exports = self.environment.parse_json(&transformed)?;
            }
            Some(NATIVE_EXTENSION) => {
                record.borrow_mut().exports = self.fs.load_native_addon(path)?;
            }
            _ => {
                // An absent request is the root-load signal: the module has
                // no caller.
                let exec_from = if request.is_some() { Some(from) } else { None };
                self.exec_module(record, exec_from, registry)?;
            }
        }
        record.borrow_mut().loaded = true;
        Ok(())
    }
}
