use crate::error::{RuntimeError, RuntimeResult};
use crate::value::Value;
use std::path::{Component, Path, PathBuf};

/// Host filesystem access used by the loader and the require surface.
pub trait HostFs {
    fn exists(&self, path: &Path) -> bool;

    /// Blocking read of a text file with the byte-order mark stripped.
    fn read_text(&self, path: &Path) -> RuntimeResult<String>;

    /// Entries of a directory, used for sibling-extension hints and
    /// adjacent manual-mock probing.
    fn read_dir(&self, dir: &Path) -> RuntimeResult<Vec<PathBuf>>;

    /// Load a native addon and return its exports.
    fn load_native_addon(&self, path: &Path) -> RuntimeResult<Value> {
        Err(RuntimeError::NativeAddon(path.to_path_buf()))
    }
}

/// [`HostFs`] implementation over the operating system filesystem
#[derive(Debug, Default)]
pub struct OsFs;

impl HostFs for OsFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_text(&self, path: &Path) -> RuntimeResult<String> {
        let text = std::fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
        Ok(strip_bom(&text).to_string())
    }

    fn read_dir(&self, dir: &Path) -> RuntimeResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir).map_err(|e| RuntimeError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RuntimeError::io(dir, e))?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

/// Strip a UTF-8 byte-order mark from the front of a text buffer.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Normalize a path by resolving `.` and `..` components lexically.
///
/// Module keys must be stable across spellings; every path used as a
/// registry key goes through this.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(Component::ParentDir);
                }
            }
            other => result.push(other),
        }
    }
    result
}
