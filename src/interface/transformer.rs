use crate::error::RuntimeResult;
use std::path::{Path, PathBuf};

/// Name of the variable a transformed script assigns its module wrapper to.
///
/// Environments evaluate the transformed code and pull the wrapper callable
/// out under this name; the runtime never reads it itself but the convention
/// is part of the transformer contract.
pub const EVAL_RESULT_VARIABLE: &str = "__assay_module_wrapper__";

/// Options forwarded to the transformer with every request
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub collect_coverage: bool,
}

/// Executable handle produced by the transformer
#[derive(Debug, Clone)]
pub struct TransformedScript {
    pub filename: PathBuf,
    pub code: String,
}

/// Outcome of transforming a source file
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub script: TransformedScript,
    pub source_map_path: Option<PathBuf>,
    /// The source map must be consulted when remapping coverage
    pub map_coverage: bool,
}

/// Source-to-script transformation, implemented outside the runtime core.
pub trait ScriptTransformer {
    /// Transform a source file, reusing `cached_source` instead of
    /// re-reading it.
    fn transform(
        &self,
        path: &Path,
        options: &TransformOptions,
        cached_source: &str,
    ) -> RuntimeResult<TransformResult>;

    /// Transform the textual form of a data module before it is handed to
    /// the sandbox parser.
    fn transform_json(
        &self,
        path: &Path,
        options: &TransformOptions,
        text: &str,
    ) -> RuntimeResult<String>;
}
