use std::fmt;
use std::path::PathBuf;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors produced by the module runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}")]
    ModuleNotFound(ModuleNotFoundError),

    #[error("isolate_modules cannot be nested")]
    NestedIsolation,

    #[error("{0}")]
    BadResolveArg(String),

    #[error("You have requested '{0}' as a global variable, but it was not present. Please check your configuration or the test environment.")]
    MissingExtraGlobal(String),

    #[error("failed to get mock metadata for '{}'", .0.display())]
    AutomockMetadataNull(PathBuf),

    #[error("core module '{0}' is not provided by the test environment")]
    CoreModuleUnavailable(String),

    #[error("native addon loading is not available for '{}'", .0.display())]
    NativeAddon(PathBuf),

    #[error("failed to transform '{}': {message}", .path.display())]
    Transform { path: PathBuf, message: String },

    #[error("error evaluating '{}': {message}", .filename.display())]
    Evaluation { filename: PathBuf, message: String },

    #[error("{0}")]
    Harness(String),

    #[error("invalid runtime configuration: {0}")]
    Config(String),

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn evaluation(filename: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RuntimeError::Evaluation {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// True for resolution failures that carry the "module not found" code.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::ModuleNotFound(_))
    }
}

/// Resolution failure with enough structure to be enriched after the fact
#[derive(Debug, Clone)]
pub struct ModuleNotFoundError {
    pub request: String,
    pub from: PathBuf,
    /// Directories enumerated when an explicit `paths` option was given.
    pub tried_paths: Option<Vec<PathBuf>>,
    /// Sibling-with-other-extension hint attached by the require surface.
    pub hint: Option<String>,
}

impl ModuleNotFoundError {
    pub fn new(request: impl Into<String>, from: impl Into<PathBuf>) -> Self {
        Self {
            request: request.into(),
            from: from.into(),
            tried_paths: None,
            hint: None,
        }
    }

    pub fn with_tried_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.tried_paths = Some(paths);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn into_error(self) -> RuntimeError {
        RuntimeError::ModuleNotFound(self)
    }
}

impl fmt::Display for ModuleNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tried_paths {
            Some(paths) => {
                let listed: Vec<String> = paths
                    .iter()
                    .map(|p| format!("'{}'", p.display()))
                    .collect();
                write!(
                    f,
                    "Cannot resolve module '{}' from paths [{}] from '{}'",
                    self.request,
                    listed.join(", "),
                    self.from.display()
                )?;
            }
            None => {
                write!(
                    f,
                    "Cannot find module '{}' from '{}'",
                    self.request,
                    self.from.display()
                )?;
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n{}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ModuleNotFoundError {}

impl From<ModuleNotFoundError> for RuntimeError {
    fn from(error: ModuleNotFoundError) -> Self {
        RuntimeError::ModuleNotFound(error)
    }
}
