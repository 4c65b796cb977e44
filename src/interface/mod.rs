//! Interfaces of the collaborators the runtime consumes.
//!
//! The runtime core never implements resolution, transformation or the
//! sandbox itself; it drives them through these traits. The only concrete
//! implementation shipped here is [`OsFs`].

mod environment;
mod fs;
mod resolver;
mod transformer;

pub use environment::{
    FakeTimers, MockMetadata, ModuleMocker, TestEnvironment, DEFAULT_TIMEOUT_FIELD,
    LEGACY_HARNESS_GLOBAL, RETRY_TIMES_GLOBAL, TEST_TIMEOUT_GLOBAL,
};
pub use fs::{normalize, strip_bom, HostFs, OsFs};
pub use resolver::{ModuleId, PathResolver, ResolveInDirOptions};
pub use transformer::{
    ScriptTransformer, TransformOptions, TransformResult, TransformedScript,
    EVAL_RESULT_VARIABLE,
};
