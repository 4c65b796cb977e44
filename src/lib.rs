//! Module runtime core of the Assay test framework.
//!
//! This crate decides, per require, whether the real implementation or a
//! mock is delivered; keeps the coexisting module registries (internal,
//! real, isolated, mock) consistent through resets and isolation scopes;
//! evaluates transformed module code inside an environment-supplied
//! sandbox; and exposes the reflective hooks object test code uses to
//! steer resolution at runtime. Resolution, transformation and the sandbox
//! itself live behind the traits in [`interface`].

pub mod config;
pub mod error;
pub mod interface;
pub mod value;

mod automock;
mod executor;
mod hooks;
mod loader;
mod policy;
mod registry;
mod require;
mod runtime;

pub use config::{HasteConfig, RuntimeConfig};
pub use error::{ModuleNotFoundError, RuntimeError, RuntimeResult};
pub use executor::{ExecutionState, ModuleArguments, ModuleWrapper};
pub use hooks::TestHooks;
pub use policy::{MockFactory, MockPolicy, RequireIntent, Resolution};
pub use registry::{ModuleRecord, RegistryRef, RegistrySet, SharedRecord};
pub use require::{ModuleRequire, ResolveOptions};
pub use runtime::ModuleRuntime;
pub use value::{NativeFunction, Value};
