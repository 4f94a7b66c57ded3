//! In-memory registry for tests
//!
//! `MemoryRegistry` implements `RegistryClient` against process-local state
//! holding any number of registries. It records every call and supports
//! failure injection per operation.

mod failure;
mod registry;

pub use failure::{FailureConfig, FailureInjector, RegistryOp};
pub use registry::{Call, MemoryRegistry};
