//! The intermediate representation produced by the translator.

pub mod builder;
pub mod display;
pub mod ssa;
pub mod verify;

#[cfg(test)]
mod builder_tests;

pub use builder::{BuilderError, Checkpoint, FuncBuilder};
pub use ssa::{BlockId, FuncBody, InstKind, Module, Terminator, ValueId};
pub use verify::{verify_func, VerifyError};
