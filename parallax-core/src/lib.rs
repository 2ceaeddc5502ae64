pub mod algorithm;
pub mod ast;
pub mod config;
pub mod diags;
pub mod error;
pub mod interface;
pub mod ir;
pub mod kernel;
pub mod layout;
pub mod spirv;
pub mod translate;
pub mod types;
pub mod wrapper;

pub use config::{FailureMode, GeneratorConfig};
pub use error::{CompilerError, Result};
pub use kernel::{CompiledKernel, InMemoryKernelCache, KernelCache, KernelCompiler, Offload};
