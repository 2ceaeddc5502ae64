use crate::ir::builder::BuilderError;
use crate::ir::verify::VerifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    /// A construct outside the translatable subset.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Kernel wrapper error: {0}")]
    Wrapper(String),

    #[error("IR verification failed in '{function}': {}", format_verify_errors(.errors))]
    Verify { function: String, errors: Vec<VerifyError> },

    #[error("SPIR-V generation error: {0}")]
    Spirv(String),

    #[error("IR builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("SPIR-V builder error: {0}")]
    SpirvBuilder(#[from] rspirv::dr::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompilerError {
    /// Errors a statement translator may recover from by dropping the node.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::Translation(_))
    }
}

fn format_verify_errors(errors: &[VerifyError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

pub type Result<T> = std::result::Result<T, CompilerError>;

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Unsupported(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_translate {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Translation(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_wrapper {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Wrapper(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_spirv {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Spirv(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! err_unsupported {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Unsupported(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_translate {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Translation(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_spirv {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Spirv(format!($($arg)*))
    };
}
