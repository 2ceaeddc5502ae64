//! Translation warnings.
//!
//! Lossy mappings and dropped nodes never abort a call site on their own;
//! they are logged where they happen and collected here so callers can
//! report them next to the produced kernel.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationWarning {
    /// A 64-bit integer type was narrowed to 32 bits.
    IntegerNarrowed { source: String },
    /// An unrecognized type was replaced by a 32-bit integer.
    UnknownTypeFallback { source: String },
    /// A pointer's element type could not be resolved and defaults to f32.
    PointerElementFallback { source: String },
    /// A capture or member was replaced by a 32-bit placeholder.
    CaptureDowngraded { name: String, source: String },
    /// A statement was dropped because it contained an unsupported construct.
    DroppedStatement { function: String, reason: String },
    /// A non-void function could fall off its end; a zero value is returned there.
    MissingReturn { function: String },
    /// The generator could not lower an instruction and emitted an undefined value.
    UnhandledInstruction { function: String, detail: String },
}

impl fmt::Display for TranslationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationWarning::IntegerNarrowed { source } => {
                write!(f, "'{}' narrowed to 32 bits for device compatibility", source)
            }
            TranslationWarning::UnknownTypeFallback { source } => {
                write!(f, "unsupported type '{}' mapped to i32", source)
            }
            TranslationWarning::PointerElementFallback { source } => {
                write!(f, "element type of '{}' unresolved, assuming f32", source)
            }
            TranslationWarning::CaptureDowngraded { name, source } => {
                write!(f, "capture '{}' of type '{}' passed as a 32-bit placeholder", name, source)
            }
            TranslationWarning::DroppedStatement { function, reason } => {
                write!(f, "statement dropped in '{}': {}", function, reason)
            }
            TranslationWarning::MissingReturn { function } => {
                write!(f, "'{}' can reach its end without returning a value", function)
            }
            TranslationWarning::UnhandledInstruction { function, detail } => {
                write!(f, "instruction skipped in '{}': {}", function, detail)
            }
        }
    }
}

/// Collected warnings for one call site.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<TranslationWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a warning.
    pub fn warn(&mut self, warning: TranslationWarning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[TranslationWarning] {
        &self.warnings
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn into_warnings(self) -> Vec<TranslationWarning> {
        self.warnings
    }
}
