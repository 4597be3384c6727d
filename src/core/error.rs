// This module defines the error types for the iaca driver using the thiserror crate for
// idiomatic Rust error handling. AnalysisError is the main error enum covering every way a
// single analysis invocation can fail: configuration problems (unsupported microarchitecture,
// empty analyzer path, bad optimization level), locator failures (the requested function has
// no compiled entry at all, only wrapper/shim entries, or several native entries), IR and
// LLVM failures (unparseable dump, target lookup, linking, pass pipeline, object emission),
// scratch-directory I/O errors, and the two subprocess failures (analyzer could not be
// started, analyzer exited unsuccessfully). ConfigError is kept separate so configuration
// parsing can report it without dragging in the rest of the taxonomy. Every error is
// terminal for the invocation that produced it; nothing here is retried.

//! Error types for the iaca driver.
//!
//! Using thiserror for more idiomatic error handling.

use std::path::PathBuf;

use thiserror::Error;

use crate::llvm::locator::CallingConvention;

/// Configuration errors, reported before any work is done.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported microarchitecture `{tag}` (expected one of HSW, BDW, SKL, SKX)")]
    UnsupportedMicroarchitecture { tag: String },

    #[error("analyzer path from {source_name} is empty")]
    EmptyAnalyzerPath { source_name: &'static str },

    #[error("invalid optimization level `{value}` (expected 0-3)")]
    InvalidOptLevel { value: String },
}

/// Main error type for an analysis invocation.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no compiled function named `{name}` for signature {signature}; module defines: {}",
        list_or_none(available))]
    NotFound {
        name: String,
        signature: String,
        available: Vec<String>,
    },

    #[error("`{name}` has no native entry point; available calling conventions: {}",
        list_or_none(available))]
    NoNativeEntry {
        name: String,
        available: Vec<CallingConvention>,
    },

    #[error("`{name}` has {} native entry points: {}", candidates.len(), candidates.join(", "))]
    AmbiguousNativeEntry {
        name: String,
        candidates: Vec<String>,
    },

    #[error("failed to parse IR dump `{origin}`: {reason}")]
    Ir { origin: String, reason: String },

    #[error("IR provider failed for `{name}`: {reason}")]
    Provider { name: String, reason: String },

    #[error("LLVM {stage} failed: {reason}")]
    Llvm { stage: &'static str, reason: String },

    #[error("scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start analyzer `{}`: {source}", path.display())]
    AnalyzerNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer exited with {}", describe_exit(*code))]
    AnalyzerFailed { code: Option<i32> },
}

impl AnalysisError {
    /// Wrap an LLVM-side failure for the given pipeline stage.
    pub fn llvm(stage: &'static str, reason: impl ToString) -> Self {
        AnalysisError::Llvm {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Whether this error stems from configuration rather than the analysis itself.
    pub fn is_config(&self) -> bool {
        matches!(self, AnalysisError::Config(_))
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn list_or_none<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "<none>".to_string();
    }
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
