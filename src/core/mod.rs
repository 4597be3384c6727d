// This module serves as the hub for the driver's shared infrastructure, the pieces every
// pipeline stage depends on regardless of how the IR was obtained or which optimization
// strategy runs: the error taxonomy (AnalysisError / ConfigError built on thiserror), the
// explicit per-analysis configuration (analyzer path, optimization level, scratch root,
// read from IACA_PATH / IACA_OPT_LEVEL through a lookup closure), the fixed set of Intel
// microarchitectures together with the backend descriptor derived from them, and the
// per-invocation session statistics returned to callers.

//! Core iaca infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - One terminal error enum per analysis, no retries
//!
//! ## Configuration (`config`)
//! - Captured once per call; no process-wide mutable state
//!
//! ## Targets (`target`)
//! - HSW / BDW / SKL / SKX and their LLVM CPU names
//!
//! ## Session (`session`)
//! - Counters recorded by each pipeline stage

pub mod config;
pub mod error;
pub mod session;
pub mod target;

pub use config::{
    AnalyzerConfig,
    AnalyzerPath,
    OptLevel,
    DEFAULT_ANALYZER,
    IACA_OPT_LEVEL_ENV,
    IACA_PATH_ENV,
};

pub use error::{
    AnalysisError,
    AnalysisResult,
    ConfigError,
};

pub use session::{
    AnalysisSession,
    SessionStats,
};

pub use target::{
    Microarchitecture,
    TargetDescriptor,
};
