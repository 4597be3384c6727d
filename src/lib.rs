//! iaca - run Intel's Architecture Code Analyzer over a compiled function.
//!
//! Given LLVM IR for a compiled function, the driver finds the function's native entry
//! point, turns calls to the `iaca_marker_start` / `iaca_marker_end` symbols into IACA's
//! start/end barriers, optimizes, emits an object file into a scratch directory and runs
//! the external `iaca` binary over it.
//!
//! # Primary Usage
//!
//! ```ignore
//! use iaca::{analyze, AnalysisRequest, FileIrProvider, Pipeline, Signature};
//!
//! let provider = FileIrProvider::new("sum_of_vector.ll");
//! let request = AnalysisRequest::new("sum_of_vector", Signature::new(["Vector{Float64}"]))
//!     .arch_tag("SKL")?
//!     .pipeline(Pipeline::standard());
//! let outcome = analyze(&provider, request)?;
//! println!("{outcome}");
//! ```
//!
//! # Architecture
//!
//! - [`llvm`] - IR providers, entry locator, marker splicing, optimization
//! - [`core`] - Errors, configuration, targets, session statistics
//! - [`x64`] - Marker encodings and object inspection
//! - [`runner`] - Object emission and analyzer invocation
//! - [`instrument`] - Marker calls for instrumented code

pub mod analyze;
pub mod core;
pub mod instrument;
pub mod llvm;
pub mod runner;
pub mod x64;

pub use analyze::{analyze, analyze_with_config, AnalysisOutcome, AnalysisRequest};
pub use crate::core::{
    AnalysisError, AnalysisResult, AnalysisSession, AnalyzerConfig, AnalyzerPath, ConfigError,
    Microarchitecture, OptLevel, SessionStats, TargetDescriptor,
};
pub use instrument::{marker_end, marker_start};
pub use llvm::{
    CallingConvention, FileIrProvider, FunctionRef, InMemoryIrProvider, IrDump, IrProvider,
    OptimizationStrategy, Pipeline, Signature, StandardOptimize,
};
pub use x64::MarkerRegion;
