//! LLVM side of the driver.
//!
//! Everything that touches IR lives here: obtaining it from the host
//! (`provider`), finding the native entry point (`locator`), splicing the
//! IACA barriers (`marker`), lowering runtime pseudo-intrinsics (`lowering`)
//! and running the optimization pipeline (`optimize`).
//!
//! # Example
//! ```ignore
//! use inkwell::context::Context;
//! use iaca::core::{AnalysisSession, Microarchitecture, OptLevel, TargetDescriptor};
//! use iaca::llvm::{locate, resolve_target_machine, splice_markers, DumpOptions};
//!
//! let context = Context::create();
//! let session = AnalysisSession::new();
//! let located = locate(&context, &provider, &function, &signature,
//!                      DumpOptions::for_pipeline(false), &session)?;
//! let descriptor = TargetDescriptor::new(Microarchitecture::Skl, "");
//! let machine = resolve_target_machine(&descriptor, &located.module, OptLevel::O2)?;
//! splice_markers(&context, &located.module, &machine)?;
//! ```

pub mod locator;
pub mod lowering;
pub mod marker;
pub mod optimize;
pub mod provider;

pub use locator::{
    locate,
    select_native_entry,
    CallingConvention,
    CompiledFunction,
    Located,
    MangledName,
};

pub use lowering::{
    lower_runtime_intrinsics,
    LoweringReport,
    RuntimeIntrinsics,
};

pub use marker::{
    splice_markers,
    synthesize_marker,
    MarkerCode,
    MarkerUnit,
    MARKER_END_SYMBOL,
    MARKER_START_SYMBOL,
};

pub use optimize::{
    initialize_backend,
    optimize,
    resolve_target_machine,
    OptimizationContext,
    OptimizationStrategy,
    Pipeline,
    StandardOptimize,
};

pub use provider::{
    DumpOptions,
    FileIrProvider,
    FunctionRef,
    InMemoryIrProvider,
    IrDump,
    IrProvider,
    Signature,
};
