// This module drives optimization of the located module and owns target machine creation.
// The X86 backend is initialized once per process; every analysis then builds its own
// TargetMachine from the module's triple (host default if the dump has none) and the target
// descriptor's CPU/feature strings, and stamps the module with the machine's data layout.
//
// Exactly one of two strategies runs per analysis. Pipeline::HostDefault means the host's
// default pipeline already ran when the dump was produced, so nothing further is done here.
// Pipeline::Custom hands the machine and module to an OptimizationStrategy. StandardOptimize
// is the built-in strategy: it gives the new pass manager the TargetMachine (which registers
// target library info and target transform info), lowers the runtime's GC and thread-local
// pseudo-intrinsics, inlines, and runs LLVM's `default<On>` pipeline at the configured level.
// Closures with the right shape are strategies too, so callers can substitute their own.

//! Optimization driver and target machine resolution.

use std::fmt;
use std::sync::Once;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};

use super::lowering::{lower_runtime_intrinsics, RuntimeIntrinsics};
use crate::core::{AnalysisError, AnalysisResult, AnalysisSession, OptLevel, TargetDescriptor};

static BACKEND_INIT: Once = Once::new();

/// Initialize the X86 backend (target info, codegen, asm printer/parser).
pub fn initialize_backend() {
    BACKEND_INIT.call_once(|| {
        Target::initialize_x86(&InitializationConfig::default());
        log::trace!("X86 backend initialized");
    });
}

/// Create the target machine for `module` and configure the module for it.
pub fn resolve_target_machine(
    descriptor: &TargetDescriptor,
    module: &Module<'_>,
    opt_level: OptLevel,
) -> AnalysisResult<TargetMachine> {
    initialize_backend();

    let module_triple = module.get_triple();
    let triple = if module_triple.as_str().to_bytes().is_empty() {
        let default = TargetMachine::get_default_triple();
        log::debug!(
            "module has no target triple; using host default {}",
            default.as_str().to_string_lossy()
        );
        default
    } else {
        TargetTriple::create(&module_triple.as_str().to_string_lossy())
    };

    let target = Target::from_triple(&triple).map_err(|e| AnalysisError::llvm("target lookup", e))?;
    let machine = target
        .create_target_machine(
            &triple,
            descriptor.cpu,
            &descriptor.features,
            opt_level.codegen_level(),
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| {
            AnalysisError::llvm(
                "target machine creation",
                format!(
                    "no machine for {} / {}",
                    triple.as_str().to_string_lossy(),
                    descriptor.cpu
                ),
            )
        })?;

    module.set_triple(&machine.get_triple());
    module.set_data_layout(&machine.get_target_data().get_data_layout());

    log::debug!(
        "target machine: {} cpu={} features=`{}`",
        triple.as_str().to_string_lossy(),
        descriptor.cpu,
        descriptor.features
    );
    Ok(machine)
}

/// Everything a strategy may touch.
pub struct OptimizationContext<'a, 'ctx> {
    pub context: &'ctx Context,
    pub target_machine: &'a TargetMachine,
    pub module: &'a Module<'ctx>,
    pub opt_level: OptLevel,
    pub session: &'a AnalysisSession,
}

/// A caller-substitutable transformation over the located module.
pub trait OptimizationStrategy {
    fn name(&self) -> &str {
        "custom"
    }

    fn optimize(&self, cx: &OptimizationContext<'_, '_>) -> AnalysisResult<()>;
}

impl<F> OptimizationStrategy for F
where
    F: Fn(&OptimizationContext<'_, '_>) -> AnalysisResult<()>,
{
    fn optimize(&self, cx: &OptimizationContext<'_, '_>) -> AnalysisResult<()> {
        self(cx)
    }
}

/// The built-in strategy: runtime lowering, inlining, then `default<On>`.
#[derive(Debug, Clone, Default)]
pub struct StandardOptimize {
    pub intrinsics: RuntimeIntrinsics,
}

impl StandardOptimize {
    /// The new-pass-manager pipeline run after lowering.
    pub fn pipeline(opt_level: OptLevel) -> String {
        format!("always-inline,cgscc(inline),{}", opt_level.pipeline())
    }
}

impl OptimizationStrategy for StandardOptimize {
    fn name(&self) -> &str {
        "standard"
    }

    fn optimize(&self, cx: &OptimizationContext<'_, '_>) -> AnalysisResult<()> {
        let report = lower_runtime_intrinsics(cx.context, cx.module, &self.intrinsics)?;
        cx.session.record_runtime_calls_lowered(report.total());

        let pipeline = Self::pipeline(cx.opt_level);
        let options = PassBuilderOptions::create();
        options.set_verify_each(cfg!(debug_assertions));
        options.set_loop_vectorization(cx.opt_level >= OptLevel::O2);
        options.set_loop_slp_vectorization(cx.opt_level >= OptLevel::O2);

        log::debug!("running `{pipeline}`");
        cx.module
            .run_passes(&pipeline, cx.target_machine, options)
            .map_err(|e| AnalysisError::llvm("optimization pipeline", e))
    }
}

/// Which optimization runs for an analysis. Never both.
pub enum Pipeline {
    /// The host's default pipeline, applied when the dump is produced.
    HostDefault,
    /// A strategy run by the driver over the unoptimized dump.
    Custom(Box<dyn OptimizationStrategy>),
}

impl Pipeline {
    /// `Custom` with the built-in [`StandardOptimize`].
    pub fn standard() -> Self {
        Pipeline::Custom(Box::new(StandardOptimize::default()))
    }

    pub fn custom(strategy: impl OptimizationStrategy + 'static) -> Self {
        Pipeline::Custom(Box::new(strategy))
    }

    /// `Custom` with a closure as the strategy.
    pub fn from_fn<F>(strategy: F) -> Self
    where
        F: Fn(&OptimizationContext<'_, '_>) -> AnalysisResult<()> + 'static,
    {
        Pipeline::Custom(Box::new(strategy))
    }

    /// Whether the host should optimize the dump itself.
    pub fn uses_host_default(&self) -> bool {
        matches!(self, Pipeline::HostDefault)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::HostDefault
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::HostDefault => f.write_str("HostDefault"),
            Pipeline::Custom(strategy) => write!(f, "Custom({})", strategy.name()),
        }
    }
}

/// Run `pipeline` over the module in `cx`.
pub fn optimize(pipeline: &Pipeline, cx: &OptimizationContext<'_, '_>) -> AnalysisResult<()> {
    match pipeline {
        Pipeline::HostDefault => {
            log::debug!("host default pipeline already applied; no further optimization");
            Ok(())
        }
        Pipeline::Custom(strategy) => {
            log::debug!("running {} optimization strategy at {}", strategy.name(), cx.opt_level);
            strategy.optimize(cx)
        }
    }
}
