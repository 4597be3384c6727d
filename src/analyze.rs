// This module is the orchestrator tying the pipeline stages together for one analysis. The
// configuration is captured first (from the environment in `analyze`, explicitly in
// `analyze_with_config`), so configuration errors surface before any IR is requested or any
// scratch directory exists. Each invocation then owns a fresh LLVM context: the provider's
// dump is parsed and the native entry located, a target machine is resolved for the requested
// microarchitecture, marker calls are spliced into barriers, exactly one optimization strategy
// runs, and the module is emitted as an object file into a new scratch directory. The object
// is read back and scanned for marker regions before the analyzer runs over it; a missing
// region only produces a warning since IACA itself reports that condition. Once the analyzer
// has succeeded the object is optionally copied out for the caller; a failed analysis leaves
// nothing behind. The scratch directory is removed on every path.

//! Analysis entry points.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use inkwell::context::Context;

use crate::core::{
    AnalysisResult, AnalysisSession, AnalyzerConfig, AnalyzerPath, ConfigError,
    Microarchitecture, SessionStats, TargetDescriptor,
};
use crate::llvm::{
    locate, optimize, resolve_target_machine, splice_markers, DumpOptions, FunctionRef,
    IrProvider, OptimizationContext, Pipeline, Signature,
};
use crate::runner::{emit_object, run_analyzer, ScratchDir};
use crate::x64::{find_marker_regions, MarkerRegion};

/// What to analyze and how.
#[derive(Debug)]
pub struct AnalysisRequest {
    pub function: FunctionRef,
    pub signature: Signature,
    pub arch: Microarchitecture,
    pub pipeline: Pipeline,
    /// Copy the emitted object here after a successful analyzer run.
    pub emit_object: Option<PathBuf>,
}

impl AnalysisRequest {
    /// Analyze `function(signature)` for SKL with the host's default pipeline.
    pub fn new(function: impl Into<String>, signature: Signature) -> Self {
        Self {
            function: FunctionRef::new(function),
            signature,
            arch: Microarchitecture::default(),
            pipeline: Pipeline::default(),
            emit_object: None,
        }
    }

    pub fn arch(mut self, arch: Microarchitecture) -> Self {
        self.arch = arch;
        self
    }

    /// Set the microarchitecture from an IACA tag such as `"HSW"`.
    pub fn arch_tag(self, tag: &str) -> Result<Self, ConfigError> {
        Ok(self.arch(tag.parse()?))
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn emit_object(mut self, path: impl Into<PathBuf>) -> Self {
        self.emit_object = Some(path.into());
        self
    }
}

/// Result of a successful analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub arch: Microarchitecture,
    pub analyzer: AnalyzerPath,
    pub exit_code: i32,
    pub regions: Vec<MarkerRegion>,
    /// Where the object was copied, if requested.
    pub emitted_object: Option<PathBuf>,
    pub stats: SessionStats,
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} -arch {} exited with status {}",
            self.analyzer, self.arch, self.exit_code
        )?;
        if let Some(path) = &self.emitted_object {
            writeln!(f, "object written to {}", path.display())?;
        }
        write!(f, "{}", self.stats)
    }
}

/// Analyze with configuration read from the environment at call time.
pub fn analyze(provider: &dyn IrProvider, request: AnalysisRequest) -> AnalysisResult<AnalysisOutcome> {
    let config = AnalyzerConfig::from_env()?;
    analyze_with_config(provider, request, &config)
}

/// Analyze with explicit configuration.
pub fn analyze_with_config(
    provider: &dyn IrProvider,
    request: AnalysisRequest,
    config: &AnalyzerConfig,
) -> AnalysisResult<AnalysisOutcome> {
    let AnalysisRequest {
        function,
        signature,
        arch,
        pipeline,
        emit_object: emit_to,
    } = request;
    log::debug!("analyzing {function}{signature} for {arch} with {pipeline:?}");

    let context = Context::create();
    let session = AnalysisSession::new();

    let options = DumpOptions::for_pipeline(pipeline.uses_host_default());
    let located = locate(&context, provider, &function, &signature, options, &session)?;
    let module = &located.module;

    let descriptor = TargetDescriptor::new(arch, config.cpu_features.as_str());
    let machine = resolve_target_machine(&descriptor, module, config.opt_level)?;

    let spliced = splice_markers(&context, module, &machine)?;
    session.record_markers_spliced(spliced);

    let cx = OptimizationContext {
        context: &context,
        target_machine: &machine,
        module,
        opt_level: config.opt_level,
        session: &session,
    };
    optimize(&pipeline, &cx)?;

    let scratch = ScratchDir::create(config.scratch_root.as_deref())?;
    let object = emit_object(&machine, module, scratch.path())?;
    let bytes = fs::read(&object)?;
    session.record_object(bytes.len() as u64);

    let regions = find_marker_regions(&bytes)?;
    session.record_marker_regions(regions.len());
    if regions.len() * 2 < spliced {
        log::warn!(
            "{} marker calls spliced but only {} marker regions found in the object",
            spliced,
            regions.len()
        );
    }
    for region in regions.iter().filter(|r| r.is_empty()) {
        log::warn!(
            "{}: marker region at {:#x} contains no instructions",
            region.section,
            region.start_offset
        );
    }

    let exit_code = run_analyzer(&config.analyzer, arch, &object)?;

    let emitted_object = match emit_to {
        Some(dest) => {
            fs::copy(&object, &dest)?;
            log::info!("copied object to {}", dest.display());
            Some(dest)
        }
        None => None,
    };
    scratch.close()?;

    Ok(AnalysisOutcome {
        arch,
        analyzer: config.analyzer.clone(),
        exit_code,
        regions,
        emitted_object,
        stats: session.stats(),
    })
}
