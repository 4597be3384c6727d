// This module synthesizes the IACA start/end markers and splices them into the located module.
// A marker is a void, argument-less function whose whole body is one inline-asm call: a
// `movl $<code>, %ebx` carrying the marker code (111 for start, 222 for end) followed by the
// three-byte `64 67 90` sequence IACA scans for. The asm is flagged as having side effects
// and clobbers ebx, memory and all flag state, which is what makes it an optimization barrier
// the optimizer can neither delete nor move code across. The function is `alwaysinline`, so
// once spliced nothing is left of it but the barrier instructions.
//
// Instrumented code does not contain the asm itself, it calls the `iaca_marker_start` /
// `iaca_marker_end` symbols. Splicing synthesizes each marker function in a throwaway module,
// links it into the located module, redirects every call to the marker symbols at it and runs
// LLVM's always-inline pass. This runs in both pipeline modes, so markers reach the object
// file as inline barriers whether or not an additional optimization strategy runs.

//! IACA marker synthesis and splicing.

use std::fmt;

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::TargetMachine;
use inkwell::values::{CallSiteValue, FunctionValue, InstructionOpcode, InstructionValue};
use inkwell::InlineAsmDialect;

use crate::core::{AnalysisError, AnalysisResult};

/// Symbol instrumented code calls to open the measured region.
pub const MARKER_START_SYMBOL: &str = "iaca_marker_start";

/// Symbol instrumented code calls to close the measured region.
pub const MARKER_END_SYMBOL: &str = "iaca_marker_end";

/// IACA marker codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerCode {
    Start,
    End,
}

impl MarkerCode {
    pub const ALL: [MarkerCode; 2] = [MarkerCode::Start, MarkerCode::End];

    /// The immediate moved into `ebx`.
    pub fn value(self) -> u32 {
        match self {
            MarkerCode::Start => 111,
            MarkerCode::End => 222,
        }
    }

    /// The external symbol instrumented code calls for this marker.
    pub fn symbol(self) -> &'static str {
        match self {
            MarkerCode::Start => MARKER_START_SYMBOL,
            MarkerCode::End => MARKER_END_SYMBOL,
        }
    }

    /// Name of the synthesized barrier function.
    pub fn label(self) -> &'static str {
        match self {
            MarkerCode::Start => "iaca.marker.start",
            MarkerCode::End => "iaca.marker.end",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        MarkerCode::ALL.into_iter().find(|code| code.symbol() == symbol)
    }

    /// Machine code this marker lowers to.
    pub fn encoding(self) -> Result<Vec<u8>, iced_x86::IcedError> {
        crate::x64::marker_encoding(self)
    }

    /// AT&T inline-asm template for this marker.
    pub fn asm_template(self) -> String {
        format!("movl $${}, %ebx\n\t.byte 0x64, 0x67, 0x90", self.value())
    }
}

impl fmt::Display for MarkerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Register and state clobbers of the marker asm.
pub const MARKER_CLOBBERS: &str = "~{ebx},~{memory},~{dirflag},~{fpsr},~{flags}";

/// A throwaway single-function module holding one marker.
#[derive(Debug)]
pub struct MarkerUnit<'ctx> {
    pub module: Module<'ctx>,
    pub function: FunctionValue<'ctx>,
}

/// Build `label` as an always-inline function whose body is the marker barrier for `code`.
pub fn synthesize_marker<'ctx>(
    context: &'ctx Context,
    code: MarkerCode,
    label: &str,
) -> AnalysisResult<MarkerUnit<'ctx>> {
    let module = context.create_module(&format!("{label}.module"));
    let fn_type = context.void_type().fn_type(&[], false);
    let function = module.add_function(label, fn_type, Some(Linkage::External));

    for attribute in ["alwaysinline", "nounwind"] {
        let kind = Attribute::get_named_enum_kind_id(attribute);
        function.add_attribute(AttributeLoc::Function, context.create_enum_attribute(kind, 0));
    }

    let asm = context.create_inline_asm(
        fn_type,
        code.asm_template(),
        MARKER_CLOBBERS.to_string(),
        true,
        false,
        Some(InlineAsmDialect::ATT),
        false,
    );

    let builder = context.create_builder();
    let entry = context.append_basic_block(function, "top");
    builder.position_at_end(entry);
    builder
        .build_indirect_call(fn_type, asm, &[], "")
        .map_err(|e| AnalysisError::llvm("marker synthesis", e))?;
    builder
        .build_return(None)
        .map_err(|e| AnalysisError::llvm("marker synthesis", e))?;

    log::trace!("synthesized marker {} as `{}`", code, label);
    Ok(MarkerUnit { module, function })
}

/// Calls to the marker symbols, grouped with the marker they request.
fn marker_call_sites<'ctx>(module: &Module<'ctx>) -> Vec<(MarkerCode, InstructionValue<'ctx>)> {
    let mut sites = Vec::new();
    for function in module.get_functions() {
        for block in function.get_basic_blocks() {
            for inst in block.get_instructions() {
                if inst.get_opcode() != InstructionOpcode::Call {
                    continue;
                }
                let Ok(call) = CallSiteValue::try_from(inst) else {
                    continue;
                };
                let Some(callee) = call.get_called_fn_value() else {
                    continue;
                };
                let code = callee
                    .get_name()
                    .to_str()
                    .ok()
                    .and_then(MarkerCode::from_symbol);
                if let Some(code) = code {
                    sites.push((code, inst));
                }
            }
        }
    }
    sites
}

/// Make sure `code`'s barrier function is defined in `module`, linking it in if needed.
fn ensure_marker<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    code: MarkerCode,
) -> AnalysisResult<FunctionValue<'ctx>> {
    if let Some(existing) = module.get_function(code.label()) {
        if existing.count_basic_blocks() > 0 {
            return Ok(existing);
        }
    }

    let unit = synthesize_marker(context, code, code.label())?;
    unit.module.set_triple(&module.get_triple());
    unit.module.set_data_layout(&module.get_data_layout());
    module
        .link_in_module(unit.module)
        .map_err(|e| AnalysisError::llvm("marker link", e))?;

    let function = module
        .get_function(code.label())
        .ok_or_else(|| AnalysisError::llvm("marker link", format!("`{}` missing after link", code.label())))?;
    function.set_linkage(Linkage::Internal);
    Ok(function)
}

/// Replace every marker call in `module` with an inlined barrier.
///
/// Returns the number of call sites spliced. A module without marker calls is left untouched.
pub fn splice_markers<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    target_machine: &TargetMachine,
) -> AnalysisResult<usize> {
    let sites = marker_call_sites(module);
    if sites.is_empty() {
        log::warn!(
            "no calls to `{}`/`{}` found; the analyzer will have no region to measure",
            MARKER_START_SYMBOL,
            MARKER_END_SYMBOL
        );
        return Ok(0);
    }

    let builder = context.create_builder();
    for &(code, inst) in &sites {
        let barrier = ensure_marker(context, module, code)?;
        builder.position_before(&inst);
        builder
            .build_call(barrier, &[], "")
            .map_err(|e| AnalysisError::llvm("marker splice", e))?;
        inst.erase_from_basic_block();
    }

    module
        .run_passes("always-inline", target_machine, PassBuilderOptions::create())
        .map_err(|e| AnalysisError::llvm("always-inline", e))?;
    module
        .verify()
        .map_err(|e| AnalysisError::llvm("marker splice verification", e))?;

    log::debug!("spliced {} marker call sites", sites.len());
    Ok(sites.len())
}
