//! IACA barriers must survive optimization and code generation.
//!
//! Each test splices markers into a dump, optimizes it with one of the pipelines,
//! emits an object in memory and reads the marker regions back out of `.text`.

mod common;

use common::*;
use iaca::core::{AnalysisSession, Microarchitecture, OptLevel, TargetDescriptor};
use iaca::llvm::{
    locate, optimize, resolve_target_machine, splice_markers, DumpOptions, MarkerCode,
    OptimizationContext, MARKER_START_SYMBOL,
};
use iaca::x64::find_marker_regions;
use iaca::{FunctionRef, InMemoryIrProvider, IrDump, MarkerRegion, Pipeline, Signature};
use inkwell::context::Context;
use inkwell::targets::FileType;
use inkwell::values::AnyValue;

fn compile_regions(
    provider: &InMemoryIrProvider,
    name: &str,
    signature: &Signature,
    pipeline: Pipeline,
    opt_level: OptLevel,
) -> (usize, Vec<MarkerRegion>) {
    let context = Context::create();
    let session = AnalysisSession::new();
    let located = locate(
        &context,
        provider,
        &FunctionRef::new(name),
        signature,
        DumpOptions::for_pipeline(pipeline.uses_host_default()),
        &session,
    )
    .unwrap();

    let descriptor = TargetDescriptor::new(Microarchitecture::Skl, "");
    let machine = resolve_target_machine(&descriptor, &located.module, opt_level).unwrap();
    let spliced = splice_markers(&context, &located.module, &machine).unwrap();

    let cx = OptimizationContext {
        context: &context,
        target_machine: &machine,
        module: &located.module,
        opt_level,
        session: &session,
    };
    optimize(&pipeline, &cx).unwrap();
    located.module.verify().unwrap();

    let object = machine
        .write_to_memory_buffer(&located.module, FileType::Object)
        .unwrap();
    (spliced, find_marker_regions(object.as_slice()).unwrap())
}

fn assert_single_region(regions: &[MarkerRegion]) -> &MarkerRegion {
    assert_eq!(regions.len(), 1, "{regions:?}");
    let region = &regions[0];
    assert!(region.start_offset < region.end_offset, "{region:?}");
    assert!(region.measured_instructions() >= 1, "{region:?}");
    region
}

#[test]
fn test_markers_survive_host_default_pipeline() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (spliced, regions) = compile_regions(
        &sum_of_vector_provider(),
        "sum_of_vector",
        &vector_signature(),
        Pipeline::HostDefault,
        OptLevel::O2,
    );
    assert_eq!(spliced, 2);
    let region = assert_single_region(&regions);
    assert!(!region.is_empty(), "loop body missing from {region:?}");
}

#[test]
fn test_markers_survive_standard_pipeline_at_every_level() {
    let _ = env_logger::builder().is_test(true).try_init();

    for level in 0..=3 {
        let opt_level = OptLevel::new(level).unwrap();
        let (spliced, regions) = compile_regions(
            &sum_of_vector_provider(),
            "sum_of_vector",
            &vector_signature(),
            Pipeline::standard(),
            opt_level,
        );
        assert_eq!(spliced, 2, "at {opt_level}");
        let region = assert_single_region(&regions);
        assert!(!region.is_empty(), "loop body missing at {opt_level}: {region:?}");
    }
}

#[test]
fn test_empty_region_keeps_both_barriers() {
    let mut provider = InMemoryIrProvider::new();
    provider
        .insert(
            "empty_region",
            Signature::default(),
            IrDump::text("empty.ll", EMPTY_REGION_IR),
        )
        .insert_optimized(
            "empty_region",
            Signature::default(),
            IrDump::text("empty.ll", EMPTY_REGION_IR),
        );

    for pipeline in [Pipeline::HostDefault, Pipeline::standard()] {
        let label = format!("{pipeline:?}");
        let (_, regions) = compile_regions(
            &provider,
            "empty_region",
            &Signature::default(),
            pipeline,
            OptLevel::O3,
        );
        let region = assert_single_region(&regions);
        assert!(region.is_empty(), "{label}: {region:?}");
        assert_eq!(region.measured_instructions(), 1, "{label}");
        assert_eq!(
            region.end_offset - region.start_offset,
            MarkerCode::Start.encoding().unwrap().len() as u64,
            "{label}"
        );
    }
}

#[test]
fn test_spliced_module_has_no_marker_calls_left() {
    let context = Context::create();
    let session = AnalysisSession::new();
    let provider = sum_of_vector_provider();
    let located = locate(
        &context,
        &provider,
        &FunctionRef::new("sum_of_vector"),
        &vector_signature(),
        DumpOptions::for_pipeline(false),
        &session,
    )
    .unwrap();

    let descriptor = TargetDescriptor::new(Microarchitecture::Hsw, "");
    let machine = resolve_target_machine(&descriptor, &located.module, OptLevel::O2).unwrap();
    splice_markers(&context, &located.module, &machine).unwrap();

    let ir = located.entry.value.print_to_string().to_string();
    assert!(!ir.contains(&format!("@{MARKER_START_SYMBOL}")), "{ir}");
    assert!(ir.contains("movl $$111, %ebx"), "{ir}");
    assert!(ir.contains("movl $$222, %ebx"), "{ir}");
    assert!(ir.contains("sideeffect"), "{ir}");
}

#[test]
fn test_module_without_markers_is_left_alone() {
    let mut provider = InMemoryIrProvider::new();
    provider.insert(
        "callback",
        Signature::default(),
        IrDump::text(
            "plain.ll",
            "define i64 @julia_callback_1(i64 %x) {\ntop:\n  ret i64 %x\n}\n",
        ),
    );

    let (spliced, regions) = compile_regions(
        &provider,
        "callback",
        &Signature::default(),
        Pipeline::standard(),
        OptLevel::O2,
    );
    assert_eq!(spliced, 0);
    assert!(regions.is_empty());
}
