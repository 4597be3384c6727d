// This module lowers the host runtime's pseudo-intrinsics before the standard pipeline runs.
// An unoptimized dump still contains calls the host's own pipeline would normally rewrite:
// garbage-collection root markers (preserve begin/end pairs that only pin objects for the
// collector), GC frame management (allocating a frame of root slots, pushing it onto and
// popping it off the task's GC stack, addressing a slot) and thread-local-state getters
// (calls returning the current task's GC stack pointer). The backend knows none of them, so
// left alone they become calls to undefined functions in the object file, and IACA would see
// a call instruction in the middle of the measured region.
//
// GC markers whose results are unused are deleted, repeating until nothing changes since an
// end marker consumes the begin marker's token. A GC frame becomes a zeroed stack array of
// `roots + 2` pointer-sized words: word 0 holds the root count shifted left by two, word 1
// the previous top of the GC stack, and the roots follow. Pushing links the frame in through
// the function's GC stack pointer and popping restores the saved previous frame. Frames are
// lowered before the getters, so those stores go through the getter call and pick up its
// replacement. Thread-local getters are replaced by a load from an external thread-local
// global of the same type, which is how the runtime materializes that pointer in statically
// compiled code.

//! Lowering of host-runtime pseudo-intrinsics.

use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::BasicTypeEnum;
use inkwell::values::{
    AnyValue, AnyValueEnum, BasicValue, BasicValueEnum, CallSiteValue, InstructionOpcode,
    InstructionValue, IntValue, PointerValue,
};
use inkwell::AddressSpace;

use crate::core::{AnalysisError, AnalysisResult};

/// Words ahead of the roots in a GC frame: encoded root count, previous frame.
const GC_FRAME_HEADER: u64 = 2;

/// Names of the GC frame pseudo-intrinsics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcFrameIntrinsics {
    /// `ptr new_frame(i32 roots)`
    pub new_frame: String,
    /// `void push_frame(ptr frame, i32 roots)`
    pub push_frame: String,
    /// `void pop_frame(ptr frame)`
    pub pop_frame: String,
    /// `ptr get_slot(ptr frame, i32 index)`
    pub get_slot: String,
}

impl Default for GcFrameIntrinsics {
    fn default() -> Self {
        Self {
            new_frame: "julia.new_gc_frame".to_string(),
            push_frame: "julia.push_gc_frame".to_string(),
            pop_frame: "julia.pop_gc_frame".to_string(),
            get_slot: "julia.get_gc_frame_slot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOp {
    New,
    Push,
    Pop,
    Slot,
}

impl GcFrameIntrinsics {
    fn names(&self) -> Vec<String> {
        vec![
            self.new_frame.clone(),
            self.push_frame.clone(),
            self.pop_frame.clone(),
            self.get_slot.clone(),
        ]
    }

    fn op(&self, name: &str) -> Option<FrameOp> {
        if name == self.new_frame {
            Some(FrameOp::New)
        } else if name == self.push_frame {
            Some(FrameOp::Push)
        } else if name == self.pop_frame {
            Some(FrameOp::Pop)
        } else if name == self.get_slot {
            Some(FrameOp::Slot)
        } else {
            None
        }
    }
}

/// Names of the runtime pseudo-intrinsics the lowering understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIntrinsics {
    /// GC bookkeeping calls removed once their results are dead.
    pub gc_markers: Vec<String>,
    pub gc_frames: GcFrameIntrinsics,
    /// Getter whose result is the GC stack that frames are pushed onto.
    pub pgcstack: String,
    /// Calls returning thread-local runtime state.
    pub tls_getters: Vec<String>,
}

impl Default for RuntimeIntrinsics {
    fn default() -> Self {
        Self {
            gc_markers: [
                "julia.gc_preserve_begin",
                "julia.gc_preserve_end",
                "llvm.julia.gc_preserve_begin",
                "llvm.julia.gc_preserve_end",
            ]
            .map(String::from)
            .to_vec(),
            gc_frames: GcFrameIntrinsics::default(),
            pgcstack: "julia.get_pgcstack".to_string(),
            tls_getters: ["julia.get_pgcstack", "julia.ptls_states"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// What a lowering run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringReport {
    pub gc_markers_removed: usize,
    pub gc_frame_calls_lowered: usize,
    pub tls_loads_inserted: usize,
}

impl LoweringReport {
    pub fn total(&self) -> usize {
        self.gc_markers_removed + self.gc_frame_calls_lowered + self.tls_loads_inserted
    }
}

fn lowering_error(reason: impl ToString) -> AnalysisError {
    AnalysisError::llvm("runtime lowering", reason)
}

fn build_error(e: BuilderError) -> AnalysisError {
    lowering_error(e)
}

fn callee_name(inst: InstructionValue<'_>) -> Option<String> {
    if inst.get_opcode() != InstructionOpcode::Call {
        return None;
    }
    let call = CallSiteValue::try_from(inst).ok()?;
    let callee = call.get_called_fn_value()?;
    callee.get_name().to_str().ok().map(str::to_string)
}

fn calls_to<'ctx>(module: &Module<'ctx>, names: &[String]) -> Vec<(String, InstructionValue<'ctx>)> {
    let mut calls = Vec::new();
    for function in module.get_functions() {
        for block in function.get_basic_blocks() {
            for inst in block.get_instructions() {
                if let Some(name) = callee_name(inst) {
                    if names.contains(&name) {
                        calls.push((name, inst));
                    }
                }
            }
        }
    }
    calls
}

fn remove_dead_gc_markers(module: &Module<'_>, intrinsics: &RuntimeIntrinsics) -> usize {
    let mut removed = 0;
    loop {
        let dead: Vec<_> = calls_to(module, &intrinsics.gc_markers)
            .into_iter()
            .filter(|(_, inst)| inst.get_first_use().is_none())
            .collect();
        if dead.is_empty() {
            return removed;
        }
        for (name, inst) in dead {
            log::trace!("removing GC marker call to `{name}`");
            inst.erase_from_basic_block();
            removed += 1;
        }
    }
}

fn int_operand<'ctx>(call: InstructionValue<'ctx>, index: u32, name: &str) -> AnalysisResult<IntValue<'ctx>> {
    match call.get_operand(index).and_then(|op| op.value()) {
        Some(BasicValueEnum::IntValue(value)) => Ok(value),
        _ => Err(lowering_error(format!(
            "operand {index} of `{name}` is not an integer"
        ))),
    }
}

fn pointer_operand<'ctx>(
    call: InstructionValue<'ctx>,
    index: u32,
    name: &str,
) -> AnalysisResult<PointerValue<'ctx>> {
    match call.get_operand(index).and_then(|op| op.value()) {
        Some(BasicValueEnum::PointerValue(value)) => Ok(value),
        _ => Err(lowering_error(format!(
            "operand {index} of `{name}` is not a pointer"
        ))),
    }
}

fn pointer_result<'ctx>(call: InstructionValue<'ctx>, name: &str) -> AnalysisResult<PointerValue<'ctx>> {
    match call.as_any_value_enum() {
        AnyValueEnum::PointerValue(value) => Ok(value),
        _ => Err(lowering_error(format!("`{name}` does not return a pointer"))),
    }
}

/// The GC stack pointer of the function containing `call`.
fn pgcstack_for<'ctx>(
    call: InstructionValue<'ctx>,
    name: &str,
    intrinsics: &RuntimeIntrinsics,
) -> AnalysisResult<PointerValue<'ctx>> {
    let function = call.get_parent().and_then(|block| block.get_parent());
    let getter = function
        .into_iter()
        .flat_map(|function| function.get_basic_blocks())
        .flat_map(|block| block.get_instructions())
        .find(|inst| callee_name(*inst).as_deref() == Some(intrinsics.pgcstack.as_str()));
    match getter {
        Some(getter) => pointer_result(getter, &intrinsics.pgcstack),
        None => Err(lowering_error(format!(
            "`{name}` used in a function without a `{}` call",
            intrinsics.pgcstack
        ))),
    }
}

/// Address of word `index` of `frame`.
fn frame_word<'ctx>(
    context: &'ctx Context,
    builder: &Builder<'ctx>,
    frame: PointerValue<'ctx>,
    index: IntValue<'ctx>,
) -> AnalysisResult<PointerValue<'ctx>> {
    let word = context.ptr_type(AddressSpace::default());
    // SAFETY: `index` stays within the `roots + 2` words allocated for the frame.
    unsafe { builder.build_in_bounds_gep(word, frame, &[index], "gc_slot") }.map_err(build_error)
}

fn lower_gc_frame_call<'ctx>(
    context: &'ctx Context,
    builder: &Builder<'ctx>,
    intrinsics: &RuntimeIntrinsics,
    op: FrameOp,
    name: &str,
    call: InstructionValue<'ctx>,
) -> AnalysisResult<()> {
    let word = context.ptr_type(AddressSpace::default());
    let size = context.i64_type();
    let i32_type = context.i32_type();

    builder.position_before(&call);
    match op {
        FrameOp::New => {
            let roots = int_operand(call, 0, name)?;
            let words = builder
                .build_int_add(roots, roots.get_type().const_int(GC_FRAME_HEADER, false), "gc_words")
                .map_err(build_error)?;
            let frame = builder
                .build_array_alloca(word, words, "gcframe")
                .map_err(build_error)?;
            let words = builder
                .build_int_z_extend_or_bit_cast(words, size, "")
                .map_err(build_error)?;
            let bytes = builder
                .build_int_mul(words, size.const_int(8, false), "")
                .map_err(build_error)?;
            builder
                .build_memset(frame, 8, context.i8_type().const_zero(), bytes)
                .map_err(build_error)?;
            pointer_result(call, name)?.replace_all_uses_with(frame);
        }
        FrameOp::Push => {
            let frame = pointer_operand(call, 0, name)?;
            let roots = int_operand(call, 1, name)?;
            let pgcstack = pgcstack_for(call, name, intrinsics)?;

            let roots = builder
                .build_int_z_extend_or_bit_cast(roots, size, "")
                .map_err(build_error)?;
            let encoded = builder
                .build_left_shift(roots, size.const_int(2, false), "gc_nroots")
                .map_err(build_error)?;
            builder.build_store(frame, encoded).map_err(build_error)?;

            let prev_word = frame_word(context, builder, frame, i32_type.const_int(1, false))?;
            let prev = builder
                .build_load(word, pgcstack, "gc_prev")
                .map_err(build_error)?;
            builder.build_store(prev_word, prev).map_err(build_error)?;
            builder.build_store(pgcstack, frame).map_err(build_error)?;
        }
        FrameOp::Pop => {
            let frame = pointer_operand(call, 0, name)?;
            let pgcstack = pgcstack_for(call, name, intrinsics)?;

            let prev_word = frame_word(context, builder, frame, i32_type.const_int(1, false))?;
            let prev = builder
                .build_load(word, prev_word, "gc_prev")
                .map_err(build_error)?;
            builder.build_store(pgcstack, prev).map_err(build_error)?;
        }
        FrameOp::Slot => {
            let frame = pointer_operand(call, 0, name)?;
            let index = int_operand(call, 1, name)?;
            let index = builder
                .build_int_add(index, index.get_type().const_int(GC_FRAME_HEADER, false), "")
                .map_err(build_error)?;
            let slot = frame_word(context, builder, frame, index)?;
            pointer_result(call, name)?.replace_all_uses_with(slot);
        }
    }

    log::trace!("lowered GC frame call to `{name}`");
    call.erase_from_basic_block();
    Ok(())
}

fn lower_tls_getter<'ctx>(
    module: &Module<'ctx>,
    builder: &Builder<'ctx>,
    getter: &str,
    call: InstructionValue<'ctx>,
) -> AnalysisResult<()> {
    let ty = BasicTypeEnum::try_from(call.get_type())
        .map_err(|_| lowering_error(format!("`{getter}` does not return a value")))?;

    let global_name = format!("{getter}.tls");
    let global = match module.get_global(&global_name) {
        Some(global) => global,
        None => {
            let global = module.add_global(ty, None, &global_name);
            global.set_thread_local(true);
            global.set_linkage(Linkage::External);
            global
        }
    };

    builder.position_before(&call);
    let loaded = builder
        .build_load(ty, global.as_pointer_value(), "tls")
        .map_err(build_error)?;
    let load_inst = loaded
        .as_instruction_value()
        .ok_or_else(|| lowering_error("thread-local load folded to a constant"))?;

    call.replace_all_uses_with(&load_inst);
    call.erase_from_basic_block();
    Ok(())
}

/// Lower the runtime pseudo-intrinsics named in `intrinsics` throughout `module`.
pub fn lower_runtime_intrinsics<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    intrinsics: &RuntimeIntrinsics,
) -> AnalysisResult<LoweringReport> {
    let mut report = LoweringReport {
        gc_markers_removed: remove_dead_gc_markers(module, intrinsics),
        ..LoweringReport::default()
    };

    let builder = context.create_builder();
    for (name, call) in calls_to(module, &intrinsics.gc_frames.names()) {
        let Some(op) = intrinsics.gc_frames.op(&name) else {
            continue;
        };
        lower_gc_frame_call(context, &builder, intrinsics, op, &name, call)?;
        report.gc_frame_calls_lowered += 1;
    }

    for (getter, call) in calls_to(module, &intrinsics.tls_getters) {
        lower_tls_getter(module, &builder, &getter, call)?;
        report.tls_loads_inserted += 1;
    }

    if report.total() > 0 {
        log::debug!(
            "lowered runtime intrinsics: {} GC markers removed, {} GC frame calls lowered, {} TLS loads inserted",
            report.gc_markers_removed,
            report.gc_frame_calls_lowered,
            report.tls_loads_inserted
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llvm::provider::IrDump;

    const RUNTIME_IR: &str = r#"
        declare token @llvm.julia.gc_preserve_begin(...)
        declare void @llvm.julia.gc_preserve_end(token)
        declare ptr @julia.get_pgcstack()

        define i64 @julia_load_first_1(ptr %v) {
        top:
          %pgcstack = call ptr @julia.get_pgcstack()
          %tok = call token (...) @llvm.julia.gc_preserve_begin(ptr %v)
          %x = load i64, ptr %v
          call void @llvm.julia.gc_preserve_end(token %tok)
          %frame = load ptr, ptr %pgcstack
          %y = ptrtoint ptr %frame to i64
          %z = add i64 %x, %y
          ret i64 %z
        }
    "#;

    #[test]
    fn lowers_gc_markers_and_tls_getters() {
        let context = Context::create();
        let module = IrDump::text("runtime.ll", RUNTIME_IR).parse(&context).unwrap();

        let report =
            lower_runtime_intrinsics(&context, &module, &RuntimeIntrinsics::default()).unwrap();
        assert_eq!(report.gc_markers_removed, 2);
        assert_eq!(report.tls_loads_inserted, 1);
        module.verify().unwrap();

        let ir = module.print_to_string().to_string();
        assert!(!ir.contains("call token"), "{ir}");
        assert!(!ir.contains("call ptr @julia.get_pgcstack"), "{ir}");
        assert!(ir.contains("thread_local"), "{ir}");
    }

    const GC_FRAME_IR: &str = r#"
        declare ptr @julia.get_pgcstack()
        declare ptr @julia.new_gc_frame(i32)
        declare void @julia.push_gc_frame(ptr, i32)
        declare void @julia.pop_gc_frame(ptr)
        declare ptr @julia.get_gc_frame_slot(ptr, i32)

        define i64 @julia_rooted_load_3(ptr %v, ptr %w) {
        top:
          %pgcstack = call ptr @julia.get_pgcstack()
          %frame = call ptr @julia.new_gc_frame(i32 2)
          call void @julia.push_gc_frame(ptr %frame, i32 2)
          %root0 = call ptr @julia.get_gc_frame_slot(ptr %frame, i32 0)
          store ptr %v, ptr %root0
          %root1 = call ptr @julia.get_gc_frame_slot(ptr %frame, i32 1)
          store ptr %w, ptr %root1
          %x = load i64, ptr %v
          %y = load i64, ptr %w
          %z = add i64 %x, %y
          call void @julia.pop_gc_frame(ptr %frame)
          ret i64 %z
        }
    "#;

    #[test]
    fn lowers_gc_frame_push_and_pop() {
        let context = Context::create();
        let module = IrDump::text("frame.ll", GC_FRAME_IR).parse(&context).unwrap();

        let report =
            lower_runtime_intrinsics(&context, &module, &RuntimeIntrinsics::default()).unwrap();
        assert_eq!(report.gc_frame_calls_lowered, 5);
        assert_eq!(report.tls_loads_inserted, 1);
        assert_eq!(report.total(), 6);
        module.verify().unwrap();

        let ir = module.print_to_string().to_string();
        assert!(!ir.contains("call ptr @julia."), "{ir}");
        assert!(!ir.contains("call void @julia."), "{ir}");
        // Two roots plus the two header words, zeroed.
        assert!(ir.contains("alloca ptr, i32 4"), "{ir}");
        assert!(ir.contains("@llvm.memset"), "{ir}");
        // Root count is stored shifted left by two.
        assert!(ir.contains("store i64 8, ptr %gcframe"), "{ir}");
        // Slots skip the header.
        assert!(ir.contains("getelementptr inbounds ptr, ptr %gcframe, i32 2"), "{ir}");
        assert!(ir.contains("getelementptr inbounds ptr, ptr %gcframe, i32 3"), "{ir}");
        // Push and pop both go through the thread-local GC stack.
        assert!(ir.contains("store ptr %gcframe, ptr %tls"), "{ir}");
        assert!(ir.contains("thread_local"), "{ir}");
    }

    #[test]
    fn frame_push_needs_a_gc_stack() {
        let context = Context::create();
        let module = IrDump::text(
            "orphan.ll",
            r#"
            declare ptr @julia.new_gc_frame(i32)
            declare void @julia.push_gc_frame(ptr, i32)

            define void @julia_orphan_4() {
            top:
              %frame = call ptr @julia.new_gc_frame(i32 1)
              call void @julia.push_gc_frame(ptr %frame, i32 1)
              ret void
            }
            "#,
        )
        .parse(&context)
        .unwrap();

        let err = lower_runtime_intrinsics(&context, &module, &RuntimeIntrinsics::default())
            .unwrap_err();
        match err {
            AnalysisError::Llvm { reason, .. } => {
                assert!(reason.contains("julia.get_pgcstack"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn module_without_intrinsics_is_untouched() {
        let context = Context::create();
        let module = IrDump::text(
            "plain.ll",
            "define i64 @julia_id_1(i64 %x) {\n  ret i64 %x\n}\n",
        )
        .parse(&context)
        .unwrap();
        let before = module.print_to_string().to_string();

        let report =
            lower_runtime_intrinsics(&context, &module, &RuntimeIntrinsics::default()).unwrap();
        assert_eq!(report, LoweringReport::default());
        assert_eq!(module.print_to_string().to_string(), before);
    }
}
