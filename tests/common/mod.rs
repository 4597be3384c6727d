//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use iaca::{InMemoryIrProvider, IrDump, Signature};

/// Unoptimized dump of `sum_of_vector(::Vector{Float64})` with its system-ABI shim.
pub const SUM_OF_VECTOR_IR: &str = r#"
target triple = "x86_64-unknown-linux-gnu"

declare void @iaca_marker_start()
declare void @iaca_marker_end()
declare ptr @julia.get_pgcstack()
declare token @llvm.julia.gc_preserve_begin(...)
declare void @llvm.julia.gc_preserve_end(token)
declare ptr @julia.new_gc_frame(i32)
declare void @julia.push_gc_frame(ptr, i32)
declare void @julia.pop_gc_frame(ptr)
declare ptr @julia.get_gc_frame_slot(ptr, i32)

define double @julia_sum_of_vector_1234(ptr %data, i64 %len) {
top:
  %pgcstack = call ptr @julia.get_pgcstack()
  %frame = call ptr @julia.new_gc_frame(i32 1)
  call void @julia.push_gc_frame(ptr %frame, i32 1)
  %root = call ptr @julia.get_gc_frame_slot(ptr %frame, i32 0)
  store ptr %data, ptr %root
  %tok = call token (...) @llvm.julia.gc_preserve_begin(ptr %data)
  call void @iaca_marker_start()
  br label %cond

cond:
  %i = phi i64 [ 0, %top ], [ %next, %body ]
  %acc = phi double [ 0.0, %top ], [ %sum, %body ]
  %done = icmp sge i64 %i, %len
  br i1 %done, label %exit, label %body

body:
  %p = getelementptr inbounds double, ptr %data, i64 %i
  %x = load double, ptr %p
  %sum = fadd double %acc, %x
  %next = add i64 %i, 1
  br label %cond

exit:
  call void @iaca_marker_end()
  call void @llvm.julia.gc_preserve_end(token %tok)
  call void @julia.pop_gc_frame(ptr %frame)
  ret double %acc
}

define ptr @jfptr_sum_of_vector_1235(ptr %f, ptr %args, i32 %nargs) {
top:
  %boxed = load ptr, ptr %args
  ret ptr %boxed
}
"#;

/// What the host's own pipeline leaves of [`SUM_OF_VECTOR_IR`].
pub const SUM_OF_VECTOR_OPTIMIZED_IR: &str = r#"
target triple = "x86_64-unknown-linux-gnu"

declare void @iaca_marker_start()
declare void @iaca_marker_end()

define double @julia_sum_of_vector_1234(ptr nocapture readonly %data, i64 %len) {
top:
  call void @iaca_marker_start()
  %empty = icmp slt i64 %len, 1
  br i1 %empty, label %exit, label %body

body:
  %i = phi i64 [ 0, %top ], [ %next, %body ]
  %acc = phi double [ 0.0, %top ], [ %sum, %body ]
  %p = getelementptr inbounds double, ptr %data, i64 %i
  %x = load double, ptr %p, align 8
  %sum = fadd double %acc, %x
  %next = add nuw nsw i64 %i, 1
  %done = icmp eq i64 %next, %len
  br i1 %done, label %exit, label %body

exit:
  %result = phi double [ 0.0, %top ], [ %sum, %body ]
  call void @iaca_marker_end()
  ret double %result
}
"#;

/// Markers around nothing at all.
pub const EMPTY_REGION_IR: &str = r#"
target triple = "x86_64-unknown-linux-gnu"

declare void @iaca_marker_start()
declare void @iaca_marker_end()

define void @julia_empty_region_7() {
top:
  call void @iaca_marker_start()
  call void @iaca_marker_end()
  ret void
}
"#;

/// A function only reachable through its C-ABI wrapper.
pub const C_ABI_ONLY_IR: &str = r#"
target triple = "x86_64-unknown-linux-gnu"

define i64 @jlcapi_callback_42(i64 %x) {
top:
  %y = add i64 %x, 1
  ret i64 %y
}
"#;

pub fn vector_signature() -> Signature {
    Signature::new(["Vector{Float64}"])
}

/// Provider holding the sum-of-vector dumps, raw and host-optimized.
pub fn sum_of_vector_provider() -> InMemoryIrProvider {
    let mut provider = InMemoryIrProvider::new();
    provider
        .insert(
            "sum_of_vector",
            vector_signature(),
            IrDump::text("sum_of_vector.ll", SUM_OF_VECTOR_IR),
        )
        .insert_optimized(
            "sum_of_vector",
            vector_signature(),
            IrDump::text("sum_of_vector.opt.ll", SUM_OF_VECTOR_OPTIMIZED_IR),
        );
    provider
}

static STUBS: Mutex<()> = Mutex::new(());

/// Serializes tests that write and spawn stub executables.
pub fn stub_lock() -> MutexGuard<'static, ()> {
    STUBS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write an executable shell script standing in for `iaca`.
///
/// The stub records its arguments, one per line, in `<dir>/args`, fails with 3 if the
/// object file it was given does not exist and otherwise exits with `exit_code`.
#[cfg(unix)]
pub fn write_stub_analyzer(dir: &Path, exit_code: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let args_file = dir.join("args");
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\ntest -f \"$3\" || exit 3\nexit {}\n",
        args_file.display(),
        exit_code
    );
    let path = dir.join("iaca-stub");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Arguments the stub analyzer was last invoked with.
pub fn recorded_args(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("args"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Whether `dir` is empty, i.e. every scratch directory created in it is gone.
pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}
