//! Instrumentation entry points for code compiled to LLVM IR.
//!
//! Wrap the measured region in [`marker_start`] / [`marker_end`]. In the IR this leaves a
//! call to `iaca_marker_start` / `iaca_marker_end`, which the driver replaces with the IACA
//! barrier when it splices markers. Outside the driver the calls are harmless no-ops.
//!
//! ```ignore
//! iaca::instrument::marker_start();
//! for x in v.iter() {
//!     acc += *x;
//! }
//! iaca::instrument::marker_end();
//! ```

use std::sync::atomic::{compiler_fence, Ordering};

/// Exported start marker. Must stay an out-of-line call until splicing.
#[no_mangle]
#[inline(never)]
pub extern "C" fn iaca_marker_start() {
    compiler_fence(Ordering::SeqCst);
}

/// Exported end marker. Must stay an out-of-line call until splicing.
#[no_mangle]
#[inline(never)]
pub extern "C" fn iaca_marker_end() {
    compiler_fence(Ordering::SeqCst);
}

/// Open the measured region.
#[inline(always)]
pub fn marker_start() {
    iaca_marker_start();
}

/// Close the measured region.
#[inline(always)]
pub fn marker_end() {
    iaca_marker_end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llvm::{MARKER_END_SYMBOL, MARKER_START_SYMBOL};

    #[test]
    fn markers_are_callable_outside_the_driver() {
        marker_start();
        let sum: u64 = (1..=4).sum();
        marker_end();
        assert_eq!(sum, 10);
    }

    #[test]
    fn exported_names_match_splice_symbols() {
        let exported: [extern "C" fn(); 2] = [iaca_marker_start, iaca_marker_end];
        exported.iter().for_each(|marker| marker());
        assert_eq!(MARKER_START_SYMBOL, "iaca_marker_start");
        assert_eq!(MARKER_END_SYMBOL, "iaca_marker_end");
    }
}
