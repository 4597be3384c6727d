// This module provides per-invocation bookkeeping for an analysis. AnalysisSession is created
// at the start of every analyze call and records what each pipeline stage did: how many
// functions the locator scanned, which calling conventions it saw for the requested name,
// how many marker call sites were spliced, how many runtime pseudo-intrinsic calls the
// standard pipeline lowered, how large the emitted object was and how many marker pairs were
// found in it afterwards. The counters use interior mutability so the stages can share one
// session by reference. SessionStats is the plain snapshot handed back to the caller inside
// the analysis outcome, with a Display impl for the command line tool's summary output.

//! Per-analysis session statistics.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// Bookkeeping for one analysis invocation.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    stats: RefCell<SessionStats>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one defined function examined by the locator.
    pub fn record_function_scanned(&self) {
        self.stats.borrow_mut().functions_scanned += 1;
    }

    /// Record a candidate entry for the requested logical name.
    pub fn record_candidate(&self, convention: &str) {
        let mut stats = self.stats.borrow_mut();
        *stats
            .candidates
            .entry(convention.to_string())
            .or_insert(0) += 1;
    }

    /// Record the entry point the locator settled on.
    pub fn record_entry(&self, symbol: &str) {
        self.stats.borrow_mut().entry_symbol = symbol.to_string();
    }

    pub fn record_markers_spliced(&self, count: usize) {
        self.stats.borrow_mut().markers_spliced += count;
    }

    pub fn record_runtime_calls_lowered(&self, count: usize) {
        self.stats.borrow_mut().runtime_calls_lowered += count;
    }

    pub fn record_object(&self, size: u64) {
        self.stats.borrow_mut().object_size = size;
    }

    pub fn record_marker_regions(&self, count: usize) {
        self.stats.borrow_mut().marker_regions = count;
    }

    /// Get a snapshot of the statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Analysis session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Defined functions examined by the locator.
    pub functions_scanned: usize,

    /// Entries found for the requested name, by calling convention.
    pub candidates: BTreeMap<String, usize>,

    /// Mangled name of the selected native entry.
    pub entry_symbol: String,

    /// Marker call sites replaced by barriers.
    pub markers_spliced: usize,

    /// Runtime pseudo-intrinsic calls lowered by the standard pipeline.
    pub runtime_calls_lowered: usize,

    /// Size of the emitted object file (bytes).
    pub object_size: u64,

    /// Start/end marker pairs found in the emitted object.
    pub marker_regions: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis Session Statistics:")?;
        writeln!(f, "  Functions scanned: {}", self.functions_scanned)?;
        if !self.entry_symbol.is_empty() {
            writeln!(f, "  Native entry: {}", self.entry_symbol)?;
        }
        if !self.candidates.is_empty() {
            writeln!(f, "  Candidates:")?;
            for (convention, count) in &self.candidates {
                writeln!(f, "    {}: {}", convention, count)?;
            }
        }
        writeln!(f, "  Markers spliced: {}", self.markers_spliced)?;
        writeln!(f, "  Runtime calls lowered: {}", self.runtime_calls_lowered)?;
        writeln!(f, "  Object size: {} bytes", self.object_size)?;
        writeln!(f, "  Marker regions in object: {}", self.marker_regions)?;
        Ok(())
    }
}
