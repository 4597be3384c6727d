// This module checks that the IACA barriers survived code generation. Marker splicing and the
// optimizer work on IR, but IACA only ever sees the object file, so after emission the driver
// reads the object back, walks its executable sections and looks for the exact byte sequences
// IACA scans for. Those sequences are not hard-coded: they are assembled here with iced-x86's
// code assembler from the same two pieces the inline asm uses (a `mov ebx, <code>` and the
// `64 67 90` tail), so the check and the marker definition cannot drift apart.
//
// Each start sequence is paired with the next end sequence in the same section. The bytes in
// between are decoded with the iced-x86 decoder to count the instructions IACA will measure;
// a pair with nothing in between usually means the optimizer proved the workload dead.

//! Marker detection in emitted object files.

use iced_x86::code_asm::{ebx, CodeAssembler};
use iced_x86::{Decoder, DecoderOptions, IcedError};
use object::{Object, ObjectSection, SectionKind};

use crate::core::{AnalysisError, AnalysisResult};
use crate::llvm::MarkerCode;

/// Bytes IACA recognizes after the `mov ebx, <code>`.
pub const MARKER_TAIL: [u8; 3] = [0x64, 0x67, 0x90];

/// Machine code of the barrier for `code`.
pub fn marker_encoding(code: MarkerCode) -> Result<Vec<u8>, IcedError> {
    let mut a = CodeAssembler::new(64)?;
    a.mov(ebx, code.value() as i32)?;
    a.db(&MARKER_TAIL)?;
    a.assemble(0)
}

/// One start/end pair found in an executable section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRegion {
    pub section: String,
    /// Offset of the start barrier's first byte.
    pub start_offset: u64,
    /// Offset of the end barrier's first byte.
    pub end_offset: u64,
    /// Instructions strictly between the two barriers.
    pub instructions: usize,
}

impl MarkerRegion {
    pub fn is_empty(&self) -> bool {
        self.instructions == 0
    }

    /// Instructions IACA attributes to the region, which includes the end barrier's `mov`.
    pub fn measured_instructions(&self) -> usize {
        self.instructions + 1
    }
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn count_instructions(code: &[u8], ip: u64) -> usize {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut count = 0;
    while decoder.can_decode() {
        decoder.decode();
        count += 1;
    }
    count
}

/// Pair start and end barriers in a single section's bytes.
pub fn scan_section(
    section: &str,
    data: &[u8],
    start: &[u8],
    end: &[u8],
) -> Vec<MarkerRegion> {
    let mut regions = Vec::new();
    let mut cursor = 0;

    while let Some(open) = find_from(data, start, cursor) {
        let body = open + start.len();
        let Some(close) = find_from(data, end, body) else {
            log::warn!("{section}: start marker at {open:#x} has no matching end marker");
            break;
        };

        let instructions = count_instructions(&data[body..close], body as u64);
        log::trace!("{section}: marker region {open:#x}..{close:#x}, {instructions} instructions");
        regions.push(MarkerRegion {
            section: section.to_string(),
            start_offset: open as u64,
            end_offset: close as u64,
            instructions,
        });
        cursor = close + end.len();
    }

    regions
}

/// Find every marker region in the executable sections of `object_bytes`.
pub fn find_marker_regions(object_bytes: &[u8]) -> AnalysisResult<Vec<MarkerRegion>> {
    let start = marker_encoding(MarkerCode::Start)
        .map_err(|e| AnalysisError::llvm("marker encoding", e))?;
    let end =
        marker_encoding(MarkerCode::End).map_err(|e| AnalysisError::llvm("marker encoding", e))?;

    let file = object::File::parse(object_bytes)
        .map_err(|e| AnalysisError::llvm("object inspection", e))?;

    let mut regions = Vec::new();
    for section in file.sections() {
        if section.kind() != SectionKind::Text {
            continue;
        }
        let name = section.name().unwrap_or("<unnamed>");
        let data = section
            .data()
            .map_err(|e| AnalysisError::llvm("object inspection", e))?;
        regions.extend(scan_section(name, data, &start, &end));
    }

    Ok(regions)
}
