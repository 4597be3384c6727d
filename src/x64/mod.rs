//! x86-64 specific components.
//!
//! - Marker byte sequences assembled with iced-x86
//! - Marker region detection in emitted objects

pub mod inspect;

pub use inspect::{
    find_marker_regions,
    marker_encoding,
    scan_section,
    MarkerRegion,
    MARKER_TAIL,
};
