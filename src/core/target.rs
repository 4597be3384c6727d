//! Supported Intel microarchitectures and the backend descriptor derived from them.
//!
//! IACA only understands a fixed set of `-arch` tags; each maps to the LLVM CPU
//! name the object file is tuned for.

use std::fmt;
use std::str::FromStr;

use super::error::ConfigError;

/// Microarchitectures accepted by both IACA and the lowering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Microarchitecture {
    /// Haswell.
    Hsw,
    /// Broadwell.
    Bdw,
    /// Skylake client.
    #[default]
    Skl,
    /// Skylake server (AVX-512).
    Skx,
}

impl Microarchitecture {
    pub const ALL: [Microarchitecture; 4] = [
        Microarchitecture::Hsw,
        Microarchitecture::Bdw,
        Microarchitecture::Skl,
        Microarchitecture::Skx,
    ];

    /// The tag passed to `iaca -arch`.
    pub fn tag(self) -> &'static str {
        match self {
            Microarchitecture::Hsw => "HSW",
            Microarchitecture::Bdw => "BDW",
            Microarchitecture::Skl => "SKL",
            Microarchitecture::Skx => "SKX",
        }
    }

    /// The LLVM CPU model the object is generated for.
    pub fn cpu(self) -> &'static str {
        match self {
            Microarchitecture::Hsw => "haswell",
            Microarchitecture::Bdw => "broadwell",
            Microarchitecture::Skl => "skylake",
            Microarchitecture::Skx => "skx",
        }
    }
}

impl fmt::Display for Microarchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Microarchitecture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the `:SKL` symbol spelling as well.
        let tag = s.trim().trim_start_matches(':');
        Microarchitecture::ALL
            .into_iter()
            .find(|arch| arch.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ConfigError::UnsupportedMicroarchitecture {
                tag: s.to_string(),
            })
    }
}

/// Backend configuration for one analysis: CPU model and feature string.
///
/// Resolved once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub arch: Microarchitecture,
    pub cpu: &'static str,
    pub features: String,
}

impl TargetDescriptor {
    pub fn new(arch: Microarchitecture, features: impl Into<String>) -> Self {
        Self {
            arch,
            cpu: arch.cpu(),
            features: features.into(),
        }
    }
}
