// This module is the seam between the driver and the host toolchain that actually compiled
// the function under study. The host's specialization and name-mangling machinery is a black
// box: all the driver needs is a way to ask "give me the IR for this function applied to this
// argument signature", together with two knobs that the rest of the pipeline depends on,
// whether the host should run its own default optimization pipeline before handing the IR
// over, and whether it should generate native-ABI wrapper entry points (always off, so the
// dump only contains directly callable forms). IrProvider is that request as a trait.
// IrDump carries the answer as raw bytes, textual `.ll` or `.bc` bitcode (LLVM detects which
// on parse), plus an origin label for error messages. Two providers ship with the crate: an
// in-memory table used by embedders that already hold the IR, and a file-backed provider used
// by the iaca-analyze tool, which optionally points at a second, host-optimized dump.

//! Host toolchain seam: obtaining IR for a function call.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;

use crate::core::{AnalysisError, AnalysisResult};

/// The user-facing function being analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    path: String,
}

impl FunctionRef {
    /// Accepts a bare name (`sum`) or a qualified one (`Main.sum`, `crate::kernels::sum`).
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The declared name, i.e. the last path segment.
    pub fn logical_name(&self) -> &str {
        let tail = self.path.rsplit("::").next().unwrap_or(&self.path);
        tail.rsplit('.').next().unwrap_or(tail)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Argument types of the call being analyzed, in host notation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    types: Vec<String>,
}

impl Signature {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.types.join(", "))?;
        if self.types.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// How the host should produce the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    /// Run the host's default optimization pipeline before dumping.
    pub optimize: bool,
    /// Generate native-ABI wrapper entry points.
    pub native_wrappers: bool,
}

impl DumpOptions {
    /// Options used by the locator: wrappers are never requested.
    pub fn for_pipeline(optimize: bool) -> Self {
        Self {
            optimize,
            native_wrappers: false,
        }
    }
}

/// Raw IR returned by a provider, textual or bitcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrDump {
    origin: String,
    bytes: Vec<u8>,
}

impl IrDump {
    const BITCODE_MAGIC: [u8; 4] = [b'B', b'C', 0xC0, 0xDE];

    pub fn text(origin: impl Into<String>, ir: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            bytes: ir.into().into_bytes(),
        }
    }

    pub fn bitcode(origin: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            origin: origin.into(),
            bytes,
        }
    }

    /// Read a `.ll` or `.bc` file.
    pub fn from_file(path: &Path) -> AnalysisResult<Self> {
        let bytes = fs::read(path).map_err(|e| AnalysisError::Provider {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            origin: path.display().to_string(),
            bytes,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_bitcode(&self) -> bool {
        self.bytes.starts_with(&Self::BITCODE_MAGIC)
    }

    /// Parse into a module owned by `context` and verify it.
    pub fn parse<'ctx>(&self, context: &'ctx Context) -> AnalysisResult<Module<'ctx>> {
        let buffer = MemoryBuffer::create_from_memory_range_copy(&self.bytes, &self.origin);
        let module = context
            .create_module_from_ir(buffer)
            .map_err(|e| AnalysisError::Ir {
                origin: self.origin.clone(),
                reason: e.to_string(),
            })?;
        module.verify().map_err(|e| AnalysisError::Ir {
            origin: self.origin.clone(),
            reason: e.to_string(),
        })?;

        log::debug!(
            "parsed {} dump `{}`",
            if self.is_bitcode() { "bitcode" } else { "textual" },
            self.origin
        );
        Ok(module)
    }
}

/// Obtains IR for `function(signature)` from the host toolchain.
pub trait IrProvider {
    fn dump(
        &self,
        function: &FunctionRef,
        signature: &Signature,
        options: DumpOptions,
    ) -> AnalysisResult<IrDump>;
}

impl<P: IrProvider + ?Sized> IrProvider for &P {
    fn dump(
        &self,
        function: &FunctionRef,
        signature: &Signature,
        options: DumpOptions,
    ) -> AnalysisResult<IrDump> {
        (**self).dump(function, signature, options)
    }
}

/// A host-default request cannot be served from unoptimized IR.
fn no_optimized_dump(function: &FunctionRef, signature: &Signature) -> AnalysisError {
    AnalysisError::Provider {
        name: function.path().to_string(),
        reason: format!(
            "no host-optimized dump for signature {signature}; use the standard pipeline for unoptimized IR"
        ),
    }
}

#[derive(Debug, Clone)]
struct Registered {
    raw: IrDump,
    optimized: Option<IrDump>,
}

/// Provider backed by dumps registered up front, keyed by logical name and signature.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIrProvider {
    entries: HashMap<(String, Signature), Registered>,
}

impl InMemoryIrProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the unoptimized dump for `name(signature)`.
    pub fn insert(&mut self, name: &str, signature: Signature, ir: IrDump) -> &mut Self {
        self.entries
            .entry((name.to_string(), signature))
            .and_modify(|entry| entry.raw = ir.clone())
            .or_insert(Registered {
                raw: ir,
                optimized: None,
            });
        self
    }

    /// Register the host-optimized dump for `name(signature)`.
    ///
    /// Without one, requests for the host's default pipeline fail.
    pub fn insert_optimized(&mut self, name: &str, signature: Signature, ir: IrDump) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(&(name.to_string(), signature.clone())) {
            entry.optimized = Some(ir);
        } else {
            self.entries.insert(
                (name.to_string(), signature),
                Registered {
                    raw: ir.clone(),
                    optimized: Some(ir),
                },
            );
        }
        self
    }
}

impl IrProvider for InMemoryIrProvider {
    fn dump(
        &self,
        function: &FunctionRef,
        signature: &Signature,
        options: DumpOptions,
    ) -> AnalysisResult<IrDump> {
        let key = (function.logical_name().to_string(), signature.clone());
        let entry = self.entries.get(&key).ok_or_else(|| AnalysisError::Provider {
            name: function.path().to_string(),
            reason: format!("no dump registered for signature {signature}"),
        })?;

        match (&entry.optimized, options.optimize) {
            (Some(optimized), true) => Ok(optimized.clone()),
            (None, true) => Err(no_optimized_dump(function, signature)),
            (_, false) => Ok(entry.raw.clone()),
        }
    }
}

/// Provider reading an IR file produced by the host ahead of time.
///
/// The file is expected to contain the requested specialization; the locator
/// picks the entry by name.
#[derive(Debug, Clone)]
pub struct FileIrProvider {
    path: PathBuf,
    optimized: Option<PathBuf>,
}

impl FileIrProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            optimized: None,
        }
    }

    /// Dump to use when the host's default pipeline is requested. Without it such
    /// requests fail.
    pub fn with_optimized(mut self, path: impl Into<PathBuf>) -> Self {
        self.optimized = Some(path.into());
        self
    }
}

impl IrProvider for FileIrProvider {
    fn dump(
        &self,
        function: &FunctionRef,
        signature: &Signature,
        options: DumpOptions,
    ) -> AnalysisResult<IrDump> {
        let path = match (&self.optimized, options.optimize) {
            (Some(optimized), true) => optimized.as_path(),
            (None, true) => return Err(no_optimized_dump(function, signature)),
            (_, false) => self.path.as_path(),
        };
        log::trace!("reading IR for {}{} from {}", function, signature, path.display());
        IrDump::from_file(path)
    }
}
