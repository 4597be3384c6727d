// This module implements the correlation step of the driver: finding, inside the IR the host
// dumped for one call, the single compiled function that corresponds to what the user asked
// to measure. A host typically emits several entry points per specialization, the native
// entry using its internal calling convention plus wrapper/shim entries for C-ABI callers,
// the generic system calling convention and a java-style boxed-argument ABI. Their symbols
// follow a fixed grammar, `<prefix>_<logical name>_<numeric suffix>`, where the prefix names
// the calling convention. The locator parses every defined function's symbol against that
// grammar (a regex over the enumerated prefix set), groups the matches by logical name and
// then by convention, and returns the one native entry for the requested name. No match at
// all is NotFound, matches without a native entry is NoNativeEntry (listing what was found),
// and more than one native entry is AmbiguousNativeEntry; a shim is never returned in place
// of the native entry.

//! Compiled-unit locator: from a function reference to its native entry point.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::FunctionValue;
use regex::Regex;

use super::provider::{DumpOptions, FunctionRef, IrProvider, Signature};
use crate::core::{AnalysisError, AnalysisResult, AnalysisSession};

/// Calling convention encoded in a compiled symbol's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallingConvention {
    /// The host's internal, directly callable convention.
    Native,
    /// Wrapper callable from C.
    CAbiShim,
    /// Wrapper taking the generic boxed-arguments system convention.
    SystemAbiShim,
    /// Java-style ABI: function object plus argument array.
    JavaStyleAbi,
}

impl CallingConvention {
    /// Map a symbol prefix to its convention.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "julia" => Some(CallingConvention::Native),
            "jlcapi" => Some(CallingConvention::CAbiShim),
            "jfptr" | "jlcall" => Some(CallingConvention::SystemAbiShim),
            "japi1" => Some(CallingConvention::JavaStyleAbi),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CallingConvention::Native => "native",
            CallingConvention::CAbiShim => "C-ABI-shim",
            CallingConvention::SystemAbiShim => "system-ABI-shim",
            CallingConvention::JavaStyleAbi => "java-style-ABI",
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn mangled_name_grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^(julia|jlcapi|jfptr|jlcall|japi1)_(.+)_(\d+)$")
            .expect("mangled-name grammar is a valid regex")
    })
}

/// A symbol parsed against the `<prefix>_<logical name>_<suffix>` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangledName {
    pub symbol: String,
    pub convention: CallingConvention,
    pub logical_name: String,
    pub suffix: u64,
}

impl MangledName {
    /// Parse `symbol`, returning `None` when it does not follow the grammar.
    pub fn parse(symbol: &str) -> Option<Self> {
        let captures = mangled_name_grammar().captures(symbol)?;
        let convention = CallingConvention::from_prefix(&captures[1])?;
        let suffix = captures[3].parse().ok()?;
        Some(Self {
            symbol: symbol.to_string(),
            convention,
            logical_name: captures[2].to_string(),
            suffix,
        })
    }
}

/// A defined function in the located module with its parsed symbol.
#[derive(Debug, Clone)]
pub struct CompiledFunction<'ctx> {
    pub value: FunctionValue<'ctx>,
    pub name: MangledName,
}

/// The located module and its native entry point.
#[derive(Debug)]
pub struct Located<'ctx> {
    pub module: Module<'ctx>,
    pub entry: CompiledFunction<'ctx>,
}

/// Dump `function(signature)` through `provider` and find its native entry.
pub fn locate<'ctx>(
    context: &'ctx Context,
    provider: &dyn IrProvider,
    function: &FunctionRef,
    signature: &Signature,
    options: DumpOptions,
    session: &AnalysisSession,
) -> AnalysisResult<Located<'ctx>> {
    log::debug!(
        "requesting IR for {}{} (optimize: {}, wrappers: {})",
        function,
        signature,
        options.optimize,
        options.native_wrappers
    );
    let dump = provider.dump(function, signature, options)?;
    let module = dump.parse(context)?;
    let entry = select_native_entry(&module, function.logical_name(), signature, session)?;
    Ok(Located { module, entry })
}

/// Group the module's defined functions by logical name and convention.
pub fn group_entries<'ctx>(
    module: &Module<'ctx>,
    session: &AnalysisSession,
) -> BTreeMap<String, BTreeMap<CallingConvention, Vec<CompiledFunction<'ctx>>>> {
    let mut groups: BTreeMap<String, BTreeMap<CallingConvention, Vec<CompiledFunction<'ctx>>>> =
        BTreeMap::new();

    for value in module.get_functions() {
        if value.count_basic_blocks() == 0 {
            continue;
        }
        session.record_function_scanned();

        let Ok(symbol) = value.get_name().to_str() else {
            log::trace!("skipping function with non UTF-8 name");
            continue;
        };
        let Some(name) = MangledName::parse(symbol) else {
            log::trace!("`{symbol}` does not follow the mangled-name grammar");
            continue;
        };

        log::trace!(
            "`{}` -> {} / {}",
            symbol,
            name.logical_name,
            name.convention
        );
        groups
            .entry(name.logical_name.clone())
            .or_default()
            .entry(name.convention)
            .or_default()
            .push(CompiledFunction { value, name });
    }

    groups
}

/// Find the single native entry for `logical_name` in `module`.
pub fn select_native_entry<'ctx>(
    module: &Module<'ctx>,
    logical_name: &str,
    signature: &Signature,
    session: &AnalysisSession,
) -> AnalysisResult<CompiledFunction<'ctx>> {
    let mut groups = group_entries(module, session);

    let Some(mut by_convention) = groups.remove(logical_name) else {
        return Err(AnalysisError::NotFound {
            name: logical_name.to_string(),
            signature: signature.to_string(),
            available: groups.into_keys().collect(),
        });
    };

    for (convention, entries) in &by_convention {
        for _ in entries {
            session.record_candidate(convention.name());
        }
    }

    let Some(mut natives) = by_convention.remove(&CallingConvention::Native) else {
        return Err(AnalysisError::NoNativeEntry {
            name: logical_name.to_string(),
            available: by_convention.into_keys().collect(),
        });
    };

    if natives.len() > 1 {
        return Err(AnalysisError::AmbiguousNativeEntry {
            name: logical_name.to_string(),
            candidates: natives.iter().map(|f| f.name.symbol.clone()).collect(),
        });
    }

    let entry = natives.remove(0);
    log::debug!("native entry for `{}`: {}", logical_name, entry.name.symbol);
    session.record_entry(&entry.name.symbol);
    Ok(entry)
}
