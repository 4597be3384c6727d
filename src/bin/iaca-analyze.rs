//! Command line front end: analyze one function from an IR file.
//!
//! The analyzer's own report goes to stdout; diagnostics go to stderr through
//! `env_logger` (`RUST_LOG`, default `warn`).

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use iaca::core::{IACA_OPT_LEVEL_ENV, IACA_PATH_ENV};
use iaca::{
    analyze_with_config, AnalysisError, AnalysisRequest, AnalyzerConfig, AnalyzerPath,
    FileIrProvider, Microarchitecture, OptLevel, Pipeline, Signature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PipelineChoice {
    /// Use the host's optimized dump as is
    Default,
    /// Lower runtime intrinsics and run LLVM's default<On> pipeline
    Standard,
}

#[derive(Parser, Debug)]
#[command(
    name = "iaca-analyze",
    about = "Run Intel IACA over the native entry of a compiled function."
)]
struct Args {
    /// Unoptimized IR dump (.ll or .bc)
    #[arg(long, value_name = "FILE")]
    ir: PathBuf,

    /// Host-optimized IR dump, required by `--pipeline default`
    #[arg(long, value_name = "FILE")]
    ir_optimized: Option<PathBuf>,

    /// Function to analyze, optionally qualified (`Main.sum`)
    #[arg(long, value_name = "NAME")]
    function: String,

    /// Argument types of the specialization
    #[arg(long, value_name = "TYPE", num_args = 1..)]
    signature: Vec<String>,

    /// Target microarchitecture (HSW, BDW, SKL, SKX)
    #[arg(long, value_name = "TAG", default_value = "SKL")]
    arch: Microarchitecture,

    /// Optimization pipeline [default: `default` with --ir-optimized, `standard` otherwise]
    #[arg(long, value_enum)]
    pipeline: Option<PipelineChoice>,

    /// Optimization level for the standard pipeline (overrides IACA_OPT_LEVEL)
    #[arg(long, value_name = "N")]
    opt_level: Option<OptLevel>,

    /// Analyzer executable (overrides IACA_PATH)
    #[arg(long, value_name = "PATH")]
    analyzer: Option<PathBuf>,

    /// Extra target features, e.g. `+avx2,-fma`
    #[arg(long, value_name = "FEATURES", default_value = "")]
    cpu_features: String,

    /// Keep a copy of the emitted object file
    #[arg(long, value_name = "FILE")]
    emit: Option<PathBuf>,

    /// Print session statistics to stderr
    #[arg(long, action = clap::ArgAction::SetTrue)]
    stats: bool,
}

fn config_from(args: &Args) -> Result<AnalyzerConfig, AnalysisError> {
    // Flags win over the environment, including an empty IACA_PATH.
    let lookup = |key: &str| -> Option<OsString> {
        match key {
            IACA_PATH_ENV if args.analyzer.is_some() => None,
            IACA_OPT_LEVEL_ENV if args.opt_level.is_some() => None,
            _ => env::var_os(key),
        }
    };

    let mut config = AnalyzerConfig::from_lookup(lookup)?;
    if let Some(analyzer) = &args.analyzer {
        config = config.with_analyzer(AnalyzerPath::new(analyzer.clone())?);
    }
    if let Some(level) = args.opt_level {
        config = config.with_opt_level(level);
    }
    config.cpu_features = args.cpu_features.clone();
    Ok(config)
}

fn run(args: Args) -> Result<i32, AnalysisError> {
    let config = config_from(&args)?;

    let mut provider = FileIrProvider::new(&args.ir);
    if let Some(optimized) = &args.ir_optimized {
        provider = provider.with_optimized(optimized);
    }

    // The host default needs the host-optimized dump; the provider rejects it otherwise.
    let choice = args.pipeline.unwrap_or(match args.ir_optimized {
        Some(_) => PipelineChoice::Default,
        None => PipelineChoice::Standard,
    });
    let pipeline = match choice {
        PipelineChoice::Default => Pipeline::HostDefault,
        PipelineChoice::Standard => Pipeline::standard(),
    };

    let mut request = AnalysisRequest::new(args.function.as_str(), Signature::new(args.signature.iter().cloned()))
        .arch(args.arch)
        .pipeline(pipeline);
    if let Some(emit) = &args.emit {
        request = request.emit_object(emit);
    }

    let outcome = analyze_with_config(&provider, request, &config)?;
    if args.stats {
        eprintln!("{outcome}");
    }
    Ok(outcome.exit_code)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                AnalysisError::AnalyzerFailed { code: Some(code) } => {
                    ExitCode::from(u8::try_from(code).unwrap_or(1))
                }
                AnalysisError::Config(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
