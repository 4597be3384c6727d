//! `analyze` reads its configuration from the environment at call time.
//!
//! Kept in its own test binary with a single test since it mutates the process
//! environment.

#![cfg(unix)]

mod common;

use common::*;
use iaca::core::{IACA_OPT_LEVEL_ENV, IACA_PATH_ENV};
use iaca::{analyze, AnalysisError, AnalysisRequest, ConfigError, Pipeline};
use std::env;
use std::path::Path;

#[test]
fn test_environment_is_read_per_call() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bin = tempfile::tempdir().unwrap();
    let stub = write_stub_analyzer(bin.path(), 0);

    // Set but empty is a configuration error, not a fallback to `iaca`.
    env::set_var(IACA_PATH_ENV, "");
    let err = analyze(
        &sum_of_vector_provider(),
        AnalysisRequest::new("sum_of_vector", vector_signature()),
    )
    .unwrap_err();
    assert!(
        matches!(
            err,
            AnalysisError::Config(ConfigError::EmptyAnalyzerPath { .. })
        ),
        "{err}"
    );

    env::set_var(IACA_OPT_LEVEL_ENV, "fast");
    env::set_var(IACA_PATH_ENV, &stub);
    let err = analyze(
        &sum_of_vector_provider(),
        AnalysisRequest::new("sum_of_vector", vector_signature()),
    )
    .unwrap_err();
    assert!(
        matches!(err, AnalysisError::Config(ConfigError::InvalidOptLevel { .. })),
        "{err}"
    );

    env::set_var(IACA_OPT_LEVEL_ENV, "1");
    let outcome = analyze(
        &sum_of_vector_provider(),
        AnalysisRequest::new("sum_of_vector", vector_signature()).pipeline(Pipeline::standard()),
    )
    .unwrap();
    assert_eq!(outcome.analyzer.as_path(), stub.as_path());
    assert_eq!(recorded_args(bin.path())[1], "SKL");

    // Unset falls back to `iaca` on PATH; with nothing there the spawn fails.
    env::remove_var(IACA_PATH_ENV);
    let empty_path = tempfile::tempdir().unwrap();
    let saved_path = env::var_os("PATH");
    env::set_var("PATH", empty_path.path());
    let err = analyze(
        &sum_of_vector_provider(),
        AnalysisRequest::new("sum_of_vector", vector_signature()).pipeline(Pipeline::standard()),
    )
    .unwrap_err();
    match saved_path {
        Some(path) => env::set_var("PATH", path),
        None => env::remove_var("PATH"),
    }
    match &err {
        AnalysisError::AnalyzerNotFound { path, .. } => assert_eq!(path, Path::new("iaca")),
        other => panic!("unexpected error: {other}"),
    }

    env::remove_var(IACA_OPT_LEVEL_ENV);
}
