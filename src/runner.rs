// This module covers everything that happens after optimization: writing the module out as a
// relocatable object and handing it to the external analyzer. Each analysis gets its own
// scratch directory created through tempfile (prefix `iaca-`, under the configured scratch
// root or the system temp dir). The directory is owned by a ScratchDir value and removed when
// that value is dropped, so early returns and errors clean up the same way success does.
//
// The analyzer is run as `<analyzer> -arch <TAG> <object>` with inherited stdio and the caller
// blocked until it exits. A spawn failure (missing or non-executable binary) is reported as
// AnalyzerNotFound with the path that was tried; any unsuccessful exit, including termination
// by a signal, is AnalyzerFailed carrying the exit code when there is one. Freshly written
// executables can briefly fail to spawn with ETXTBSY on some filesystems; that case is retried
// a few times before giving up.

//! Object emission and analyzer invocation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use inkwell::module::Module;
use inkwell::targets::{FileType, TargetMachine};
use tempfile::TempDir;

use crate::core::{AnalysisError, AnalysisResult, AnalyzerPath, Microarchitecture};

/// Name of the object file written into the scratch directory.
pub const OBJECT_FILE_NAME: &str = "a.out";

/// A scratch directory removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, or the system temp dir when `root` is `None`.
    pub fn create(root: Option<&Path>) -> AnalysisResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("iaca-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        log::debug!("scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> AnalysisResult<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// Write `module` as a relocatable object to `<dir>/a.out`.
pub fn emit_object(
    target_machine: &TargetMachine,
    module: &Module<'_>,
    dir: &Path,
) -> AnalysisResult<PathBuf> {
    let path = dir.join(OBJECT_FILE_NAME);
    target_machine
        .write_to_file(module, FileType::Object, &path)
        .map_err(|e| AnalysisError::llvm("object emission", e))?;

    let size = fs::metadata(&path)?.len();
    log::debug!("wrote {} ({size} bytes)", path.display());
    Ok(path)
}

/// Arguments passed to the analyzer for `object`.
pub fn analyzer_args(arch: Microarchitecture, object: &Path) -> Vec<std::ffi::OsString> {
    vec!["-arch".into(), arch.tag().into(), object.as_os_str().to_owned()]
}

fn spawn_and_wait(cmd: &mut Command) -> io::Result<ExitStatus> {
    let mut attempts = 0u32;
    loop {
        match cmd.status() {
            Ok(status) => return Ok(status),
            Err(err) => {
                #[cfg(unix)]
                let should_retry = err.raw_os_error() == Some(26); // ETXTBSY
                #[cfg(not(unix))]
                let should_retry = false;

                if should_retry && attempts < 3 {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10 * attempts as u64));
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// Run the analyzer over `object` and wait for it. Returns the exit code on success.
pub fn run_analyzer(
    analyzer: &AnalyzerPath,
    arch: Microarchitecture,
    object: &Path,
) -> AnalysisResult<i32> {
    let mut cmd = Command::new(analyzer.as_path());
    cmd.args(analyzer_args(arch, object));

    log::info!("running {} -arch {} {}", analyzer, arch.tag(), object.display());
    let status = spawn_and_wait(&mut cmd).map_err(|source| AnalysisError::AnalyzerNotFound {
        path: analyzer.as_path().to_path_buf(),
        source,
    })?;

    if status.success() {
        Ok(status.code().unwrap_or(0))
    } else {
        Err(AnalysisError::AnalyzerFailed {
            code: status.code(),
        })
    }
}
