// This module holds the per-invocation configuration of the driver. AnalyzerConfig bundles
// everything that used to be process-wide mutable state: the analyzer executable path, the
// optimization level used by the standard pipeline, extra CPU features for the target
// machine and an optional root directory for scratch space. Configuration is captured once
// at the start of an analysis and passed down explicitly, so changing the environment
// between calls never affects an analysis that is already running. The environment
// variables IACA_PATH and IACA_OPT_LEVEL are read through a lookup closure, which keeps
// the unset/empty distinction for IACA_PATH testable without touching the real process
// environment.

//! Explicit per-analysis configuration.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use inkwell::OptimizationLevel;

use super::error::ConfigError;

/// Environment variable overriding the analyzer executable.
pub const IACA_PATH_ENV: &str = "IACA_PATH";

/// Environment variable overriding the standard pipeline's optimization level.
pub const IACA_OPT_LEVEL_ENV: &str = "IACA_OPT_LEVEL";

/// Analyzer executable used when `IACA_PATH` is unset, resolved through `PATH`.
pub const DEFAULT_ANALYZER: &str = "iaca";

/// Path to the external analyzer. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerPath(PathBuf);

impl AnalyzerPath {
    /// Validate an explicitly supplied analyzer path.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::checked(path.into(), "configuration")
    }

    /// Resolve from the value of `IACA_PATH`: unset falls back to [`DEFAULT_ANALYZER`],
    /// set-but-empty is an error.
    pub fn from_env_value(value: Option<OsString>) -> Result<Self, ConfigError> {
        match value {
            None => Ok(Self::default()),
            Some(value) => Self::checked(PathBuf::from(value), IACA_PATH_ENV),
        }
    }

    fn checked(path: PathBuf, source_name: &'static str) -> Result<Self, ConfigError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyAnalyzerPath { source_name });
        }
        Ok(Self(path))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl Default for AnalyzerPath {
    fn default() -> Self {
        Self(PathBuf::from(DEFAULT_ANALYZER))
    }
}

impl fmt::Display for AnalyzerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Optimization level 0-3 for the standard pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OptLevel(u8);

impl OptLevel {
    pub const O0: OptLevel = OptLevel(0);
    pub const O1: OptLevel = OptLevel(1);
    pub const O2: OptLevel = OptLevel(2);
    pub const O3: OptLevel = OptLevel(3);

    pub fn new(level: u8) -> Result<Self, ConfigError> {
        if level > 3 {
            return Err(ConfigError::InvalidOptLevel {
                value: level.to_string(),
            });
        }
        Ok(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The new-pass-manager pipeline name, e.g. `default<O2>`.
    pub fn pipeline(self) -> String {
        format!("default<O{}>", self.0)
    }

    /// Code generation level for the target machine.
    pub fn codegen_level(self) -> OptimizationLevel {
        match self.0 {
            0 => OptimizationLevel::None,
            1 => OptimizationLevel::Less,
            2 => OptimizationLevel::Default,
            _ => OptimizationLevel::Aggressive,
        }
    }
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::O2
    }
}

impl FromStr for OptLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('O').unwrap_or(trimmed);
        digits
            .parse::<u8>()
            .ok()
            .and_then(|level| OptLevel::new(level).ok())
            .ok_or_else(|| ConfigError::InvalidOptLevel {
                value: s.to_string(),
            })
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// Configuration captured at the start of an analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    /// External analyzer executable.
    pub analyzer: AnalyzerPath,
    /// Level used by the standard optimization pipeline.
    pub opt_level: OptLevel,
    /// Extra target features, e.g. `+avx2`. Empty uses the CPU's defaults.
    pub cpu_features: String,
    /// Directory in which scratch directories are created. `None` uses the system temp dir.
    pub scratch_root: Option<PathBuf>,
}

impl AnalyzerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var_os(key))
    }

    /// Read configuration through `lookup`, which stands in for `std::env::var_os`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let analyzer = AnalyzerPath::from_env_value(lookup(IACA_PATH_ENV))?;
        let opt_level = match lookup(IACA_OPT_LEVEL_ENV) {
            Some(raw) => raw.to_string_lossy().parse()?,
            None => OptLevel::default(),
        };

        log::debug!("analyzer = {analyzer}, opt level = {opt_level}");

        Ok(Self {
            analyzer,
            opt_level,
            ..Self::default()
        })
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerPath) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn unset_analyzer_path_falls_back_to_iaca() {
        let config = AnalyzerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.analyzer.as_path(), Path::new("iaca"));
        assert_eq!(config.opt_level, OptLevel::O2);
    }

    #[test]
    fn empty_analyzer_path_is_rejected() {
        let err = AnalyzerConfig::from_lookup(lookup(&[(IACA_PATH_ENV, "")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyAnalyzerPath {
                source_name: IACA_PATH_ENV
            }
        );
    }

    #[test]
    fn analyzer_path_override() {
        let config =
            AnalyzerConfig::from_lookup(lookup(&[(IACA_PATH_ENV, "/opt/iaca/bin/iaca")])).unwrap();
        assert_eq!(config.analyzer.as_path(), Path::new("/opt/iaca/bin/iaca"));
    }

    #[test]
    fn opt_level_from_env() {
        let config = AnalyzerConfig::from_lookup(lookup(&[(IACA_OPT_LEVEL_ENV, "3")])).unwrap();
        assert_eq!(config.opt_level, OptLevel::O3);

        let err = AnalyzerConfig::from_lookup(lookup(&[(IACA_OPT_LEVEL_ENV, "4")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOptLevel { .. }));
    }

    #[test]
    fn opt_level_parsing() {
        assert_eq!("O1".parse::<OptLevel>(), Ok(OptLevel::O1));
        assert_eq!(" 0 ".parse::<OptLevel>(), Ok(OptLevel::O0));
        assert!("fast".parse::<OptLevel>().is_err());
        assert_eq!(OptLevel::O3.pipeline(), "default<O3>");
    }

    #[test]
    fn explicit_empty_path_is_rejected() {
        assert!(AnalyzerPath::new("").is_err());
    }
}
