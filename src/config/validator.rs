// Config validation
// Runs once at engine construction and fails fast with actionable errors

use crate::config::loader::EngineConfig;
use crate::config::types::{EngineError, Result};
use crate::safety::path_guard::contains_shell_metacharacters;
use crate::utils::output::min_output_limit;

const KNOWN_STANDARDS: &[&str] = &[
    "c++98", "c++03", "c++11", "c++14", "c++17", "c++20", "c++23", "gnu++98", "gnu++03",
    "gnu++11", "gnu++14", "gnu++17", "gnu++20", "gnu++23",
];

const KNOWN_OPT_LEVELS: &[&str] = &["-O0", "-O1", "-O2", "-O3", "-Os", "-Og", "-Ofast"];

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup. Any error is fatal; warnings are logged and
/// returned to the caller.
pub fn validate_config(config: &EngineConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_toolchain(config, &mut result);
    validate_workspace(config, &mut result);

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        return Err(EngineError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_limits(config: &EngineConfig, result: &mut ValidationResult) {
    let exec = &config.execution;
    let caps = &exec.hard_caps;

    for (name, value) in [
        ("execution.max_time_ms", exec.max_time_ms),
        ("execution.max_memory_mb", exec.max_memory_mb),
        ("execution.max_output_size", exec.max_output_size),
        ("execution.max_file_size_mb", exec.max_file_size_mb),
        ("execution.hard_caps.max_time_ms", caps.max_time_ms),
        ("execution.hard_caps.max_memory_mb", caps.max_memory_mb),
        ("execution.hard_caps.max_output_size", caps.max_output_size),
        ("compilation.timeout_ms", config.compilation.timeout_ms),
        (
            "compilation.diagnostics_limit_bytes",
            config.compilation.diagnostics_limit_bytes,
        ),
        ("debugger.timeout_ms", config.debugger.timeout_ms),
        (
            "debugger.transcript_limit_bytes",
            config.debugger.transcript_limit_bytes,
        ),
    ] {
        if value == 0 {
            result.add_error(format!("{} cannot be zero", name));
        }
    }

    if exec.max_time_ms > caps.max_time_ms {
        result.add_error(format!(
            "execution.max_time_ms ({}) exceeds hard cap ({})",
            exec.max_time_ms, caps.max_time_ms
        ));
    }
    if exec.max_memory_mb > caps.max_memory_mb {
        result.add_error(format!(
            "execution.max_memory_mb ({}) exceeds hard cap ({})",
            exec.max_memory_mb, caps.max_memory_mb
        ));
    }
    if exec.max_output_size > caps.max_output_size {
        result.add_error(format!(
            "execution.max_output_size ({}) exceeds hard cap ({})",
            exec.max_output_size, caps.max_output_size
        ));
    }

    if exec.max_output_size != 0 && exec.max_output_size < min_output_limit() {
        result.add_error(format!(
            "execution.max_output_size ({}) is too small to hold the truncation marker (minimum {})",
            exec.max_output_size,
            min_output_limit()
        ));
    }

    if !exec.enforce_rlimits {
        result.add_warning(
            "execution.enforce_rlimits is false; only wall-clock and output ceilings apply"
                .to_string(),
        );
    }

    if exec.timeout_grace_ms > exec.max_time_ms.saturating_mul(10).max(10_000) {
        result.add_warning(format!(
            "execution.timeout_grace_ms ({}) is unusually large relative to max_time_ms ({})",
            exec.timeout_grace_ms, exec.max_time_ms
        ));
    }
}

fn validate_toolchain(config: &EngineConfig, result: &mut ValidationResult) {
    let comp = &config.compilation;

    for (name, value) in [
        ("compilation.compiler_path", comp.compiler_path.as_str()),
        ("debugger.gdb_path", config.debugger.gdb_path.as_str()),
    ] {
        if value.trim().is_empty() {
            result.add_error(format!("{} cannot be empty", name));
        } else if contains_shell_metacharacters(value) || value.chars().any(char::is_whitespace) {
            result.add_error(format!("{} contains unsafe characters: {:?}", name, value));
        }
    }

    if !KNOWN_STANDARDS.contains(&comp.cpp_standard.as_str()) {
        result.add_error(format!(
            "compilation.cpp_standard {:?} is not one of {:?}",
            comp.cpp_standard, KNOWN_STANDARDS
        ));
    }

    if !KNOWN_OPT_LEVELS.contains(&comp.optimization_level.as_str()) {
        result.add_error(format!(
            "compilation.optimization_level {:?} is not one of {:?}",
            comp.optimization_level, KNOWN_OPT_LEVELS
        ));
    }
}

fn validate_workspace(config: &EngineConfig, result: &mut ValidationResult) {
    if let Some(ref dir) = config.workspace.temp_dir {
        if !dir.is_absolute() {
            result.add_error(format!("workspace.temp_dir must be absolute path: {:?}", dir));
        }
    }

    if config.workspace.retention_secs == 0 {
        result.add_warning("workspace.retention_secs is zero; cleanup removes every generated file".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_default_config() {
        let config = EngineConfig::default();
        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_zero_time_limit() {
        let mut config = EngineConfig::default();
        config.execution.max_time_ms = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("execution.max_time_ms cannot be zero"));
    }

    #[test]
    fn test_zero_stream_limits() {
        let mut config = EngineConfig::default();
        config.compilation.diagnostics_limit_bytes = 0;
        config.debugger.transcript_limit_bytes = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("compilation.diagnostics_limit_bytes cannot be zero"));
        assert!(err.contains("debugger.transcript_limit_bytes cannot be zero"));
    }

    #[test]
    fn test_default_above_hard_cap() {
        let mut config = EngineConfig::default();
        config.execution.max_memory_mb = 4096;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("exceeds hard cap"));
    }

    #[test]
    fn test_output_limit_must_fit_marker() {
        let mut config = EngineConfig::default();
        config.execution.max_output_size = 8;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("truncation marker"));
    }

    #[test]
    fn test_compiler_path_with_shell_syntax_rejected() {
        let mut config = EngineConfig::default();
        config.compilation.compiler_path = "g++; rm -rf /".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_standard_rejected() {
        let mut config = EngineConfig::default();
        config.compilation.cpp_standard = "c++99".to_string();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("cpp_standard"));
    }

    #[test]
    fn test_unknown_optimization_rejected() {
        let mut config = EngineConfig::default();
        config.compilation.optimization_level = "-O2 -fplugin=evil.so".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_relative_temp_dir_rejected() {
        let mut config = EngineConfig::default();
        config.workspace.temp_dir = Some(PathBuf::from("relative/root"));

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_disabled_rlimits_is_warning() {
        let mut config = EngineConfig::default();
        config.execution.enforce_rlimits = false;

        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("enforce_rlimits")));
    }
}
