//! Configuration loading from config.json
use crate::config::types::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "OIBOX_CONFIG";

const MIB: u64 = 1024 * 1024;

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    pub compiler_path: String,
    pub cpp_standard: String,
    pub optimization_level: String,
    pub timeout_ms: u64,
    pub diagnostics_limit_bytes: u64,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            compiler_path: "g++".to_string(),
            cpp_standard: "c++17".to_string(),
            optimization_level: "-O2".to_string(),
            timeout_ms: 30_000,
            diagnostics_limit_bytes: MIB,
        }
    }
}

/// Administrative maxima that no per-request override may exceed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardCaps {
    pub max_time_ms: u64,
    pub max_memory_mb: u64,
    pub max_output_size: u64,
}

impl Default for HardCaps {
    fn default() -> Self {
        Self {
            max_time_ms: 10_000,
            max_memory_mb: 1024,
            max_output_size: 16 * MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default time ceiling in milliseconds
    pub max_time_ms: u64,
    /// Default memory ceiling in MiB
    pub max_memory_mb: u64,
    /// Default stdout ceiling in bytes
    pub max_output_size: u64,
    /// Extra wall-clock allowance on top of the time ceiling
    pub timeout_grace_ms: u64,
    /// RLIMIT_FSIZE for the child, in MiB
    pub max_file_size_mb: u64,
    /// Attach kernel rlimits to spawned programs
    pub enforce_rlimits: bool,
    pub hard_caps: HardCaps,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_time_ms: 1000,
            max_memory_mb: 256,
            max_output_size: MIB,
            timeout_grace_ms: 1000,
            max_file_size_mb: 64,
            enforce_rlimits: true,
            hard_caps: HardCaps::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    pub gdb_path: String,
    pub timeout_ms: u64,
    pub transcript_limit_bytes: u64,
    /// Address space granted to the debugger on top of the execution
    /// memory ceiling; the inferior inherits the combined limit
    pub memory_headroom_mb: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            timeout_ms: 60_000,
            transcript_limit_bytes: MIB,
            memory_headroom_mb: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Managed temp root; `None` selects the per-user default
    pub temp_dir: Option<PathBuf>,
    /// Age after which `cleanup` prunes generated files
    pub retention_secs: u64,
    /// Audit trail location; `None` selects `<temp root>/audit.log`
    pub audit_log: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            retention_secs: 86_400,
            audit_log: None,
        }
    }
}

/// Full config.json structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compilation: CompilationConfig,
    pub execution: ExecutionConfig,
    pub debugger: DebuggerConfig,
    pub workspace: WorkspaceConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_json(&config_content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Resolve configuration in precedence order: explicit path, then
    /// `$OIBOX_CONFIG`, then `./config.json`, then built-in defaults.
    ///
    /// An explicitly named file that cannot be read is an error; an absent
    /// `./config.json` is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            log::debug!("Loading config from {}", path.display());
            return Self::load_from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            log::debug!("Loading config from ${} = {}", CONFIG_ENV_VAR, path.display());
            return Self::load_from_file(path);
        }

        Self::load_default()
    }

    /// Load ./config.json when present, defaults otherwise
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| EngineError::Config(format!("Failed to get current directory: {}", e)))?
            .join("config.json");

        if !config_path.exists() {
            log::debug!("No config.json in current directory, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    /// Managed temp root this configuration resolves to
    pub fn temp_root(&self) -> PathBuf {
        self.workspace
            .temp_dir
            .clone()
            .unwrap_or_else(default_temp_root)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.workspace
            .audit_log
            .clone()
            .unwrap_or_else(|| self.temp_root().join("audit.log"))
    }
}

/// Per-user default root so that different users never share a tree
pub fn default_temp_root() -> PathBuf {
    #[cfg(unix)]
    let uid = unsafe { libc::geteuid() };
    #[cfg(not(unix))]
    let uid = 0u32;

    std::env::temp_dir().join(format!("oibox-uid-{}", uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.compilation.compiler_path, "g++");
        assert_eq!(config.compilation.cpp_standard, "c++17");
        assert_eq!(config.compilation.timeout_ms, 30_000);
        assert_eq!(config.execution.max_time_ms, 1000);
        assert_eq!(config.execution.max_memory_mb, 256);
        assert_eq!(config.debugger.timeout_ms, 60_000);
        assert!(config.execution.enforce_rlimits);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = EngineConfig::from_json(
            r#"{"execution": {"max_time_ms": 2500}, "compilation": {"cpp_standard": "c++20"}}"#,
        )
        .unwrap();

        assert_eq!(config.execution.max_time_ms, 2500);
        assert_eq!(config.execution.max_memory_mb, 256);
        assert_eq!(config.execution.hard_caps, HardCaps::default());
        assert_eq!(config.compilation.cpp_standard, "c++20");
        assert_eq!(config.compilation.compiler_path, "g++");
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = EngineConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let missing = std::env::temp_dir().join("oibox-definitely-missing-config.json");
        assert!(EngineConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_audit_log_defaults_under_root() {
        let mut config = EngineConfig::default();
        config.workspace.temp_dir = Some(PathBuf::from("/tmp/oibox-test-root"));
        assert_eq!(
            config.audit_log_path(),
            PathBuf::from("/tmp/oibox-test-root/audit.log")
        );
    }

    #[test]
    fn test_default_root_is_per_user() {
        let root = default_temp_root();
        let name = root.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("oibox-uid-"));
    }
}
