//! Effective ceilings and their kernel enforcement.
//!
//! Per-request overrides are merged over configured defaults and clamped to
//! the administrative hard caps. On Unix the result is attached to the child
//! as rlimits in a `pre_exec` hook; elsewhere the limiter reports
//! `Unsupported` and only the wall-clock and output ceilings hold.

use crate::config::loader::ExecutionConfig;
use crate::config::types::{LimitEnforcement, LimitOverride, ResourceLimits};
use crate::utils::output::min_output_limit;
use std::process::Command;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Limits resolved for one request, plus notes on every override that was
/// not taken verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub limits: ResourceLimits,
    pub adjustments: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ResourceLimiter {
    config: ExecutionConfig,
}

impl ResourceLimiter {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn defaults(&self) -> ResourceLimits {
        ResourceLimits {
            time_ms: self.config.max_time_ms,
            memory_bytes: self.config.max_memory_mb.saturating_mul(MIB),
            output_bytes: self.config.max_output_size,
        }
    }

    /// Merge `request` over the defaults field by field.
    pub fn effective_limits(&self, request: &LimitOverride) -> EffectiveLimits {
        let caps = &self.config.hard_caps;
        let mut adjustments = Vec::new();

        let time_ms = resolve(
            "time_limit_ms",
            request.time_limit_ms,
            self.config.max_time_ms,
            caps.max_time_ms,
            &mut adjustments,
        );
        let memory_mb = resolve(
            "memory_limit_mb",
            request.memory_limit_mb,
            self.config.max_memory_mb,
            caps.max_memory_mb,
            &mut adjustments,
        );
        let mut output_bytes = resolve(
            "output_limit_bytes",
            request.output_limit_bytes,
            self.config.max_output_size,
            caps.max_output_size,
            &mut adjustments,
        );

        if output_bytes < min_output_limit() {
            adjustments.push(format!(
                "output_limit_bytes={} raised to minimum {}",
                output_bytes,
                min_output_limit()
            ));
            output_bytes = min_output_limit();
        }

        for note in &adjustments {
            log::info!("limit override adjusted: {}", note);
        }

        EffectiveLimits {
            limits: ResourceLimits {
                time_ms,
                memory_bytes: memory_mb.saturating_mul(MIB),
                output_bytes,
            },
            adjustments,
        }
    }

    /// Forced-kill deadline: the time ceiling plus the grace margin. The
    /// ceiling itself is judged by the classifier from observed wall time.
    pub fn wall_deadline(&self, limits: &ResourceLimits) -> Duration {
        Duration::from_millis(limits.time_ms.saturating_add(self.config.timeout_grace_ms))
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.config.max_file_size_mb.saturating_mul(MIB)
    }

    /// Attach kernel ceilings to `cmd` before it is spawned.
    pub fn apply(&self, cmd: &mut Command, limits: &ResourceLimits) -> LimitEnforcement {
        if !self.config.enforce_rlimits {
            return LimitEnforcement::Unsupported {
                reason: "rlimit enforcement disabled by configuration".to_string(),
            };
        }
        self.apply_platform(cmd, limits)
    }

    #[cfg(unix)]
    fn apply_platform(&self, cmd: &mut Command, limits: &ResourceLimits) -> LimitEnforcement {
        use std::os::unix::process::CommandExt;

        let plan = RlimitPlan::for_limits(limits, self.file_size_bytes());
        let controls = plan.describe();

        // SAFETY: the hook only calls getrlimit/setrlimit, both
        // async-signal-safe, and touches no heap state.
        unsafe {
            cmd.pre_exec(move || plan.install());
        }

        LimitEnforcement::Applied { controls }
    }

    #[cfg(not(unix))]
    fn apply_platform(&self, _cmd: &mut Command, _limits: &ResourceLimits) -> LimitEnforcement {
        LimitEnforcement::Unsupported {
            reason: "kernel resource limits are unavailable on this platform".to_string(),
        }
    }
}

fn resolve(
    name: &str,
    requested: Option<u64>,
    default: u64,
    cap: u64,
    adjustments: &mut Vec<String>,
) -> u64 {
    match requested {
        None => default,
        Some(0) => {
            adjustments.push(format!("{}=0 ignored, using default {}", name, default));
            default
        }
        Some(value) if value > cap => {
            adjustments.push(format!("{}={} clamped to hard cap {}", name, value, cap));
            cap
        }
        Some(value) => value,
    }
}

#[cfg(all(unix, target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

/// Concrete rlimit values installed in the child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitPlan {
    pub cpu_soft_secs: u64,
    pub cpu_hard_secs: u64,
    pub address_space_bytes: u64,
    pub file_size_bytes: u64,
}

impl RlimitPlan {
    /// SIGXCPU at the rounded-up ceiling, SIGKILL one second later
    pub fn for_limits(limits: &ResourceLimits, file_size_bytes: u64) -> Self {
        let cpu_soft_secs = limits.cpu_seconds();
        Self {
            cpu_soft_secs,
            cpu_hard_secs: cpu_soft_secs + 1,
            address_space_bytes: limits.memory_bytes,
            file_size_bytes,
        }
    }

    pub fn describe(&self) -> Vec<String> {
        vec![
            format!("RLIMIT_CPU={}s (hard {}s)", self.cpu_soft_secs, self.cpu_hard_secs),
            format!("RLIMIT_AS={}", self.address_space_bytes),
            format!("RLIMIT_FSIZE={}", self.file_size_bytes),
            "RLIMIT_CORE=0".to_string(),
        ]
    }

    /// Runs in the forked child between fork and exec.
    #[cfg(unix)]
    fn install(&self) -> std::io::Result<()> {
        set_limit(libc::RLIMIT_CPU, self.cpu_soft_secs, self.cpu_hard_secs)?;
        set_limit(
            libc::RLIMIT_AS,
            self.address_space_bytes,
            self.address_space_bytes,
        )?;
        set_limit(libc::RLIMIT_FSIZE, self.file_size_bytes, self.file_size_bytes)?;
        set_limit(libc::RLIMIT_CORE, 0, 0)?;
        Ok(())
    }
}

/// setrlimit clamped to the current hard limit, so an unprivileged
/// process never asks to raise it.
#[cfg(unix)]
fn set_limit(resource: RlimitResource, soft: u64, hard: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: valid pointer to a stack rlimit
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let ceiling = current.rlim_max;
    let clamp = |value: u64| -> libc::rlim_t {
        let value = value as libc::rlim_t;
        if ceiling != libc::RLIM_INFINITY && value > ceiling {
            ceiling
        } else {
            value
        }
    };
    let hard = clamp(hard);
    let soft = clamp(soft).min(hard);

    let limit = libc::rlimit {
        rlim_cur: soft,
        rlim_max: hard,
    };
    // SAFETY: valid pointer to a stack rlimit
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> ResourceLimiter {
        ResourceLimiter::new(ExecutionConfig::default())
    }

    #[test]
    fn test_defaults_when_no_override() {
        let effective = limiter().effective_limits(&LimitOverride::default());
        assert_eq!(effective.limits.time_ms, 1000);
        assert_eq!(effective.limits.memory_bytes, 256 * MIB);
        assert_eq!(effective.limits.output_bytes, MIB);
        assert!(effective.adjustments.is_empty());
    }

    #[test]
    fn test_override_field_by_field() {
        let effective = limiter().effective_limits(&LimitOverride {
            time_limit_ms: Some(2500),
            memory_limit_mb: None,
            output_limit_bytes: None,
        });
        assert_eq!(effective.limits.time_ms, 2500);
        assert_eq!(effective.limits.memory_bytes, 256 * MIB);
        assert!(effective.adjustments.is_empty());
    }

    #[test]
    fn test_override_clamped_to_hard_cap() {
        let effective = limiter().effective_limits(&LimitOverride {
            time_limit_ms: Some(60_000),
            memory_limit_mb: Some(1 << 20),
            output_limit_bytes: None,
        });
        assert_eq!(effective.limits.time_ms, 10_000);
        assert_eq!(effective.limits.memory_bytes, 1024 * MIB);
        assert_eq!(effective.adjustments.len(), 2);
        assert!(effective.adjustments[0].contains("clamped"));
    }

    #[test]
    fn test_zero_override_ignored() {
        let effective = limiter().effective_limits(&LimitOverride {
            time_limit_ms: Some(0),
            memory_limit_mb: Some(0),
            output_limit_bytes: Some(0),
        });
        assert_eq!(effective.limits, limiter().defaults());
        assert_eq!(effective.adjustments.len(), 3);
    }

    #[test]
    fn test_tiny_output_override_raised() {
        let effective = limiter().effective_limits(&LimitOverride {
            output_limit_bytes: Some(1),
            ..LimitOverride::default()
        });
        assert_eq!(effective.limits.output_bytes, min_output_limit());
        assert_eq!(effective.adjustments.len(), 1);
    }

    #[test]
    fn test_wall_deadline_includes_grace() {
        let limiter = limiter();
        let limits = limiter.defaults();
        assert_eq!(limiter.wall_deadline(&limits), Duration::from_millis(2000));
    }

    #[test]
    fn test_rlimit_plan_rounds_cpu_up() {
        let limits = ResourceLimits {
            time_ms: 1500,
            memory_bytes: 64 * MIB,
            output_bytes: MIB,
        };
        let plan = RlimitPlan::for_limits(&limits, 8 * MIB);
        assert_eq!(plan.cpu_soft_secs, 2);
        assert_eq!(plan.cpu_hard_secs, 3);
        assert_eq!(plan.address_space_bytes, 64 * MIB);
        assert_eq!(plan.describe().len(), 4);
    }

    #[test]
    fn test_disabled_enforcement_is_reported() {
        let mut config = ExecutionConfig::default();
        config.enforce_rlimits = false;
        let limiter = ResourceLimiter::new(config);
        let mut cmd = Command::new("true");
        let enforcement = limiter.apply(&mut cmd, &limiter.defaults());
        assert!(!enforcement.is_applied());
    }

    #[cfg(unix)]
    #[test]
    fn test_applied_on_unix() {
        let limiter = limiter();
        let mut cmd = Command::new("true");
        match limiter.apply(&mut cmd, &limiter.defaults()) {
            LimitEnforcement::Applied { controls } => {
                assert!(controls.iter().any(|c| c.starts_with("RLIMIT_CPU=1s")));
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }
}
