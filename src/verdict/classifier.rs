//! Outcome classification
//! Derives the outcome of a run as a pure function of kernel evidence,
//! the judge's own actions and the effective limits.
use crate::config::types::{Outcome, ResourceLimits};
use crate::kernel::process::ExitEvidence;
use serde::{Deserialize, Serialize};

/// Allocation-failure markers emitted by the C++ runtime and libc
const ALLOCATION_MARKERS: &[&str] = &["std::bad_alloc", "Cannot allocate memory", "out of memory"];

#[cfg(unix)]
const SIGKILL: i32 = libc::SIGKILL;
#[cfg(unix)]
const SIGXCPU: i32 = libc::SIGXCPU;
#[cfg(unix)]
const SIGXFSZ: i32 = libc::SIGXFSZ;

#[cfg(not(unix))]
const SIGKILL: i32 = 9;
#[cfg(not(unix))]
const SIGXCPU: i32 = 24;
#[cfg(not(unix))]
const SIGXFSZ: i32 = 25;

/// How the child stopped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The engine killed it at the wall-clock deadline
    WallClockKill,
    /// It exited or was killed by a signal on its own account
    Exited(ExitEvidence),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictActor {
    Judge,
    Kernel,
    Runtime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictCause {
    NormalExit,
    NonzeroExit,
    WallTimeLimit,
    CpuTimeLimit,
    AllocationFailure,
    FileSizeLimit,
    FatalSignal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub actor: VerdictActor,
    pub cause: VerdictCause,
    /// Exit code as reported to callers
    pub exit_code: i32,
    pub signal: Option<i32>,
    /// Elapsed time to report instead of the observed one
    pub reported_elapsed_ms: Option<u64>,
}

/// Verdict classifier - pure function over evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// `wall_ms` is the wall time observed by the judge. The time ceiling
    /// is a hard bound: a child that finished after it is a timeout even
    /// when it beat the forced-kill deadline.
    pub fn classify(
        termination: &Termination,
        wall_ms: u64,
        stderr: &str,
        limits: &ResourceLimits,
    ) -> Verdict {
        let evidence = match termination {
            Termination::WallClockKill => return Self::wall_timeout(Some(SIGKILL), limits),
            Termination::Exited(evidence) => evidence,
        };

        let verdict = Self::classify_exit(evidence, stderr, limits);
        if wall_ms > limits.time_ms && verdict.outcome != Outcome::Timeout {
            return Self::wall_timeout(evidence.signal, limits);
        }
        verdict
    }

    fn classify_exit(evidence: &ExitEvidence, stderr: &str, limits: &ResourceLimits) -> Verdict {
        if let Some(signal) = evidence.signal {
            return Self::classify_signal(signal, evidence, stderr, limits);
        }

        match evidence.exit_code {
            Some(0) => Verdict {
                outcome: Outcome::Ok,
                actor: VerdictActor::Runtime,
                cause: VerdictCause::NormalExit,
                exit_code: 0,
                signal: None,
                reported_elapsed_ms: None,
            },
            Some(code) if has_allocation_marker(stderr) => Verdict {
                outcome: Outcome::ResourceExceeded,
                actor: VerdictActor::Runtime,
                cause: VerdictCause::AllocationFailure,
                exit_code: code,
                signal: None,
                reported_elapsed_ms: None,
            },
            Some(code) => Verdict {
                outcome: Outcome::NonZeroExit,
                actor: VerdictActor::Runtime,
                cause: VerdictCause::NonzeroExit,
                exit_code: code,
                signal: None,
                reported_elapsed_ms: None,
            },
            // Neither exited nor signalled (stopped); treat as abnormal.
            None => Verdict {
                outcome: Outcome::NonZeroExit,
                actor: VerdictActor::Runtime,
                cause: VerdictCause::NonzeroExit,
                exit_code: -1,
                signal: None,
                reported_elapsed_ms: None,
            },
        }
    }

    fn wall_timeout(signal: Option<i32>, limits: &ResourceLimits) -> Verdict {
        Verdict {
            outcome: Outcome::Timeout,
            actor: VerdictActor::Judge,
            cause: VerdictCause::WallTimeLimit,
            exit_code: -1,
            signal,
            reported_elapsed_ms: Some(limits.time_ms),
        }
    }

    fn classify_signal(
        signal: i32,
        evidence: &ExitEvidence,
        stderr: &str,
        limits: &ResourceLimits,
    ) -> Verdict {
        let cpu_limit_ms = limits.cpu_seconds().saturating_mul(1000);
        let cpu_exhausted =
            signal == SIGXCPU || (signal == SIGKILL && evidence.cpu_ms >= cpu_limit_ms);

        if cpu_exhausted {
            return Verdict {
                outcome: Outcome::Timeout,
                actor: VerdictActor::Kernel,
                cause: VerdictCause::CpuTimeLimit,
                exit_code: -1,
                signal: Some(signal),
                reported_elapsed_ms: Some(limits.time_ms),
            };
        }

        let (outcome, actor, cause) = if signal == SIGXFSZ {
            (
                Outcome::ResourceExceeded,
                VerdictActor::Kernel,
                VerdictCause::FileSizeLimit,
            )
        } else if has_allocation_marker(stderr) {
            (
                Outcome::ResourceExceeded,
                VerdictActor::Runtime,
                VerdictCause::AllocationFailure,
            )
        } else {
            (
                Outcome::NonZeroExit,
                VerdictActor::Runtime,
                VerdictCause::FatalSignal,
            )
        };

        Verdict {
            outcome,
            actor,
            cause,
            exit_code: -signal,
            signal: Some(signal),
            reported_elapsed_ms: None,
        }
    }
}

fn has_allocation_marker(stderr: &str) -> bool {
    ALLOCATION_MARKERS.iter().any(|m| stderr.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            time_ms: 1000,
            memory_bytes: 64 * 1024 * 1024,
            output_bytes: 1024 * 1024,
        }
    }

    fn exited(code: i32) -> Termination {
        Termination::Exited(ExitEvidence {
            exit_code: Some(code),
            ..ExitEvidence::default()
        })
    }

    fn signalled(signal: i32, cpu_ms: u64) -> Termination {
        Termination::Exited(ExitEvidence {
            signal: Some(signal),
            cpu_ms,
            ..ExitEvidence::default()
        })
    }

    #[test]
    fn test_classify_ok() {
        let verdict = VerdictClassifier::classify(&exited(0), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Ok);
        assert_eq!(verdict.cause, VerdictCause::NormalExit);
        assert_eq!(verdict.exit_code, 0);
    }

    #[test]
    fn test_classify_nonzero_exit_keeps_code() {
        let verdict = VerdictClassifier::classify(&exited(42), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::NonZeroExit);
        assert_eq!(verdict.exit_code, 42);
    }

    #[test]
    fn test_wall_clock_kill_reports_ceiling() {
        let verdict = VerdictClassifier::classify(&Termination::WallClockKill, 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Timeout);
        assert_eq!(verdict.actor, VerdictActor::Judge);
        assert_eq!(verdict.reported_elapsed_ms, Some(1000));
        assert_eq!(verdict.exit_code, -1);
    }

    #[test]
    fn test_clean_exit_after_ceiling_is_timeout() {
        let verdict = VerdictClassifier::classify(&exited(0), 1700, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Timeout);
        assert_eq!(verdict.cause, VerdictCause::WallTimeLimit);
        assert_eq!(verdict.reported_elapsed_ms, Some(1000));
        assert_eq!(verdict.exit_code, -1);

        let verdict = VerdictClassifier::classify(&exited(0), 1000, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Ok);

        let verdict = VerdictClassifier::classify(&signalled(SIGXCPU, 1000), 1400, "", &limits());
        assert_eq!(verdict.cause, VerdictCause::CpuTimeLimit);
    }

    #[test]
    fn test_sigxcpu_is_timeout() {
        let verdict = VerdictClassifier::classify(&signalled(SIGXCPU, 1000), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Timeout);
        assert_eq!(verdict.cause, VerdictCause::CpuTimeLimit);
        assert_eq!(verdict.reported_elapsed_ms, Some(1000));
    }

    #[test]
    fn test_sigkill_after_cpu_exhaustion_is_timeout() {
        let verdict = VerdictClassifier::classify(&signalled(SIGKILL, 2000), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::Timeout);

        let verdict = VerdictClassifier::classify(&signalled(SIGKILL, 10), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::NonZeroExit);
        assert_eq!(verdict.cause, VerdictCause::FatalSignal);
        assert_eq!(verdict.exit_code, -SIGKILL);
    }

    #[test]
    fn test_bad_alloc_is_resource_exceeded() {
        let stderr = "terminate called after throwing an instance of 'std::bad_alloc'\n";
        let verdict = VerdictClassifier::classify(&signalled(6, 5), 10, stderr, &limits());
        assert_eq!(verdict.outcome, Outcome::ResourceExceeded);
        assert_eq!(verdict.cause, VerdictCause::AllocationFailure);
        assert_ne!(verdict.outcome, Outcome::NonZeroExit);

        let verdict = VerdictClassifier::classify(&exited(1), 10, "out of memory", &limits());
        assert_eq!(verdict.outcome, Outcome::ResourceExceeded);
    }

    #[test]
    fn test_sigxfsz_is_resource_exceeded() {
        let verdict = VerdictClassifier::classify(&signalled(SIGXFSZ, 5), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::ResourceExceeded);
        assert_eq!(verdict.cause, VerdictCause::FileSizeLimit);
    }

    #[test]
    fn test_segfault_is_nonzero_exit() {
        let verdict = VerdictClassifier::classify(&signalled(11, 5), 10, "", &limits());
        assert_eq!(verdict.outcome, Outcome::NonZeroExit);
        assert_eq!(verdict.exit_code, -11);
        assert_eq!(verdict.signal, Some(11));
    }
}
