//! Child process supervision.
//!
//! Every child runs in its own process group. [`ProcessGuard`] owns the
//! child for its whole life: it waits with a deadline, collects kernel
//! evidence through `wait4`, and SIGKILLs the group on every exit path.

use serde::{Deserialize, Serialize};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What the kernel reported about a reaped child
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExitEvidence {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Peak resident set in KiB, 0 when unavailable
    pub memory_kb: u64,
    /// User plus system CPU time
    pub cpu_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitEvidence),
    DeadlineExceeded,
}

/// Signal escalation report for forced termination paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub kill_sent: bool,
    pub reaped: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// Put the child in a fresh process group so the whole tree can be killed
pub fn isolate_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

pub struct ProcessGuard {
    child: Child,
    pid: u32,
    reaped: bool,
}

impl ProcessGuard {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait until the child exits or `deadline` elapses. On
    /// `DeadlineExceeded` the child is still running and still owned here.
    pub fn wait_with_deadline(&mut self, deadline: Duration) -> std::io::Result<WaitOutcome> {
        let start = Instant::now();
        loop {
            if let Some(evidence) = self.try_reap()? {
                return Ok(WaitOutcome::Exited(evidence));
            }
            if start.elapsed() >= deadline {
                return Ok(WaitOutcome::DeadlineExceeded);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// SIGKILL the group (falling back to the pid) and reap within
    /// `reap_timeout`.
    pub fn kill_and_reap(&mut self, reap_timeout: Duration) -> KillReport {
        let mut report = KillReport::default();
        let start = Instant::now();

        if !self.reaped {
            self.kill_tree(&mut report);
            report.kill_sent = true;

            while start.elapsed() < reap_timeout {
                match self.try_reap() {
                    Ok(Some(_)) => break,
                    Ok(None) => std::thread::sleep(POLL_INTERVAL),
                    Err(e) => {
                        report.notes.push(format!("reap failed: {}", e));
                        break;
                    }
                }
            }
        }

        report.reaped = self.reaped;
        report.waited_ms = start.elapsed().as_millis() as u64;
        if !report.reaped {
            log::error!(
                "pid {} not reaped within {:?} after SIGKILL",
                self.pid,
                reap_timeout
            );
        }
        report
    }

    #[cfg(unix)]
    fn kill_tree(&mut self, report: &mut KillReport) {
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.pid as i32);
        if let Err(e) = killpg(pid, Signal::SIGKILL) {
            report.notes.push(format!("group SIGKILL fallback used: {}", e));
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                report.notes.push(format!("SIGKILL failed: {}", e));
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_tree(&mut self, report: &mut KillReport) {
        if let Err(e) = self.child.kill() {
            report.notes.push(format!("kill failed: {}", e));
        }
    }

    /// Best-effort sweep of stragglers left in the group by a child that
    /// has already exited.
    #[cfg(unix)]
    fn sweep_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn sweep_group(&self) {}

    #[cfg(unix)]
    fn try_reap(&mut self) -> std::io::Result<Option<ExitEvidence>> {
        if self.reaped {
            return Ok(None);
        }

        let mut status: libc::c_int = 0;
        // SAFETY: zeroed rusage is a valid out-parameter
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: valid pointers; pid belongs to our unreaped child
        let rc = unsafe {
            libc::wait4(
                self.pid as libc::pid_t,
                &mut status,
                libc::WNOHANG,
                &mut usage,
            )
        };

        if rc == 0 {
            return Ok(None);
        }
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }

        self.reaped = true;
        let exit_code = if libc::WIFEXITED(status) {
            Some(libc::WEXITSTATUS(status))
        } else {
            None
        };
        let signal = if libc::WIFSIGNALED(status) {
            Some(libc::WTERMSIG(status))
        } else {
            None
        };

        Ok(Some(ExitEvidence {
            exit_code,
            signal,
            memory_kb: maxrss_kb(usage.ru_maxrss as i64),
            cpu_ms: timeval_ms(&usage.ru_utime) + timeval_ms(&usage.ru_stime),
        }))
    }

    #[cfg(not(unix))]
    fn try_reap(&mut self) -> std::io::Result<Option<ExitEvidence>> {
        if self.reaped {
            return Ok(None);
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.reaped = true;
                Ok(Some(ExitEvidence {
                    exit_code: status.code(),
                    ..ExitEvidence::default()
                }))
            }
            None => Ok(None),
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.reaped {
            self.sweep_group();
        } else {
            let report = self.kill_and_reap(Duration::from_millis(500));
            log::debug!("guard killed pid {} on drop: {:?}", self.pid, report);
        }
    }
}

#[cfg(unix)]
fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec as u64).saturating_mul(1000) + (tv.tv_usec as u64) / 1000
}

/// `ru_maxrss` is KiB on Linux and bytes on macOS
#[cfg(unix)]
fn maxrss_kb(raw: i64) -> u64 {
    let raw = raw.max(0) as u64;
    if cfg!(target_os = "macos") {
        raw / 1024
    } else {
        raw
    }
}

/// Whether a process with this pid is still present and not a zombie
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .and_then(|(_, rest)| rest.chars().next())
            .map(|state| state != 'Z' && state != 'X')
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
