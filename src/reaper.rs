//! Waiting on jobs: exit-status collection and per-process resource
//! accounting.

use std::time::Duration;

use anyhow::{Result, bail};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::context::EngineContext;
use crate::signals;
use crate::task::Job;

/// CPU time consumed by one reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub user: Duration,
    pub system: Duration,
}

impl Usage {
    pub const ZERO: Usage = Usage {
        user: Duration::ZERO,
        system: Duration::ZERO,
    };

    fn from_rusage(ru: &libc::rusage) -> Self {
        Self {
            user: timeval_duration(ru.ru_utime),
            system: timeval_duration(ru.ru_stime),
        }
    }
}

fn timeval_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1_000)
}

/// Fork-time record of one launched process; status and usage are filled
/// in when the process is reaped.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: Pid,
    pub command: String,
    pub status: Option<WaitStatus>,
    pub usage: Option<Usage>,
}

impl ProcessHandle {
    pub fn new(pid: Pid, command: String) -> Self {
        Self {
            pid,
            command,
            status: None,
            usage: None,
        }
    }

    /// One usage-report line: pid, command name, user and system CPU
    /// seconds with fractional precision.
    pub fn usage_line(&self) -> String {
        let usage = self.usage.unwrap_or(Usage::ZERO);
        format!(
            "(PID){}  (CMD){}  (user){:.2} s  (sys){:.2} s",
            self.pid,
            self.command,
            usage.user.as_secs_f64(),
            usage.system.as_secs_f64()
        )
    }
}

/// Wait for every member of a foreground job in launch order, then clear
/// the foreground registry and emit usage lines if the job was timed.
pub fn wait_foreground(
    ctx: &EngineContext,
    job: &Job,
    handles: &mut [ProcessHandle],
) -> Result<()> {
    let members: Vec<Pid> = handles.iter().map(|h| h.pid).collect();
    let mut result = Ok(());
    for handle in handles.iter_mut() {
        match wait_stage(ctx, &members, handle.pid) {
            Ok((status, usage)) => {
                tracing::debug!(pid = %handle.pid, ?status, "reaped foreground child");
                handle.status = Some(status);
                handle.usage = Some(usage);
            }
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }
    ctx.foreground.clear();
    result?;

    if job.timed() {
        for handle in handles.iter() {
            println!("{}", handle.usage_line());
        }
    }
    Ok(())
}

/// Block until `pid` exits or is terminated by a signal, collecting its
/// CPU usage through the child-resource-accounting interface.
///
/// Pending notifications are dispatched before blocking and on every
/// EINTR wakeup, so a signal that lands anywhere between fork and reap
/// is forwarded rather than sitting until the job ends.
fn wait_stage(
    ctx: &EngineContext,
    members: &[Pid],
    pid: Pid,
) -> Result<(WaitStatus, Usage)> {
    loop {
        signals::dispatch_pending(ctx, members);
        let mut status: libc::c_int = 0;
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut ru) };
        if rc == -1 {
            match Errno::last() {
                Errno::EINTR => continue,
                err => bail!("wait for process {pid} failed: {err}"),
            }
        }
        let wait_status = WaitStatus::from_raw(pid, status)?;
        return Ok((wait_status, Usage::from_rusage(&ru)));
    }
}

/// Opportunistically collect any background children that have exited.
///
/// Never blocks, so the main loop cannot stall on a background job; a
/// zombie is cleared by the poll following its termination notification.
pub fn reap_background() {
    loop {
        // -1: any child of the shell
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => tracing::debug!(?status, "reaped background child"),
            Err(Errno::ECHILD) => break,
            Err(err) => {
                tracing::debug!(%err, "background reap stopped");
                break;
            }
        }
    }
}
