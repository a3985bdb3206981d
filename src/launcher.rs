//! Fork/exec of a single job stage. The child half of this module never
//! returns: it rewires its stdio, parks at the startup gate, and execs.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::unistd::{ForkResult, Pid, dup2, execv, execvp, fork};

use crate::config::SHELL_NAME;
use crate::gate::StartupGate;
use crate::pipeline::PipeSet;
use crate::task::Task;

/// Exit status of a child whose exec failed (command missing, not
/// executable, ...). Distinct from any setup failure so the reaper can
/// tell the two apart.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Exit status of a child that failed before exec: stdio rewiring or an
/// interrupted gate wait. Fatal to that child only.
pub const SETUP_FAILURE_STATUS: i32 = 2;

/// Fork one process for `task`, stage `i` of `n`, and return its pid.
///
/// `argv` is the task's argument vector, converted before the fork so
/// the child path does not allocate. A fork failure is the only error
/// returned here; the caller treats it as fatal to the whole shell.
pub fn spawn_stage(
    task: &Task,
    argv: &[CString],
    i: usize,
    n: usize,
    pipes: &PipeSet,
    gate: &StartupGate,
    tail_output: Option<&OwnedFd>,
) -> Result<Pid> {
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => run_child(task, argv, i, n, pipes, gate, tail_output),
    }
}

fn run_child(
    task: &Task,
    argv: &[CString],
    i: usize,
    n: usize,
    pipes: &PipeSet,
    gate: &StartupGate,
    tail_output: Option<&OwnedFd>,
) -> ! {
    if let Err(err) = wire_stdio(i, n, pipes, tail_output) {
        eprintln!("{SHELL_NAME}: '{}': {err:#}", task.name());
        process::exit(SETUP_FAILURE_STATUS);
    }

    // Every engine descriptor this stage does not use must be gone
    // before exec; a surviving write end would block downstream readers
    // forever.
    pipes.close_all_forked();
    if let Some(out) = tail_output {
        unsafe {
            libc::close(out.as_raw_fd());
        }
    }

    if let Err(err) = gate.wait_forked() {
        eprintln!("{SHELL_NAME}: '{}': {err:#}", task.name());
        process::exit(SETUP_FAILURE_STATUS);
    }

    // A name starting with a path separator is taken literally;
    // everything else goes through the execution-path search.
    let err: Errno = if task.name().starts_with('/') {
        execv(argv[0].as_c_str(), argv)
    } else {
        execvp(argv[0].as_c_str(), argv)
    }
    .unwrap_err();

    eprintln!("{SHELL_NAME}: '{}': {}", task.name(), err.desc());
    process::exit(EXEC_FAILURE_STATUS);
}

/// Stage `i`'s stdio: pipe wiring per its pipeline position, plus the
/// optional tail-output override used as an observation seam by tests.
fn wire_stdio(
    i: usize,
    n: usize,
    pipes: &PipeSet,
    tail_output: Option<&OwnedFd>,
) -> Result<()> {
    pipes.redirect_stage(i, n)?;
    if i + 1 == n {
        if let Some(out) = tail_output {
            dup2(out.as_raw_fd(), libc::STDOUT_FILENO)
                .context("failed to redirect tail output")?;
        }
    }
    Ok(())
}
