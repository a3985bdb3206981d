//! Job orchestration: allocate pipes, fork every stage, release the
//! startup gate, then hand the job to the reaper (or detach it).

use std::ffi::CString;
use std::os::fd::OwnedFd;

use anyhow::Result;
use nix::sys::signal::{Signal, kill};
use nix::unistd::setpgid;

use crate::config::SHELL_NAME;
use crate::context::EngineContext;
use crate::gate::StartupGate;
use crate::launcher;
use crate::pipeline::PipeSet;
use crate::reaper::{self, ProcessHandle};
use crate::task::Job;

/// Launch `job` and, for a foreground job, block until it is fully
/// reaped. Returns the per-process handles: statuses and usage filled in
/// for a foreground job, fork-time only for a background one.
pub fn run_job(ctx: &EngineContext, job: &Job) -> Result<Vec<ProcessHandle>> {
    run_job_with_output(ctx, job, None)
}

/// Like [`run_job`], but redirect the tail stage's stdout to
/// `tail_output`. This is the observation seam tests use to read final
/// pipeline output; interactive runs pass `None` and inherit the
/// shell's stdout.
pub fn run_job_with_output(
    ctx: &EngineContext,
    job: &Job,
    tail_output: Option<OwnedFd>,
) -> Result<Vec<ProcessHandle>> {
    let n = job.tasks.len();

    // Convert and validate every argument vector first; a bad argument
    // aborts the launch before any resource is allocated.
    let argvs: Vec<Vec<CString>> = job
        .tasks
        .iter()
        .map(|t| t.exec_argv())
        .collect::<Result<_>>()?;

    let pipes = PipeSet::new(n.saturating_sub(1))?;
    let gate = StartupGate::new()?;
    let mut handles: Vec<ProcessHandle> = Vec::with_capacity(n);

    for (i, task) in job.tasks.iter().enumerate() {
        match launcher::spawn_stage(task, &argvs[i], i, n, &pipes, &gate, tail_output.as_ref()) {
            Ok(pid) => {
                if job.background {
                    // Detached jobs get their own process group, keyed on
                    // the head's pid, so terminal-generated signals can
                    // never reach them.
                    let pgid = handles.first().map(|h| h.pid).unwrap_or(pid);
                    if let Err(err) = setpgid(pid, pgid) {
                        tracing::debug!(%pid, %err, "setpgid for background job failed");
                    }
                } else if handles.is_empty() {
                    // Head of a foreground job: published before any
                    // further fork so an interrupt arriving mid-launch
                    // still has a target.
                    ctx.foreground.publish(pid);
                }
                tracing::debug!(%pid, command = task.name(), stage = i, pipeline = job.is_pipeline(), "forked");
                handles.push(ProcessHandle::new(pid, task.name().to_string()));
            }
            Err(err) => abort_launch(&handles, err),
        }
    }

    // Parent bookkeeping is done: drop our pipe ends and the output
    // override, then free every child at once. The release is
    // unconditional, whatever the job size — a child left at the gate
    // would deadlock the pipeline.
    drop(pipes);
    drop(tail_output);
    gate.release();

    if job.background {
        tracing::debug!(
            pids = ?handles.iter().map(|h| h.pid.as_raw()).collect::<Vec<_>>(),
            "background job detached"
        );
        return Ok(handles);
    }

    reaper::wait_foreground(ctx, job, &mut handles)?;
    Ok(handles)
}

/// Fork failure mid-launch leaves an inconsistent process tree that
/// cannot be recovered: stop the members launched so far, report, and
/// terminate the shell.
fn abort_launch(handles: &[ProcessHandle], err: anyhow::Error) -> ! {
    for handle in handles {
        let _ = kill(handle.pid, Signal::SIGKILL);
    }
    eprintln!("{SHELL_NAME}: {err:#}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::launcher::EXEC_FAILURE_STATUS;
    use crate::task::Task;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::pipe;
    use std::io::Read;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::{Duration, Instant};

    /// Process-level tests share the set of children of the test binary,
    /// so they run serialized.
    fn lock_children() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    fn ctx() -> EngineContext {
        EngineContext::new(ShellConfig::default())
    }

    fn task(args: &[&str]) -> Task {
        Task {
            argv: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn foreground(stages: &[&[&str]]) -> Job {
        let piped = stages.len() > 1;
        Job {
            tasks: stages
                .iter()
                .map(|args| Task { piped, ..task(args) })
                .collect(),
            background: false,
        }
    }

    #[test]
    fn test_single_command_runs_to_completion() {
        let _lock = lock_children();
        let ctx = ctx();
        let handles = run_job(&ctx, &foreground(&[&["true"]])).unwrap();
        assert_eq!(handles.len(), 1);
        assert!(matches!(handles[0].status, Some(WaitStatus::Exited(_, 0))));
        assert!(ctx.foreground.get().is_none(), "registry cleared after reap");
    }

    #[test]
    fn test_exit_status_of_failing_command_collected() {
        let _lock = lock_children();
        let ctx = ctx();
        let handles = run_job(&ctx, &foreground(&[&["false"]])).unwrap();
        assert!(matches!(handles[0].status, Some(WaitStatus::Exited(_, 1))));
    }

    #[test]
    fn test_pipeline_connects_stage_output_to_next_stage_input() {
        let _lock = lock_children();
        let ctx = ctx();
        let job = foreground(&[&["echo", "hi"], &["wc", "-l"]]);
        let (rd, wr) = pipe().unwrap();
        run_job_with_output(&ctx, &job, Some(wr)).unwrap();
        let mut out = String::new();
        std::fs::File::from(rd).read_to_string(&mut out).unwrap();
        assert_eq!(out.trim(), "1");
    }

    #[test]
    fn test_three_stage_pipeline() {
        let _lock = lock_children();
        let ctx = ctx();
        let job = foreground(&[&["echo", "b\na\nb"], &["sort"], &["uniq"]]);
        let (rd, wr) = pipe().unwrap();
        run_job_with_output(&ctx, &job, Some(wr)).unwrap();
        let mut out = String::new();
        std::fs::File::from(rd).read_to_string(&mut out).unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_unknown_command_fails_child_only() {
        let _lock = lock_children();
        let ctx = ctx();
        let job = foreground(&[&["definitely-not-a-command-acbd18db"]]);
        let handles = run_job(&ctx, &job).unwrap();
        assert!(matches!(
            handles[0].status,
            Some(WaitStatus::Exited(_, EXEC_FAILURE_STATUS))
        ));
    }

    #[test]
    fn test_unknown_stage_does_not_hang_pipeline() {
        let _lock = lock_children();
        let ctx = ctx();
        let job = foreground(&[&["definitely-not-a-command-acbd18db"], &["wc", "-l"]]);
        let (rd, wr) = pipe().unwrap();
        let handles = run_job_with_output(&ctx, &job, Some(wr)).unwrap();
        assert!(matches!(
            handles[0].status,
            Some(WaitStatus::Exited(_, EXEC_FAILURE_STATUS))
        ));
        // the broken head closed its pipe end, so wc saw EOF and counted
        // zero lines instead of blocking
        let mut out = String::new();
        std::fs::File::from(rd).read_to_string(&mut out).unwrap();
        assert_eq!(out.trim(), "0");
    }

    #[test]
    fn test_foreground_blocks_until_child_exits() {
        let _lock = lock_children();
        let ctx = ctx();
        let started = Instant::now();
        run_job(&ctx, &foreground(&[&["sleep", "1"]])).unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_background_job_does_not_block() {
        let _lock = lock_children();
        let ctx = ctx();
        let job = Job {
            tasks: vec![Task {
                background: true,
                ..task(&["sleep", "1"])
            }],
            background: true,
        };
        let started = Instant::now();
        let handles = run_job(&ctx, &job).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(handles[0].status.is_none());
        assert!(
            ctx.foreground.get().is_none(),
            "background job must never be registered as foreground"
        );
        // collect the detached child so it does not leak into other tests
        let _ = nix::sys::wait::waitpid(handles[0].pid, None);
    }

    #[test]
    fn test_timed_job_collects_per_stage_usage() {
        let _lock = lock_children();
        let ctx = ctx();
        let mut job = foreground(&[&["true"], &["wc", "-c"]]);
        job.tasks[0].timed = true;
        let (_rd, wr) = pipe().unwrap();
        let handles = run_job_with_output(&ctx, &job, Some(wr)).unwrap();
        assert_eq!(handles.len(), 2);
        for handle in &handles {
            let usage = handle.usage.expect("usage populated at reap time");
            assert!(usage.user + usage.system < Duration::from_secs(1));
        }
    }
}
