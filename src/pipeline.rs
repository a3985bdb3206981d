//! Pipe allocation and stdio wiring for pipeline jobs.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::unistd::{dup2, pipe};

/// Where a pipeline stage's standard streams come from and go to.
///
/// Each field holds the index of the connecting pipe; `None` means the
/// stream is inherited from the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub stdin: Option<usize>,
    pub stdout: Option<usize>,
}

/// Compute the wiring for stage `i` of an `n`-stage job: the head stage
/// keeps its stdin, the tail keeps its stdout, and interior stages read
/// the previous pipe and fill the next one.
pub fn plan_stage(i: usize, n: usize) -> StagePlan {
    StagePlan {
        stdin: (i > 0).then(|| i - 1),
        stdout: (i + 1 < n).then_some(i),
    }
}

/// The n−1 pipes backing an n-stage pipeline.
///
/// All pipes are created up front, so a creation failure aborts the
/// launch before a single fork happens — the engine never forks a subset
/// of a pipeline. Descriptors are closed wholesale: each child closes
/// every end after rewiring, the parent by dropping the set.
#[derive(Debug)]
pub struct PipeSet {
    pipes: Vec<(OwnedFd, OwnedFd)>,
}

impl PipeSet {
    pub fn new(count: usize) -> Result<Self> {
        let mut pipes = Vec::with_capacity(count);
        for _ in 0..count {
            pipes.push(pipe().context("failed to create pipe")?);
        }
        Ok(Self { pipes })
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn read_end(&self, i: usize) -> RawFd {
        self.pipes[i].0.as_raw_fd()
    }

    pub fn write_end(&self, i: usize) -> RawFd {
        self.pipes[i].1.as_raw_fd()
    }

    /// Child-side rewiring for stage `i` of an `n`-stage job.
    pub fn redirect_stage(&self, i: usize, n: usize) -> Result<()> {
        let plan = plan_stage(i, n);
        if let Some(p) = plan.stdin {
            dup2(self.read_end(p), libc::STDIN_FILENO).context("failed to redirect stdin")?;
        }
        if let Some(p) = plan.stdout {
            dup2(self.write_end(p), libc::STDOUT_FILENO).context("failed to redirect stdout")?;
        }
        Ok(())
    }

    /// Close every pipe end without running drops.
    ///
    /// Used in forked children, which never unwind back into the
    /// parent's destructors; a stale write end left open here would keep
    /// a downstream reader from ever seeing end-of-input.
    pub fn close_all_forked(&self) {
        for (rd, wr) in &self.pipes {
            unsafe {
                libc::close(rd.as_raw_fd());
                libc::close(wr.as_raw_fd());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_head_interior_tail() {
        assert_eq!(plan_stage(0, 3), StagePlan { stdin: None, stdout: Some(0) });
        assert_eq!(plan_stage(1, 3), StagePlan { stdin: Some(0), stdout: Some(1) });
        assert_eq!(plan_stage(2, 3), StagePlan { stdin: Some(1), stdout: None });
    }

    #[test]
    fn test_plan_single_stage_inherits_both_streams() {
        assert_eq!(plan_stage(0, 1), StagePlan { stdin: None, stdout: None });
    }

    #[test]
    fn test_pipes_created_up_front_and_distinct() {
        let set = PipeSet::new(3).unwrap();
        assert_eq!(set.len(), 3);
        let mut fds = Vec::new();
        for i in 0..set.len() {
            fds.push(set.read_end(i));
            fds.push(set.write_end(i));
        }
        assert!(fds.iter().all(|&fd| fd > 2));
        fds.sort_unstable();
        fds.dedup();
        assert_eq!(fds.len(), 6);
    }

    #[test]
    fn test_pipe_carries_data_between_ends() {
        let set = PipeSet::new(1).unwrap();
        let msg = b"ok";
        let wrote = unsafe {
            libc::write(set.write_end(0), msg.as_ptr() as *const libc::c_void, msg.len())
        };
        assert_eq!(wrote, 2);
        let mut buf = [0u8; 2];
        let got = unsafe {
            libc::read(set.read_end(0), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        assert_eq!(got, 2);
        assert_eq!(&buf, msg);
    }
}
