//! The startup gate: a one-shot barrier between the parent and the
//! children of a freshly forked job.
//!
//! A child must not reach exec before the parent has published the
//! foreground target, assigned process groups and closed its own pipe
//! descriptor copies — otherwise an interrupt arriving between fork and
//! exec has nowhere to be routed. The gate is a pipe: children block
//! reading it, the parent releases by closing the write side. Release is
//! an EOF broadcast that frees every waiter at once, so the parent
//! cannot leave a child blocked no matter how many stages a job has.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::unistd::pipe;

/// One-shot startup barrier shared across a fork.
#[derive(Debug)]
pub struct StartupGate {
    rd: OwnedFd,
    wr: OwnedFd,
}

impl StartupGate {
    pub fn new() -> Result<Self> {
        let (rd, wr) = pipe().context("failed to create startup gate")?;
        Ok(Self { rd, wr })
    }

    /// Duplicate both ends. In-process tests use this to hold a waiter
    /// and a releaser at the same time; across a fork each process
    /// simply inherits its own copy.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            rd: self.rd.try_clone()?,
            wr: self.wr.try_clone()?,
        })
    }

    /// Block until the gate is released.
    ///
    /// Drops this gate's release end first: a waiter holding it open
    /// would keep itself (and any sibling) from ever seeing the
    /// broadcast.
    pub fn wait(self) -> Result<()> {
        let StartupGate { rd, wr } = self;
        drop(wr);
        block_on_release(rd.as_raw_fd())
    }

    /// Child-side wait after a fork.
    ///
    /// Takes `&self` because a forked child never unwinds back into the
    /// parent's destructors — it either execs or exits — so its
    /// inherited descriptors are closed by hand here.
    pub fn wait_forked(&self) -> Result<()> {
        unsafe {
            libc::close(self.wr.as_raw_fd());
        }
        block_on_release(self.rd.as_raw_fd())
    }

    /// Free every waiting child. Dropping both ends closes the last
    /// write descriptor the parent holds; once each child has also shut
    /// its own copy, every waiter observes EOF.
    pub fn release(self) {}
}

/// An interrupted or failed wait is fatal to the affected child only;
/// the caller reports and exits without disturbing siblings.
fn block_on_release(rd: RawFd) -> Result<()> {
    let mut byte = 0u8;
    let n = unsafe { libc::read(rd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
    if n < 0 {
        return Err(Errno::last()).context("startup gate wait failed");
    }
    Ok(())
}
