//! Shared engine state: the foreground registry and the configuration,
//! threaded explicitly through the launcher, reaper and signal routing.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::unistd::Pid;

use crate::config::ShellConfig;

/// Single-slot registry of the process eligible to receive a forwarded
/// interactive signal. Zero means no foreground job is active.
///
/// This is the only state shared with asynchronously delivered signal
/// handling, so it is a bare atomic scalar — a blocking lock here could
/// deadlock against a handler firing while the main flow holds it.
#[derive(Debug, Default)]
pub struct ForegroundRegistry(AtomicI32);

impl ForegroundRegistry {
    /// Record `pid` as the head of the current foreground job.
    pub fn publish(&self, pid: Pid) {
        self.0.store(pid.as_raw(), Ordering::SeqCst);
    }

    /// Mark that no foreground job is active.
    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<Pid> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }
}

/// Context object passed to the engine components instead of
/// process-global mutable state.
#[derive(Debug)]
pub struct EngineContext {
    pub foreground: ForegroundRegistry,
    pub config: ShellConfig,
}

impl EngineContext {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            foreground: ForegroundRegistry::default(),
            config,
        }
    }
}
