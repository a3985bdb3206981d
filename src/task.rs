//! The data handed from parsing to execution: tasks, jobs and the
//! per-line command list.

use std::ffi::CString;

use anyhow::{Context, Result};

/// One command to execute: the program name plus its arguments, with the
/// per-stage flags the engine acts on.
///
/// `argv[0]` is the executable. The vector is converted to NUL-terminated
/// form only at exec time; see [`Task::exec_argv`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
    /// Program name and arguments, in order.
    pub argv: Vec<String>,
    /// Report CPU usage for this task after it completes.
    pub timed: bool,
    /// Part of a job the shell does not wait for.
    pub background: bool,
    /// Part of a multi-stage pipeline.
    pub piped: bool,
}

impl Task {
    /// The command name, i.e. `argv[0]`.
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Argument vector in the form the exec family expects. The
    /// terminating sentinel is supplied by the exec wrappers themselves;
    /// an argument with an embedded NUL byte cannot be represented and
    /// fails the whole launch before any fork happens.
    pub fn exec_argv(&self) -> Result<Vec<CString>> {
        self.argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes())
                    .with_context(|| format!("argument contains a NUL byte: {arg:?}"))
            })
            .collect()
    }
}

/// What one input line segment launches together: a single task, or a
/// pipeline of several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The stages, in launch order.
    pub tasks: Vec<Task>,
    /// The shell does not wait for this job and never forwards
    /// interrupts to it.
    pub background: bool,
}

impl Job {
    pub fn is_pipeline(&self) -> bool {
        self.tasks.len() > 1
    }

    /// A job is timed when any of its stages asked for usage reporting;
    /// the report then covers every stage.
    pub fn timed(&self) -> bool {
        self.tasks.iter().any(|t| t.timed)
    }
}

/// Everything a single input line expands to. A line is either one
/// pipeline job or several independently-sequenced single-task jobs;
/// the parser guarantees the two shapes never mix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub jobs: Vec<Job>,
}
