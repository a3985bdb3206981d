//! Built-in commands executed in-process. The only one this shell has is
//! `exit`; everything else is launched through the engine.

use argh::{EarlyExit, FromArgs};

use crate::config::SHELL_NAME;
use crate::task::Job;

#[derive(FromArgs)]
/// Leave the shell. Takes no arguments.
struct Exit {}

const EXIT_NAME: &str = "exit";

/// What built-in dispatch decided about a job.
#[derive(Debug, PartialEq, Eq)]
pub enum BuiltinOutcome {
    /// Not a built-in; hand the job to the engine.
    NotBuiltin,
    /// Handled in-process (possibly by printing a diagnostic); nothing
    /// left to run.
    Handled,
    /// The main loop should terminate.
    ExitRequested,
}

/// Try to handle `job` as a built-in.
///
/// Only a single-task `exit` qualifies. Extra arguments are rejected
/// through the same argument-parsing path the CLI uses and the shell
/// keeps running.
pub fn dispatch(job: &Job) -> BuiltinOutcome {
    let [task] = job.tasks.as_slice() else {
        return BuiltinOutcome::NotBuiltin;
    };
    if task.name() != EXIT_NAME {
        return BuiltinOutcome::NotBuiltin;
    }

    let args: Vec<&str> = task.argv[1..].iter().map(String::as_str).collect();
    match Exit::from_args(&[EXIT_NAME], &args) {
        Ok(Exit {}) => BuiltinOutcome::ExitRequested,
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                eprintln!("{SHELL_NAME}: \"exit\" does not take arguments");
            } else {
                // --help and friends
                print!("{output}");
            }
            BuiltinOutcome::Handled
        }
    }
}
