//! The interactive loop: prompt, read, parse, dispatch.

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::builtin::{self, BuiltinOutcome};
use crate::config::{SHELL_NAME, ShellConfig};
use crate::context::EngineContext;
use crate::engine;
use crate::lexer;
use crate::parser;
use crate::reaper;
use crate::signals;

/// Interactive shell: reads one line per cycle and hands the parsed jobs
/// to the execution engine.
pub struct Interpreter {
    ctx: EngineContext,
    should_exit: bool,
}

impl Interpreter {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            ctx: EngineContext::new(config),
            should_exit: false,
        }
    }

    /// Run the read-eval loop until `exit` or end of input.
    pub fn repl(&mut self) -> Result<()> {
        signals::install()?;
        let mut rl = DefaultEditor::new()?;

        while !self.should_exit {
            self.poll_notifications();
            match rl.readline(&self.ctx.config.prompt) {
                Ok(line) => self.execute_line(&line),
                Err(ReadlineError::Interrupted) => println!("Interrupt!"),
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{SHELL_NAME}: read error: {err}");
                    break;
                }
            }
        }

        println!("{SHELL_NAME}: terminated");
        Ok(())
    }

    /// The defined poll point of the notify pattern: runs between
    /// command cycles, never from a signal handler. Collects finished
    /// background children and prints any notice that arrived while no
    /// job was being waited on.
    fn poll_notifications(&self) {
        signals::dispatch_pending(&self.ctx, &[]);
        if signals::take_child_notification() {
            reaper::reap_background();
        }
    }

    /// Parse and run one input line. Every user-facing error is reported
    /// here, to stderr, and the loop continues.
    fn execute_line(&mut self, line: &str) {
        let tokens = lexer::split_into_tokens(line);
        if tokens.is_empty() {
            return;
        }

        let command_line = match parser::parse(&tokens, self.ctx.config.max_stages) {
            Ok(cl) => cl,
            Err(err) => {
                eprintln!("{SHELL_NAME}: {err}");
                return;
            }
        };

        for job in &command_line.jobs {
            match builtin::dispatch(job) {
                BuiltinOutcome::ExitRequested => {
                    self.should_exit = true;
                    return;
                }
                BuiltinOutcome::Handled => continue,
                BuiltinOutcome::NotBuiltin => {}
            }
            if let Err(err) = engine::run_job(&self.ctx, job) {
                eprintln!("{SHELL_NAME}: {err:#}");
            }
        }
    }
}
