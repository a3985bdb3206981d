use anyhow::Result;
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use pipeshell::Interpreter;
use pipeshell::config::ShellConfig;

#[derive(FromArgs)]
/// An interactive shell with pipeline execution, background jobs and
/// per-stage CPU usage reporting.
struct ShellArgs {
    /// prompt printed before each input line
    #[argh(option, default = "pipeshell::config::DEFAULT_PROMPT.to_string()")]
    prompt: String,

    /// maximum number of pipeline stages accepted on one line
    #[argh(option, default = "pipeshell::config::DEFAULT_MAX_STAGES")]
    max_stages: usize,
}

fn main() -> Result<()> {
    let args: ShellArgs = argh::from_env();

    // Diagnostics go to stderr so they never mix with job output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = ShellConfig {
        prompt: args.prompt,
        max_stages: args.max_stages,
    };
    Interpreter::new(config).repl()
}
