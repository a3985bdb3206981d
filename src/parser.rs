//! Turns a token stream into the task list handed to the execution
//! engine, enforcing the line grammar: a line is either one pipeline or
//! several `;`-sequenced single commands, optionally ending in `&`.

use thiserror::Error;

use crate::lexer::Token;
use crate::task::{CommandLine, Job, Task};

/// The keyword that marks the command after it for usage reporting.
pub const TIME_KEYWORD: &str = "timeX";

/// Errors that can occur while building the task list.
///
/// Every variant is a user-facing diagnostic; the offending line is
/// discarded and never reaches the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A `|` at a line edge or two of them in a row.
    #[error("syntax error near '|'")]
    PipeSyntax,
    /// A line cannot both pipe and sequence; the two partition input
    /// into incompatible shapes.
    #[error("cannot mix '|' and ';' on one line")]
    MixedSeparators,
    /// `&` marks the whole line and is only meaningful as its last token.
    #[error("'&' is only allowed at the end of the line")]
    MisplacedBackground,
    /// `timeX` must be followed by the command it measures.
    #[error("\"timeX\" cannot be a standalone command")]
    StandaloneTime,
    /// More stages than the configured bound.
    #[error("too many commands on one line (limit is {0})")]
    TooManyStages(usize),
    /// Operators with nothing to run, e.g. a bare `&`.
    #[error("empty command")]
    EmptyTask,
}

/// Parse one line's tokens into a [`CommandLine`].
///
/// An empty token stream is a no-op and yields an empty command list.
pub fn parse(tokens: &[Token], max_stages: usize) -> Result<CommandLine, ParseError> {
    if tokens.is_empty() {
        return Ok(CommandLine::default());
    }

    let (tokens, background) = match tokens.split_last() {
        Some((Token::AmpOp, rest)) => (rest, true),
        _ => (tokens, false),
    };
    if tokens.contains(&Token::AmpOp) {
        return Err(ParseError::MisplacedBackground);
    }

    let has_pipe = tokens.contains(&Token::PipeOp);
    let has_seq = tokens.contains(&Token::SeqOp);
    if has_pipe && has_seq {
        return Err(ParseError::MixedSeparators);
    }

    if has_pipe {
        let mut tasks = Vec::new();
        for segment in tokens.split(|t| *t == Token::PipeOp) {
            match build_task(segment, true, background)? {
                Some(task) => tasks.push(task),
                // an empty stage means a pipe at an edge or two in a row
                None => return Err(ParseError::PipeSyntax),
            }
        }
        if tasks.len() > max_stages {
            return Err(ParseError::TooManyStages(max_stages));
        }
        return Ok(CommandLine {
            jobs: vec![Job { tasks, background }],
        });
    }

    let mut jobs = Vec::new();
    for segment in tokens.split(|t| *t == Token::SeqOp) {
        if let Some(task) = build_task(segment, false, background)? {
            jobs.push(Job {
                tasks: vec![task],
                background,
            });
        }
    }
    if jobs.len() > max_stages {
        return Err(ParseError::TooManyStages(max_stages));
    }
    if background && jobs.is_empty() {
        return Err(ParseError::EmptyTask);
    }
    Ok(CommandLine { jobs })
}

/// Build one task out of a word segment. Leading `timeX` keywords are
/// consumed into the `timed` flag; an empty segment yields `None` so the
/// caller can decide whether that is legal in context.
fn build_task(
    segment: &[Token],
    piped: bool,
    background: bool,
) -> Result<Option<Task>, ParseError> {
    let mut words: &[Token] = segment;
    let mut timed = false;
    while let Some((Token::Word(first), rest)) = words.split_first() {
        if first != TIME_KEYWORD {
            break;
        }
        timed = true;
        words = rest;
    }

    let argv: Vec<String> = words
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.clone()),
            _ => None,
        })
        .collect();

    if argv.is_empty() {
        return if timed {
            Err(ParseError::StandaloneTime)
        } else {
            Ok(None)
        };
    }
    Ok(Some(Task {
        argv,
        timed,
        background,
        piped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::split_into_tokens;

    const LIMIT: usize = 10;

    fn parse_line(line: &str) -> Result<CommandLine, ParseError> {
        parse(&split_into_tokens(line), LIMIT)
    }

    #[test]
    fn test_single_command() {
        let cl = parse_line("echo hello world").unwrap();
        assert_eq!(cl.jobs.len(), 1);
        let task = &cl.jobs[0].tasks[0];
        assert_eq!(task.argv, vec!["echo", "hello", "world"]);
        assert!(!task.timed && !task.background && !task.piped);
    }

    #[test]
    fn test_pipeline_sets_piped_on_every_stage() {
        let cl = parse_line("cat f | grep x | wc -l").unwrap();
        assert_eq!(cl.jobs.len(), 1);
        let job = &cl.jobs[0];
        assert_eq!(job.tasks.len(), 3);
        assert!(job.tasks.iter().all(|t| t.piped));
        assert_eq!(job.tasks[2].argv, vec!["wc", "-l"]);
    }

    #[test]
    fn test_consecutive_pipes_rejected() {
        assert_eq!(parse_line("cmd1 | | cmd2"), Err(ParseError::PipeSyntax));
    }

    #[test]
    fn test_pipe_at_line_edges_rejected() {
        assert_eq!(parse_line("| cmd"), Err(ParseError::PipeSyntax));
        assert_eq!(parse_line("cmd |"), Err(ParseError::PipeSyntax));
    }

    #[test]
    fn test_mixing_pipe_and_sequence_rejected() {
        assert_eq!(
            parse_line("cmd1 | cmd2 ; cmd3"),
            Err(ParseError::MixedSeparators)
        );
    }

    #[test]
    fn test_sequenced_commands_become_separate_jobs() {
        let cl = parse_line("true ; false ;").unwrap();
        assert_eq!(cl.jobs.len(), 2);
        assert_eq!(cl.jobs[0].tasks[0].name(), "true");
        assert_eq!(cl.jobs[1].tasks[0].name(), "false");
    }

    #[test]
    fn test_trailing_ampersand_marks_whole_line_background() {
        let cl = parse_line("sleep 1 ; sleep 2 &").unwrap();
        assert_eq!(cl.jobs.len(), 2);
        assert!(cl.jobs.iter().all(|j| j.background));
        assert!(cl.jobs.iter().all(|j| j.tasks[0].background));
    }

    #[test]
    fn test_ampersand_not_at_end_rejected() {
        assert_eq!(
            parse_line("sleep 1 & sleep 2"),
            Err(ParseError::MisplacedBackground)
        );
    }

    #[test]
    fn test_bare_ampersand_rejected() {
        assert_eq!(parse_line("&"), Err(ParseError::EmptyTask));
    }

    #[test]
    fn test_time_keyword_marks_task_and_is_stripped() {
        let cl = parse_line("timeX sleep 1").unwrap();
        let task = &cl.jobs[0].tasks[0];
        assert!(task.timed);
        assert_eq!(task.argv, vec!["sleep", "1"]);
    }

    #[test]
    fn test_time_keyword_inside_pipeline_stage() {
        let cl = parse_line("cat f | timeX wc").unwrap();
        let job = &cl.jobs[0];
        assert!(!job.tasks[0].timed);
        assert!(job.tasks[1].timed);
        assert!(job.timed());
    }

    #[test]
    fn test_standalone_time_keyword_rejected() {
        assert_eq!(parse_line("timeX"), Err(ParseError::StandaloneTime));
        assert_eq!(parse_line("a | timeX"), Err(ParseError::StandaloneTime));
    }

    #[test]
    fn test_stage_limit_enforced() {
        let line = vec!["true"; LIMIT + 1].join(" | ");
        assert_eq!(parse_line(&line), Err(ParseError::TooManyStages(LIMIT)));
        let line = vec!["true"; LIMIT].join(" | ");
        assert!(parse_line(&line).is_ok());
    }

    #[test]
    fn test_empty_line_is_noop() {
        assert_eq!(parse_line(""), Ok(CommandLine::default()));
        assert_eq!(parse_line(" ; ; "), Ok(CommandLine::default()));
    }
}
