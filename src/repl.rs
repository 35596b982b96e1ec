use std::path::PathBuf;

use crate::cli::parse_location;

pub(crate) const REPL_HELP: &str = "\
commands:
  c, continue        resume the debuggee
  n, next            step over
  s, step            step into
  f, finish          step out
  pause              interrupt the running debuggee
  b FILE:LINE        set a breakpoint
  clear FILE:LINE    remove a breakpoint
  bt, where          show the stack of the stopped thread
  threads            list threads
  p EXPR             evaluate EXPR in the top frame
  locals             list the variables of the top frame
  q, quit            end the session
";

/// One line typed at the debugger prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Continue,
    Next,
    Step,
    Finish,
    Pause,
    Break(PathBuf, i64),
    Clear(PathBuf, i64),
    Backtrace,
    Threads,
    Print(String),
    Locals,
    Quit,
    Help,
    Empty,
}

pub(crate) fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word {
        "" => ReplCommand::Empty,
        "c" | "continue" => ReplCommand::Continue,
        "n" | "next" => ReplCommand::Next,
        "s" | "step" => ReplCommand::Step,
        "f" | "finish" => ReplCommand::Finish,
        "pause" => ReplCommand::Pause,
        "bt" | "where" => ReplCommand::Backtrace,
        "threads" => ReplCommand::Threads,
        "locals" => ReplCommand::Locals,
        "q" | "quit" => ReplCommand::Quit,
        "h" | "help" => ReplCommand::Help,
        "b" | "break" => {
            let (file, line) = parse_location(rest).map_err(|e| e.to_string())?;
            ReplCommand::Break(file, line)
        }
        "clear" => {
            let (file, line) = parse_location(rest).map_err(|e| e.to_string())?;
            ReplCommand::Clear(file, line)
        }
        "p" | "print" if !rest.is_empty() => ReplCommand::Print(rest.to_string()),
        "p" | "print" => return Err("print needs an expression".to_string()),
        other => return Err(format!("unknown command {other:?}; type help")),
    };
    Ok(command)
}
