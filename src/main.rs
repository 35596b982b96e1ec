mod cli;
mod repl;
mod runner;

use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match cli::parse_args(std::env::args().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            print!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("pydbg: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match runner::run_debugger(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("pydbg: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
