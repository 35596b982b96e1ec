use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pydbg_config::{load_config, Config, StopPolicySetting};
use pydbg_dap::{
    DapError, EvaluateResponseBody, RetryPolicy, ScopesResponseBody, StackTraceResponseBody,
    ThreadsResponseBody, VariablesResponseBody,
};
use pydbg_engine::{
    DebugSession, EngineError, EngineState, LaunchConfig, Notification, NotificationSink,
    PrerequisiteCache, RemediationAction, StopPolicy,
};
use pydbg_platform::{
    ensure_log_dir, log_level_to_filter, rotate_log_files, DefaultPaths, PlatformPaths,
    DEFAULT_MAX_LOG_FILES, DEFAULT_MAX_LOG_SIZE,
};

use crate::cli::CliArgs;
use crate::repl::{parse_command, ReplCommand, REPL_HELP};

/// Exit code used when the session could not be set up.
const SETUP_FAILED_EXIT: i32 = 1;

/// Load configuration, start logging, and debug the script on a fresh
/// runtime. Returns the process exit code.
pub(crate) fn run_debugger(cli: CliArgs) -> Result<i32> {
    let paths = DefaultPaths::new().context("failed to detect platform paths")?;

    let project_dir = std::env::current_dir().ok();
    let config = load_config(&paths.config_dir(), project_dir.as_deref()).unwrap_or_else(|e| {
        eprintln!("pydbg: config error, using defaults: {e}");
        Config::default()
    });

    let log_path = config.log.file.clone().unwrap_or_else(|| paths.log_file());
    init_logging(&log_path, config.log.level.as_str());
    info!(log = %log_path.display(), "pydbg starting");

    let launch = launch_config(&config, &cli, project_dir);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let code = runtime.block_on(debug(launch, &cli));
    // A blocking stdin read may still be parked on a runtime thread.
    runtime.shutdown_timeout(Duration::from_millis(100));
    code
}

/// Route `tracing` output to `log_path`. `RUST_LOG` overrides the
/// configured level.
fn init_logging(log_path: &Path, level: &str) {
    ensure_log_dir(log_path).ok();
    rotate_log_files(log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).ok();

    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("pydbg: cannot open log file {}: {e}", log_path.display());
            return;
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level_to_filter(level)));

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .with_env_filter(env_filter)
        .init();
}

fn launch_config(config: &Config, cli: &CliArgs, working_dir: Option<PathBuf>) -> LaunchConfig {
    let interpreter = cli
        .python
        .clone()
        .unwrap_or_else(|| config.adapter.interpreter.clone());
    let (host, port, attach_only) = match &cli.attach {
        Some((host, port)) => (host.clone(), *port, true),
        None => (config.adapter.host.clone(), config.adapter.port, false),
    };
    let stop_policy = match config.adapter.stop_policy {
        StopPolicySetting::Optimistic => StopPolicy::Optimistic,
        StopPolicySetting::Acknowledged => StopPolicy::Acknowledged,
    };

    let launch = LaunchConfig::new(interpreter, absolute(&cli.script))
        .args(cli.script_args.iter().cloned())
        .endpoint(host, port)
        .attach_only(attach_only)
        .retry_policy(RetryPolicy {
            interval: config.adapter.connect_interval(),
            max_attempts: config.adapter.connect_attempts,
            ..RetryPolicy::default()
        })
        .stop_policy(stop_policy)
        .disconnect_timeout(config.session.disconnect_timeout())
        .just_my_code(config.session.just_my_code);
    match working_dir {
        Some(dir) => launch.working_dir(dir),
        None => launch,
    }
}

/// debugpy matches breakpoints on absolute paths.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

enum Input {
    Pumped,
    Line(std::io::Result<Option<String>>),
    Interrupt,
}

async fn debug(launch: LaunchConfig, cli: &CliArgs) -> Result<i32> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_notifications(rx, cli.install_missing));

    let mut session = DebugSession::new(launch, tx.clone());
    for (file, line) in &cli.breakpoints {
        session.set_breakpoint(absolute(file), *line)?;
    }

    let mut cache = PrerequisiteCache::new();
    let started = match session.start(&mut cache).await {
        Err(EngineError::MissingDependency {
            interpreter,
            package,
        }) if cli.install_missing => {
            let mut sink = tx.clone();
            RemediationAction::install(interpreter, package)
                .run(&mut sink)
                .await;
            session.retry_setup()?;
            session.start(&mut cache).await
        }
        other => other,
    };
    if let Err(err) = started {
        debug!("session setup failed: {err}");
        drop(session);
        drop(tx);
        printer.await.ok();
        return Ok(SETUP_FAILED_EXIT);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    loop {
        let input = tokio::select! {
            alive = session.pump() => {
                if !alive {
                    break;
                }
                Input::Pumped
            }
            line = lines.next_line(), if stdin_open => Input::Line(line),
            _ = &mut ctrl_c => Input::Interrupt,
        };
        match input {
            Input::Pumped => {}
            Input::Interrupt => {
                ctrl_c = Box::pin(tokio::signal::ctrl_c());
                if session.state() == EngineState::InferiorRunOk {
                    if let Err(err) = session.interrupt_inferior() {
                        eprintln!("pydbg: {err}");
                    }
                } else {
                    session.quit();
                }
            }
            Input::Line(Ok(Some(line))) => match parse_command(&line) {
                Ok(command) => {
                    if let Err(err) = execute(&mut session, command).await {
                        eprintln!("pydbg: {err}");
                    }
                }
                Err(msg) => eprintln!("pydbg: {msg}"),
            },
            Input::Line(Ok(None)) => stdin_open = false,
            Input::Line(Err(err)) => {
                warn!("stdin read failed: {err}");
                stdin_open = false;
            }
        }
    }

    let exit_code = session.exit_code();
    info!(?exit_code, "session finished");
    drop(session);
    drop(tx);
    printer.await.ok();
    Ok(exit_code
        .map(|code| i32::try_from(code).unwrap_or(SETUP_FAILED_EXIT))
        .unwrap_or(0))
}

async fn execute<S: NotificationSink>(
    session: &mut DebugSession<S>,
    command: ReplCommand,
) -> Result<(), EngineError> {
    match command {
        ReplCommand::Continue => session.continue_inferior()?,
        ReplCommand::Next => session.step_over()?,
        ReplCommand::Step => session.step_in()?,
        ReplCommand::Finish => session.step_out()?,
        ReplCommand::Pause => session.interrupt_inferior()?,
        ReplCommand::Break(file, line) => session.set_breakpoint(absolute(&file), line)?,
        ReplCommand::Clear(file, line) => {
            if !session.remove_breakpoint(&absolute(&file), line)? {
                eprintln!("pydbg: no breakpoint at {}:{line}", file.display());
            }
        }
        ReplCommand::Backtrace => {
            for (i, frame) in stack_frames(session).await?.iter().enumerate() {
                let path = frame
                    .source
                    .as_ref()
                    .and_then(|s| s.path.as_deref().or(s.name.as_deref()))
                    .unwrap_or("<unknown>");
                eprintln!("#{i} {} at {path}:{}", frame.name, frame.line);
            }
        }
        ReplCommand::Threads => {
            let reply = session.threads()?;
            let body: ThreadsResponseBody = session
                .wait_reply(reply)
                .await?
                .body_as()
                .map_err(DapError::from)?;
            for thread in body.threads {
                eprintln!("{} {}", thread.id, thread.name);
            }
        }
        ReplCommand::Print(expression) => {
            let frame = stack_frames(session).await?.first().map(|f| f.id);
            let reply = session.evaluate(&expression, frame)?;
            let body: EvaluateResponseBody = session
                .wait_reply(reply)
                .await?
                .body_as()
                .map_err(DapError::from)?;
            eprintln!("{}", body.result);
        }
        ReplCommand::Locals => {
            let Some(frame) = stack_frames(session).await?.first().map(|f| f.id) else {
                eprintln!("pydbg: no stack frame");
                return Ok(());
            };
            let reply = session.scopes(frame)?;
            let scopes: ScopesResponseBody = session
                .wait_reply(reply)
                .await?
                .body_as()
                .map_err(DapError::from)?;
            // debugpy lists "Locals" first.
            let Some(scope) = scopes.scopes.first() else {
                return Ok(());
            };
            let reply = session.variables(scope.variables_reference)?;
            let body: VariablesResponseBody = session
                .wait_reply(reply)
                .await?
                .body_as()
                .map_err(DapError::from)?;
            for variable in body.variables {
                match variable.variable_type {
                    Some(ty) => eprintln!("{} ({ty}) = {}", variable.name, variable.value),
                    None => eprintln!("{} = {}", variable.name, variable.value),
                }
            }
        }
        ReplCommand::Quit => session.quit(),
        ReplCommand::Help => eprint!("{REPL_HELP}"),
        ReplCommand::Empty => {}
    }
    Ok(())
}

async fn stack_frames<S: NotificationSink>(
    session: &mut DebugSession<S>,
) -> Result<Vec<pydbg_dap::StackFrame>, EngineError> {
    let reply = session.stack_trace(session.thread_id().unwrap_or_default())?;
    let body: StackTraceResponseBody = session
        .wait_reply(reply)
        .await?
        .body_as()
        .map_err(DapError::from)?;
    Ok(body.stack_frames)
}

async fn print_notifications(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    install_missing: bool,
) {
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::Output { category, text } if category == "stdout" => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            Notification::Output { text, .. } => eprint!("{text}"),
            Notification::MissingDependency {
                message, action, ..
            } => {
                eprintln!("pydbg: {message}");
                if !install_missing {
                    eprintln!(
                        "pydbg: rerun with --install-missing to run \"{}\" ({})",
                        action.label(),
                        action.args().join(" ")
                    );
                }
            }
            Notification::StateChanged(state) => debug!(?state, "engine state"),
            Notification::StopOk => {
                eprintln!("pydbg: debuggee stopped");
                eprint!("(pydbg) ");
            }
            Notification::Terminated => debug!("adapter terminated the session"),
            other => eprintln!("pydbg: {other}"),
        }
    }
}
