use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use pydbg_dap::{encode, DapError, Event, Message, MessageDecoder, Request, Response};
use pydbg_engine::{
    DebugSession, EngineError, EngineState, LaunchConfig, Notification, PrerequisiteCache,
    StopPolicy, DEBUGPY_PACKAGE,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// ── Fake debugpy adapter ────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct Behavior {
    /// Report a breakpoint stop right after the attach response.
    stop_after_attach: bool,
    /// Answer `pause` with a `stopped` event.
    stop_on_pause: bool,
    /// Never answer `disconnect`.
    ignore_disconnect: bool,
    /// Close the connection when this command arrives.
    hang_up_on: Option<&'static str>,
    /// Send an orphan response and a malformed frame after attaching.
    noisy: bool,
    /// Bind every breakpoint one line below the requested one.
    shift_breakpoints: bool,
}

struct Peer {
    stream: TcpStream,
    seq: i64,
}

impl Peer {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn send(&mut self, message: Message) {
        self.stream.write_all(&encode(&message).unwrap()).await.unwrap();
    }

    async fn respond(&mut self, request: &Request, body: Value) {
        let seq = self.next_seq();
        self.send(Message::Response(Response {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: (!body.is_null()).then_some(body),
        }))
        .await;
    }

    async fn event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        self.send(Message::Event(Event {
            seq,
            event: event.into(),
            body: (!body.is_null()).then_some(body),
        }))
        .await;
    }
}

async fn spawn_adapter(behavior: Behavior) -> (u16, JoinHandle<Vec<Request>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(Peer { stream, seq: 0 }, behavior).await
    });
    (port, handle)
}

async fn serve(mut peer: Peer, behavior: Behavior) -> Vec<Request> {
    let mut decoder = MessageDecoder::new();
    let mut seen = Vec::new();
    let mut attach: Option<Request> = None;
    let mut buf = vec![0u8; 4096];

    loop {
        let n = match peer.stream.read(&mut buf).await {
            Ok(0) | Err(_) => return seen,
            Ok(n) => n,
        };
        decoder.feed(&buf[..n]);
        let requests: Vec<Request> = decoder
            .drain()
            .filter_map(|m| match m {
                Ok(Message::Request(r)) => Some(r),
                _ => None,
            })
            .collect();

        for req in requests {
            seen.push(req.clone());
            if behavior.hang_up_on == Some(req.command.as_str()) {
                return seen;
            }
            let args = req.arguments.clone().unwrap_or(Value::Null);
            let command = req.command.clone();
            match command.as_str() {
                "initialize" => {
                    peer.respond(
                        &req,
                        json!({
                            "supportsConfigurationDoneRequest": true,
                            "supportsConditionalBreakpoints": true,
                            "supportsTerminateRequest": true,
                        }),
                    )
                    .await;
                }
                // debugpy answers attach only after configurationDone.
                "attach" => {
                    attach = Some(req);
                    peer.event("initialized", Value::Null).await;
                }
                "setBreakpoints" => {
                    let shift = i64::from(behavior.shift_breakpoints);
                    let breakpoints: Vec<Value> = args["breakpoints"]
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .iter()
                        .enumerate()
                        .map(|(i, bp)| {
                            let line = bp["line"].as_i64().unwrap_or(0) + shift;
                            json!({"id": i + 1, "verified": true, "line": line})
                        })
                        .collect();
                    peer.respond(&req, json!({ "breakpoints": breakpoints })).await;
                }
                "configurationDone" => {
                    peer.respond(&req, Value::Null).await;
                    if let Some(attach) = attach.take() {
                        peer.respond(&attach, Value::Null).await;
                    }
                    peer.event("thread", json!({"reason": "started", "threadId": 1}))
                        .await;
                    peer.event("output", json!({"category": "telemetry", "output": "ptvsd"}))
                        .await;
                    peer.event("output", json!({"category": "stdout", "output": "hello\n"}))
                        .await;
                    if behavior.noisy {
                        peer.send(Message::Response(Response {
                            seq: 900,
                            request_seq: 999,
                            success: true,
                            command: "threads".into(),
                            message: None,
                            body: None,
                        }))
                        .await;
                        peer.stream
                            .write_all(b"Content-Length: 5\r\n\r\n{bad}")
                            .await
                            .unwrap();
                    }
                    if behavior.stop_after_attach {
                        peer.event(
                            "stopped",
                            json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true}),
                        )
                        .await;
                    }
                }
                "pause" => {
                    peer.respond(&req, Value::Null).await;
                    if behavior.stop_on_pause {
                        peer.event("stopped", json!({"reason": "pause", "threadId": 1}))
                            .await;
                    }
                }
                "continue" => {
                    peer.respond(&req, json!({"allThreadsContinued": true})).await;
                }
                "next" | "stepIn" | "stepOut" => {
                    peer.respond(&req, Value::Null).await;
                    peer.event("stopped", json!({"reason": "step", "threadId": 1}))
                        .await;
                }
                "threads" => {
                    peer.respond(&req, json!({"threads": [{"id": 1, "name": "MainThread"}]}))
                        .await;
                }
                "stackTrace" => {
                    peer.respond(
                        &req,
                        json!({
                            "stackFrames": [
                                {"id": 7, "name": "<module>", "line": 3, "column": 1}
                            ],
                            "totalFrames": 1
                        }),
                    )
                    .await;
                }
                "scopes" => {
                    peer.respond(
                        &req,
                        json!({"scopes": [{"name": "Locals", "variablesReference": 11}]}),
                    )
                    .await;
                }
                "variables" => {
                    peer.respond(
                        &req,
                        json!({"variables": [
                            {"name": "x", "value": "1", "type": "int", "variablesReference": 0}
                        ]}),
                    )
                    .await;
                }
                "evaluate" => {
                    peer.respond(&req, json!({"result": "2", "variablesReference": 0}))
                        .await;
                }
                "disconnect" => {
                    if behavior.ignore_disconnect {
                        continue;
                    }
                    peer.event("exited", json!({"exitCode": 0})).await;
                    peer.event("terminated", Value::Null).await;
                    peer.respond(&req, Value::Null).await;
                    return seen;
                }
                _ => peer.respond(&req, Value::Null).await,
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

fn script() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
    writeln!(file, "x = 1\ny = 2\nprint(x + y)").unwrap();
    file
}

fn attach_config(script: &Path, port: u16) -> LaunchConfig {
    LaunchConfig::new("python3", script)
        .attach_only(true)
        .endpoint("127.0.0.1", port)
}

fn state_changes(sink: &[Notification]) -> Vec<EngineState> {
    sink.iter()
        .filter_map(|n| match n {
            Notification::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn position(sink: &[Notification], wanted: &Notification) -> usize {
    sink.iter()
        .position(|n| n == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not in {sink:?}"))
}

fn commands(requests: &[Request]) -> Vec<&str> {
    requests.iter().map(|r| r.command.as_str()).collect()
}

async fn running_session(
    behavior: Behavior,
    config: impl FnOnce(LaunchConfig) -> LaunchConfig,
) -> (DebugSession<Vec<Notification>>, JoinHandle<Vec<Request>>, NamedTempFile) {
    let script = script();
    let (port, adapter) = spawn_adapter(behavior).await;
    let mut session = DebugSession::new(config(attach_config(script.path(), port)), Vec::new());
    session.set_breakpoint(script.path(), 2).unwrap();

    let mut cache = PrerequisiteCache::new();
    session.start(&mut cache).await.unwrap();
    let target = if behavior.stop_after_attach {
        EngineState::InferiorStopOk
    } else {
        EngineState::InferiorRunOk
    };
    // The stdout line follows the attach response and the thread event.
    let ready = |s: &DebugSession<Vec<Notification>>| {
        s.state() == target
            && s.sink()
                .iter()
                .any(|n| matches!(n, Notification::Output { .. }))
    };
    assert!(within(session.run_until(ready)).await);
    (session, adapter, script)
}

// ── Lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn setup_and_run_reach_inferior_run_ok() {
    let (session, adapter, script) = running_session(Behavior::default(), |c| c).await;

    assert_eq!(
        state_changes(session.sink()),
        vec![
            EngineState::EngineSetupOk,
            EngineState::RunRequested,
            EngineState::InferiorRunOk,
        ]
    );
    assert!(session.capabilities().supports_configuration_done_request);
    let bp = &session.breakpoints().get_for_file(script.path())[0];
    assert!(bp.verified);
    assert_eq!(bp.adapter_id, Some(1));

    drop(session);
    let requests = within(adapter).await.unwrap();
    assert_eq!(
        commands(&requests),
        vec!["initialize", "attach", "setBreakpoints", "configurationDone"]
    );
    let init = requests[0].arguments.as_ref().unwrap();
    assert_eq!(init["adapterID"], "python");
    assert_eq!(init["pathFormat"], "path");
    assert_eq!(init["linesStartAt1"], true);
    assert_eq!(requests[1].arguments.as_ref().unwrap()["redirectOutput"], true);
}

#[cfg(unix)]
#[tokio::test]
async fn setup_spawns_adapter_command() {
    // `true` stands in for the interpreter; the fake adapter does the talking.
    let script = script();
    let (port, adapter) = spawn_adapter(Behavior::default()).await;
    let config = LaunchConfig::new("true", script.path()).endpoint("127.0.0.1", port);
    let mut session = DebugSession::new(config, Vec::new());

    let mut cache = PrerequisiteCache::new();
    cache.mark_verified("true", DEBUGPY_PACKAGE);
    session.setup(&mut cache).await.unwrap();
    assert_eq!(session.state(), EngineState::EngineSetupOk);
    session.request_run().unwrap();
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorRunOk)).await);

    session.quit();
    within(session.run_to_completion()).await;
    assert_eq!(session.state(), EngineState::Finished);
    within(adapter).await.unwrap();
}

#[tokio::test]
async fn output_is_forwarded_without_telemetry() {
    let (session, _adapter, _script) = running_session(Behavior::default(), |c| c).await;
    let outputs: Vec<_> = session
        .sink()
        .iter()
        .filter(|n| matches!(n, Notification::Output { .. }))
        .collect();
    assert_eq!(
        outputs,
        vec![&Notification::Output {
            category: "stdout".into(),
            text: "hello\n".into()
        }]
    );
}

#[tokio::test]
async fn quit_while_running_reports_stop_before_dying() {
    let (mut session, adapter, _script) = running_session(Behavior::default(), |c| c).await;

    session.quit();
    let sink = session.sink();
    assert!(
        position(sink, &Notification::StopOk)
            < position(sink, &Notification::StateChanged(EngineState::Dying))
    );

    assert_eq!(within(session.run_to_completion()).await, Some(0));
    assert_eq!(session.state(), EngineState::Finished);
    assert!(session.sink().contains(&Notification::Terminated));
    assert!(session
        .sink()
        .contains(&Notification::Exited { code: 0 }));

    let requests = within(adapter).await.unwrap();
    assert!(!commands(&requests).contains(&"pause"));
    let disconnect = requests.last().unwrap();
    assert_eq!(disconnect.command, "disconnect");
    assert_eq!(disconnect.arguments.as_ref().unwrap()["terminateDebuggee"], true);
}

#[tokio::test]
async fn quit_with_unresponsive_adapter_times_out() {
    let behavior = Behavior {
        ignore_disconnect: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) =
        running_session(behavior, |c| c.disconnect_timeout(Duration::from_millis(100))).await;

    session.quit();
    within(session.run_to_completion()).await;
    assert_eq!(session.state(), EngineState::Finished);
    assert_eq!(session.exit_code(), None);
}

// ── Stopping and stepping ───────────────────────────────────────

#[tokio::test]
async fn interrupt_is_optimistic_by_default() {
    let (mut session, adapter, _script) = running_session(Behavior::default(), |c| c).await;

    session.interrupt_inferior().unwrap();
    assert_eq!(session.state(), EngineState::InferiorStopOk);
    assert_eq!(session.sink().last(), Some(&Notification::StopOk));

    session.quit();
    within(session.run_to_completion()).await;
    let requests = within(adapter).await.unwrap();
    let pause = requests.iter().find(|r| r.command == "pause").unwrap();
    assert_eq!(pause.arguments.as_ref().unwrap()["threadId"], 1);
}

#[tokio::test]
async fn interrupt_acknowledged_waits_for_stopped_event() {
    let behavior = Behavior {
        stop_on_pause: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) =
        running_session(behavior, |c| c.stop_policy(StopPolicy::Acknowledged)).await;

    session.interrupt_inferior().unwrap();
    assert_eq!(session.state(), EngineState::InferiorStopRequested);
    assert!(!session.sink().contains(&Notification::StopOk));

    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorStopOk)).await);
    assert!(session.sink().contains(&Notification::StopOk));
}

#[tokio::test]
async fn late_pause_stop_does_not_undo_continue() {
    let behavior = Behavior {
        stop_on_pause: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) = running_session(behavior, |c| c).await;

    session.interrupt_inferior().unwrap();
    assert_eq!(session.state(), EngineState::InferiorStopOk);
    session.continue_inferior().unwrap();
    assert_eq!(session.state(), EngineState::InferiorRunRequested);

    // pause response, its stopped event, then the continue response.
    assert!(within(session.run_until(|s| s.pending_requests() == 0)).await);
    assert_eq!(session.state(), EngineState::InferiorRunOk);
    let stops = session
        .sink()
        .iter()
        .filter(|n| **n == Notification::StopOk)
        .count();
    assert_eq!(stops, 1);

    // The session still stops normally afterwards.
    session.interrupt_inferior().unwrap();
    assert!(within(session.run_until(|s| s.pending_requests() == 0)).await);
    assert_eq!(session.state(), EngineState::InferiorStopOk);
}

#[tokio::test]
async fn breakpoint_stop_then_step_and_continue() {
    let behavior = Behavior {
        stop_after_attach: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) = running_session(behavior, |c| c).await;
    assert_eq!(session.thread_id(), Some(1));

    session.continue_inferior().unwrap();
    assert_eq!(session.state(), EngineState::InferiorRunRequested);
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorRunOk)).await);
    assert!(matches!(
        session.step_over(),
        Err(EngineError::InvalidState { .. })
    ));

    session.interrupt_inferior().unwrap();
    session.step_over().unwrap();
    assert_eq!(session.state(), EngineState::InferiorRunRequested);
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorStopOk)).await);
    let states = state_changes(session.sink());
    assert!(states.ends_with(&[
        EngineState::InferiorRunRequested,
        EngineState::InferiorRunOk,
        EngineState::InferiorStopOk,
    ]));

    session.step_in().unwrap();
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorStopOk)).await);
    session.step_out().unwrap();
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorStopOk)).await);
}

// ── Inspection ──────────────────────────────────────────────────

#[tokio::test]
async fn inspection_while_stopped() {
    let behavior = Behavior {
        stop_after_attach: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) = running_session(behavior, |c| c).await;

    let reply = session.threads().unwrap();
    let threads: pydbg_dap::ThreadsResponseBody =
        within(session.wait_reply(reply)).await.unwrap().body_as().unwrap();
    assert_eq!(threads.threads[0].name, "MainThread");

    let reply = session.stack_trace(1).unwrap();
    let trace: pydbg_dap::StackTraceResponseBody =
        within(session.wait_reply(reply)).await.unwrap().body_as().unwrap();
    assert_eq!(trace.stack_frames[0].id, 7);
    assert_eq!(trace.stack_frames[0].line, 3);

    let reply = session.scopes(7).unwrap();
    let scopes: pydbg_dap::ScopesResponseBody =
        within(session.wait_reply(reply)).await.unwrap().body_as().unwrap();
    assert_eq!(scopes.scopes[0].name, "Locals");

    let reply = session.variables(scopes.scopes[0].variables_reference).unwrap();
    let vars: pydbg_dap::VariablesResponseBody =
        within(session.wait_reply(reply)).await.unwrap().body_as().unwrap();
    assert_eq!(vars.variables[0].name, "x");
    assert_eq!(vars.variables[0].variable_type.as_deref(), Some("int"));

    let reply = session.evaluate("x + 1", Some(7)).unwrap();
    let value: pydbg_dap::EvaluateResponseBody =
        within(session.wait_reply(reply)).await.unwrap().body_as().unwrap();
    assert_eq!(value.result, "2");
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn breakpoint_added_while_stopped_is_sent() {
    let behavior = Behavior {
        stop_after_attach: true,
        ..Default::default()
    };
    let (mut session, adapter, script) = running_session(behavior, |c| c).await;

    session.set_breakpoint(script.path(), 3).unwrap();
    assert_eq!(session.pending_requests(), 1);
    assert!(within(session.run_until(|s| s.pending_requests() == 0)).await);
    assert!(session
        .breakpoints()
        .get_for_file(script.path())
        .iter()
        .all(|bp| bp.verified));

    session.quit();
    within(session.run_to_completion()).await;
    let requests = within(adapter).await.unwrap();
    let last_set = requests
        .iter()
        .rev()
        .find(|r| r.command == "setBreakpoints")
        .unwrap();
    assert_eq!(
        last_set.arguments.as_ref().unwrap()["breakpoints"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn moved_breakpoints_keep_requested_lines() {
    let behavior = Behavior {
        stop_after_attach: true,
        shift_breakpoints: true,
        ..Default::default()
    };
    let (mut session, _adapter, script) = running_session(behavior, |c| c).await;
    let path = script.path();

    // Two requests for the same file in flight; only the second answer counts.
    session.set_breakpoint(path, 3).unwrap();
    session.set_breakpoint(path, 1).unwrap();
    assert_eq!(session.pending_requests(), 2);
    assert!(within(session.run_until(|s| s.pending_requests() == 0)).await);

    let bps = session.breakpoints().get_for_file(path);
    let lines: Vec<i64> = bps.iter().map(|bp| bp.line).collect();
    let effective: Vec<i64> = bps.iter().map(|bp| bp.effective_line()).collect();
    let ids: Vec<Option<i64>> = bps.iter().map(|bp| bp.adapter_id).collect();
    assert_eq!(lines, vec![1, 2, 3]);
    assert_eq!(effective, vec![2, 3, 4]);
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

    let moved = format!("Breakpoint at {}:1 moved to line 2", path.display());
    assert!(session.sink().contains(&Notification::Info(moved)));

    // Cleared by the line the user asked for.
    assert!(session.remove_breakpoint(path, 2).unwrap());
    assert!(!session.remove_breakpoint(path, 4).unwrap());
}

// ── Faults ──────────────────────────────────────────────────────

#[tokio::test]
async fn adapter_hang_up_fails_pending_requests() {
    let behavior = Behavior {
        stop_after_attach: true,
        hang_up_on: Some("threads"),
        ..Default::default()
    };
    let (mut session, _adapter, _script) = running_session(behavior, |c| c).await;

    let reply = session.threads().unwrap();
    let err = within(session.wait_reply(reply)).await.unwrap_err();
    assert!(matches!(err, EngineError::Dap(DapError::SessionTerminated)));
    assert_eq!(session.state(), EngineState::Finished);
    assert_eq!(session.pending_requests(), 0);
    assert!(state_changes(session.sink()).ends_with(&[EngineState::Dying, EngineState::Finished]));
}

#[tokio::test]
async fn orphans_and_bad_frames_are_survived() {
    let behavior = Behavior {
        noisy: true,
        stop_on_pause: true,
        ..Default::default()
    };
    let (mut session, _adapter, _script) =
        running_session(behavior, |c| c.stop_policy(StopPolicy::Acknowledged)).await;

    // The session keeps working after the noise.
    session.interrupt_inferior().unwrap();
    assert!(within(session.run_until(|s| s.state() == EngineState::InferiorStopOk)).await);
    assert!(!session
        .sink()
        .iter()
        .any(|n| matches!(n, Notification::Error(_))));
}
