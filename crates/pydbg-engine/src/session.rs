//! The debug session engine.
//!
//! A [`DebugSession`] owns the transport, decoder and protocol client of
//! one session. Host operations validate the current [`EngineState`] and
//! send requests; [`DebugSession::pump`] handles one transport event at a
//! time and turns responses and events into state transitions and
//! [`Notification`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pydbg_dap::{
    AttachRequestArguments, Breakpoint, BreakpointManager, ConnectionState, ContinuedEventBody,
    DapCapabilities, DapError, EvaluateArguments, Event, ExitedEventBody, Inbound, Message,
    MessageDecoder, OutputEventBody, ProtocolClient, ReplyReceiver, Response,
    SetBreakpointsResponseBody, StoppedEventBody, ThreadEventBody, Transport, TransportEvent,
};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

use crate::error::EngineError;
use crate::launch::{LaunchConfig, ADAPTER_ID};
use crate::notify::{Notification, NotificationSink};
use crate::prerequisite::{PrerequisiteCache, RemediationAction, DEBUGPY_PACKAGE};
use crate::state::{EngineState, StopPolicy};

const MISSING_DEBUGPY_MESSAGE: &str =
    "Python Debugging Support is not available. Please install debugpy package.";

/// Thread id used before the adapter has reported any thread.
/// debugpy pauses and resumes all threads whatever id is sent.
const ANY_THREAD: i64 = 0;

#[derive(Debug, Clone, Copy)]
enum Resume {
    Continue,
    StepOver,
    StepIn,
    StepOut,
}

/// One debugging session against a debugpy adapter.
#[derive(Debug)]
pub struct DebugSession<S: NotificationSink> {
    config: LaunchConfig,
    state: EngineState,
    transport: Transport,
    decoder: MessageDecoder,
    client: ProtocolClient,
    capabilities: DapCapabilities,
    breakpoints: BreakpointManager,
    /// `setBreakpoints` seq -> file it was sent for.
    breakpoint_requests: HashMap<i64, PathBuf>,
    /// Latest `setBreakpoints` seq per file; answers to older ones are stale.
    latest_breakpoint_request: HashMap<PathBuf, i64>,
    /// Unanswered `continue`/`next`/`stepIn`/`stepOut`.
    resume_seq: Option<i64>,
    /// A pause was reported stopped before the adapter confirmed it.
    unconfirmed_pause: bool,
    sink: S,
    missing_dependency: bool,
    initialize_sent: bool,
    configured: bool,
    /// A `stopped` event arrived before the attach response.
    early_stop: bool,
    thread_id: Option<i64>,
    exit_code: Option<i64>,
    dying_deadline: Option<Instant>,
}

impl<S: NotificationSink> DebugSession<S> {
    /// Create a session in [`EngineState::SetupRequested`].
    pub fn new(config: LaunchConfig, sink: S) -> Self {
        let transport = Transport::new(config.adapter_endpoint(), config.retry);
        Self {
            config,
            state: EngineState::SetupRequested,
            transport,
            decoder: MessageDecoder::new(),
            client: ProtocolClient::new(ADAPTER_ID),
            capabilities: DapCapabilities::default(),
            breakpoints: BreakpointManager::new(),
            breakpoint_requests: HashMap::new(),
            latest_breakpoint_request: HashMap::new(),
            resume_seq: None,
            unconfirmed_pause: false,
            sink,
            missing_dependency: false,
            initialize_sent: false,
            configured: false,
            early_stop: false,
            thread_id: None,
            exit_code: None,
            dying_deadline: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The launch configuration the session was created with.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Adapter capabilities; all false until `initialize` is answered.
    pub fn capabilities(&self) -> &DapCapabilities {
        &self.capabilities
    }

    /// Breakpoints known to the session, with the adapter's answers applied.
    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Thread of the last stop, or the first thread the adapter reported.
    pub fn thread_id(&self) -> Option<i64> {
        self.thread_id
    }

    /// Exit code from the adapter's `exited` event.
    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    /// State of the adapter transport.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Requests still waiting for the adapter.
    pub fn pending_requests(&self) -> usize {
        self.client.pending_count()
    }

    /// The notification sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the notification sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the session and return its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Check the script and the adapter prerequisite, then start the
    /// adapter transport.
    pub async fn setup(&mut self, cache: &mut PrerequisiteCache) -> Result<(), EngineError> {
        self.require("setup", &[EngineState::SetupRequested])?;

        if !is_readable_file(&self.config.script) {
            let err = EngineError::ScriptUnreadable {
                path: self.config.script.clone(),
            };
            tracing::error!("{err}");
            self.sink.notify(Notification::Error(err.to_string()));
            self.set_state(EngineState::EngineSetupFailed);
            return Err(err);
        }

        // An attached adapter is already running; nothing to check.
        if !self.config.attach_only
            && !cache.check(&self.config.interpreter, DEBUGPY_PACKAGE).await
        {
            tracing::warn!(interpreter = %self.config.interpreter.display(), "debugpy not importable");
            self.sink.notify(Notification::MissingDependency {
                package: DEBUGPY_PACKAGE.to_string(),
                message: MISSING_DEBUGPY_MESSAGE.to_string(),
                action: RemediationAction::install(&self.config.interpreter, DEBUGPY_PACKAGE),
            });
            self.missing_dependency = true;
            self.set_state(EngineState::EngineSetupFailed);
            return Err(EngineError::MissingDependency {
                interpreter: self.config.interpreter.clone(),
                package: DEBUGPY_PACKAGE.to_string(),
            });
        }

        let command = self.config.adapter_command();
        if let Err(err) = self.transport.start(command.as_ref()) {
            tracing::error!("adapter start failed: {err}");
            self.sink.notify(Notification::Error(err.to_string()));
            self.set_state(EngineState::EngineSetupFailed);
            return Err(err.into());
        }
        match &command {
            Some(command) => tracing::info!("debug adapter: {command}"),
            None => tracing::info!(endpoint = %self.transport.endpoint(), "attaching to debug adapter"),
        }
        self.set_state(EngineState::EngineSetupOk);
        Ok(())
    }

    /// Re-arm a session whose setup failed on a missing dependency.
    pub fn retry_setup(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::EngineSetupFailed || !self.missing_dependency {
            return Err(self.invalid("retry_setup"));
        }
        self.missing_dependency = false;
        self.set_state(EngineState::SetupRequested);
        Ok(())
    }

    /// Start the handshake: `initialize`, then `attach`.
    pub fn request_run(&mut self) -> Result<(), EngineError> {
        self.require("request_run", &[EngineState::EngineSetupOk])?;
        self.set_state(EngineState::RunRequested);
        if self.transport.is_running() {
            self.send_initialize()?;
        }
        Ok(())
    }

    /// [`setup`](Self::setup) followed by [`request_run`](Self::request_run).
    pub async fn start(&mut self, cache: &mut PrerequisiteCache) -> Result<(), EngineError> {
        self.setup(cache).await?;
        self.request_run()
    }

    /// Pause the running debuggee.
    pub fn interrupt_inferior(&mut self) -> Result<(), EngineError> {
        self.require("interrupt_inferior", &[EngineState::InferiorRunOk])?;
        self.set_state(EngineState::InferiorStopRequested);
        let thread = self.current_thread();
        self.client.pause(&mut self.transport, thread)?;
        if self.config.stop_policy == StopPolicy::Optimistic {
            self.unconfirmed_pause = true;
            self.notify_stop_ok();
        }
        Ok(())
    }

    /// Resume the stopped debuggee.
    pub fn continue_inferior(&mut self) -> Result<(), EngineError> {
        self.resume("continue_inferior", Resume::Continue)
    }

    /// Step over the current line (`next`).
    pub fn step_over(&mut self) -> Result<(), EngineError> {
        self.resume("step_over", Resume::StepOver)
    }

    /// Step into the call on the current line.
    pub fn step_in(&mut self) -> Result<(), EngineError> {
        self.resume("step_in", Resume::StepIn)
    }

    /// Run until the current function returns.
    pub fn step_out(&mut self) -> Result<(), EngineError> {
        self.resume("step_out", Resume::StepOut)
    }

    fn resume(&mut self, operation: &'static str, kind: Resume) -> Result<(), EngineError> {
        self.require(operation, &[EngineState::InferiorStopOk])?;
        let thread = self.current_thread();
        let writer = &mut self.transport;
        let seq = match kind {
            Resume::Continue => self.client.continue_thread(writer, thread)?,
            Resume::StepOver => self.client.next(writer, thread)?,
            Resume::StepIn => self.client.step_in(writer, thread)?,
            Resume::StepOut => self.client.step_out(writer, thread)?,
        };
        self.resume_seq = Some(seq);
        self.set_state(EngineState::InferiorRunRequested);
        Ok(())
    }

    /// End the session.
    ///
    /// A running debuggee under the optimistic policy is reported stopped
    /// first, without asking the adapter. Calling `quit` again, or after
    /// the session finished or failed setup, does nothing.
    pub fn quit(&mut self) {
        tracing::debug!(state = ?self.state, "quit requested");
        match self.state {
            state if state.is_terminal() || state == EngineState::Dying => return,
            EngineState::InferiorRunOk if self.config.stop_policy == StopPolicy::Optimistic => {
                self.set_state(EngineState::InferiorStopRequested);
                self.notify_stop_ok();
            }
            _ => {}
        }
        self.begin_dying();
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    /// Add a plain line breakpoint.
    pub fn set_breakpoint(&mut self, path: impl Into<PathBuf>, line: i64) -> Result<(), EngineError> {
        self.insert_breakpoint(Breakpoint::new(path.into(), line))
    }

    /// Add or replace a breakpoint, including conditional ones and logpoints.
    pub fn insert_breakpoint(&mut self, breakpoint: Breakpoint) -> Result<(), EngineError> {
        let path = breakpoint.path.clone();
        self.breakpoints.add(breakpoint);
        self.sync_if_configured(&path)
    }

    /// Returns whether a breakpoint was removed.
    pub fn remove_breakpoint(&mut self, path: &Path, line: i64) -> Result<bool, EngineError> {
        let removed = self.breakpoints.remove(path, line);
        if removed {
            self.sync_if_configured(path)?;
        }
        Ok(removed)
    }

    fn sync_if_configured(&mut self, path: &Path) -> Result<(), EngineError> {
        let active = self.configured || self.state.is_inferior_active();
        if active && self.state != EngineState::Dying && self.transport.is_running() {
            self.sync_breakpoints(path)?;
        }
        Ok(())
    }

    fn sync_breakpoints(&mut self, path: &Path) -> Result<(), EngineError> {
        let seq = self.client.set_breakpoints(
            &mut self.transport,
            path,
            self.breakpoints.get_for_file(path),
        )?;
        self.breakpoint_requests.insert(seq, path.to_path_buf());
        self.latest_breakpoint_request.insert(path.to_path_buf(), seq);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Request the debuggee's threads. Only while stopped.
    pub fn threads(&mut self) -> Result<ReplyReceiver, EngineError> {
        self.require("threads", &[EngineState::InferiorStopOk])?;
        Ok(self.client.threads(&mut self.transport).1)
    }

    /// Request the call stack of `thread_id`.
    pub fn stack_trace(&mut self, thread_id: i64) -> Result<ReplyReceiver, EngineError> {
        self.require("stack_trace", &[EngineState::InferiorStopOk])?;
        Ok(self.client.stack_trace(&mut self.transport, thread_id).1)
    }

    /// Request the variable scopes of a stack frame.
    pub fn scopes(&mut self, frame_id: i64) -> Result<ReplyReceiver, EngineError> {
        self.require("scopes", &[EngineState::InferiorStopOk])?;
        Ok(self.client.scopes(&mut self.transport, frame_id).1)
    }

    /// Request the children of a scope or structured variable.
    pub fn variables(&mut self, variables_reference: i64) -> Result<ReplyReceiver, EngineError> {
        self.require("variables", &[EngineState::InferiorStopOk])?;
        Ok(self.client.variables(&mut self.transport, variables_reference).1)
    }

    /// Evaluate `expression` in the REPL context of `frame_id`.
    pub fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<ReplyReceiver, EngineError> {
        self.require("evaluate", &[EngineState::InferiorStopOk])?;
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some("repl".to_string()),
        };
        Ok(self.client.evaluate(&mut self.transport, &args)?.1)
    }

    /// Pump events until `reply` is resolved.
    pub async fn wait_reply(&mut self, mut reply: ReplyReceiver) -> Result<Response, EngineError> {
        loop {
            match reply.try_recv() {
                Ok(result) => return result.map_err(EngineError::from),
                Err(TryRecvError::Closed) => return Err(DapError::SessionTerminated.into()),
                Err(TryRecvError::Empty) => {}
            }
            if !self.pump().await {
                return match reply.try_recv() {
                    Ok(result) => result.map_err(EngineError::from),
                    Err(_) => Err(DapError::SessionTerminated.into()),
                };
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Handle one transport event. Returns `false` when the transport has
    /// nothing more to deliver.
    pub async fn pump(&mut self) -> bool {
        let event = match (self.state, self.dying_deadline) {
            (EngineState::Dying, Some(deadline)) => {
                match tokio::time::timeout_at(deadline, self.transport.next_event()).await {
                    Ok(event) => event,
                    Err(_) => {
                        tracing::warn!("debug adapter did not disconnect in time; killing it");
                        self.dying_deadline = None;
                        self.transport.kill();
                        self.transport.next_event().await
                    }
                }
            }
            _ => self.transport.next_event().await,
        };
        match event {
            Some(event) => {
                self.handle_transport_event(event);
                true
            }
            None => false,
        }
    }

    /// Pump until `done` holds. Returns `false` if the transport ran dry
    /// first.
    pub async fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        loop {
            if done(self) {
                return true;
            }
            if !self.pump().await {
                return done(self);
            }
        }
    }

    /// Pump until the session is finished. Returns the debuggee's exit
    /// code, if the adapter reported one.
    pub async fn run_to_completion(&mut self) -> Option<i64> {
        self.run_until(|session| session.state == EngineState::Finished)
            .await;
        self.exit_code
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Started => {
                self.sink.notify(Notification::Info(format!(
                    "Connected to debug adapter at {}",
                    self.transport.endpoint()
                )));
                if self.state == EngineState::RunRequested {
                    if let Err(err) = self.send_initialize() {
                        self.fail_run(err);
                    }
                }
            }
            TransportEvent::ReadyRead(bytes) => {
                self.decoder.feed(&bytes);
                while let Some(decoded) = self.decoder.next_message() {
                    match decoded {
                        Ok(message) => self.handle_message(message),
                        Err(err) if err.is_fatal() => {
                            tracing::error!("{err}; closing adapter connection");
                            self.sink.notify(Notification::Error(err.to_string()));
                            self.transport.kill();
                        }
                        Err(err) => tracing::warn!("{err}; frame skipped"),
                    }
                }
            }
            TransportEvent::Error(err) => {
                tracing::warn!("transport error: {err}");
                self.sink.notify(Notification::Error(err.to_string()));
            }
            TransportEvent::Done => self.finish(),
        }
    }

    fn handle_message(&mut self, message: Message) {
        match self.client.dispatch_inbound(message) {
            Inbound::Response { command, response } => self.handle_response(&command, response),
            Inbound::Event(event) => self.handle_event(event),
            Inbound::ReverseRequest(request) => {
                tracing::warn!(command = %request.command, "unsupported reverse request");
                let message = format!("{} is not supported", request.command);
                self.client
                    .send_response(&mut self.transport, &request, false, Some(message));
            }
            Inbound::Orphan(_) => {}
        }
    }

    fn handle_response(&mut self, command: &str, response: Response) {
        match command {
            "initialize" => self.on_initialize_response(response),
            "attach" => self.on_attach_response(response),
            "setBreakpoints" => self.on_set_breakpoints_response(response),
            "continue" | "next" | "stepIn" | "stepOut" => self.on_resume_response(response),
            "pause" => {
                if response.success {
                    return;
                }
                self.unconfirmed_pause = false;
                if self.state == EngineState::InferiorStopRequested {
                    self.report_rejection(&response);
                    self.set_state(EngineState::InferiorRunOk);
                }
            }
            "disconnect" => {
                tracing::debug!(command, "adapter acknowledged shutdown");
                self.transport.kill();
            }
            "configurationDone" if !response.success => self.report_rejection(&response),
            _ => {}
        }
    }

    fn on_initialize_response(&mut self, response: Response) {
        if !response.success {
            self.report_rejection(&response);
            self.begin_dying();
            return;
        }
        self.capabilities = DapCapabilities::from_body(response.body.as_ref());
        if self.state != EngineState::RunRequested {
            return;
        }
        let args = AttachRequestArguments {
            just_my_code: Some(self.config.just_my_code),
            redirect_output: Some(true),
            ..Default::default()
        };
        if let Err(err) = self.client.attach(&mut self.transport, &args) {
            self.fail_run(err.into());
        }
    }

    fn on_attach_response(&mut self, response: Response) {
        if !response.success {
            self.report_rejection(&response);
            self.begin_dying();
            return;
        }
        if self.state != EngineState::RunRequested {
            return;
        }
        self.set_state(EngineState::InferiorRunOk);
        if std::mem::take(&mut self.early_stop) {
            self.notify_stop_ok();
        }
    }

    fn on_set_breakpoints_response(&mut self, response: Response) {
        let Some(path) = self.breakpoint_requests.remove(&response.request_seq) else {
            return;
        };
        if self.latest_breakpoint_request.get(&path) != Some(&response.request_seq) {
            tracing::debug!(
                path = %path.display(),
                request_seq = response.request_seq,
                "stale setBreakpoints response ignored"
            );
            return;
        }
        self.latest_breakpoint_request.remove(&path);
        if !response.success {
            self.report_rejection(&response);
            return;
        }
        let body = match response.body_as::<SetBreakpointsResponseBody>() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(path = %path.display(), "bad setBreakpoints body: {e}");
                return;
            }
        };
        self.breakpoints.apply_response(&path, &body.breakpoints);
        let moved: Vec<(i64, i64)> = self
            .breakpoints
            .get_for_file(&path)
            .iter()
            .filter(|bp| bp.effective_line() != bp.line)
            .map(|bp| (bp.line, bp.effective_line()))
            .collect();
        for (requested, actual) in moved {
            self.sink.notify(Notification::Info(format!(
                "Breakpoint at {}:{requested} moved to line {actual}",
                path.display()
            )));
        }
    }

    fn on_resume_response(&mut self, response: Response) {
        if self.resume_seq != Some(response.request_seq) {
            return;
        }
        self.resume_seq = None;
        if !matches!(
            self.state,
            EngineState::InferiorRunRequested
                | EngineState::InferiorRunOk
                | EngineState::InferiorStopOk
        ) {
            return;
        }
        if response.success {
            self.set_state(EngineState::InferiorRunOk);
        } else {
            self.report_rejection(&response);
            self.set_state(EngineState::InferiorStopOk);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event.event.as_str() {
            "initialized" => self.on_initialized(),
            "stopped" => self.on_stopped(&event),
            "continued" => {
                if let Ok(body) = event.body_as::<ContinuedEventBody>() {
                    self.thread_id = Some(body.thread_id);
                }
                if matches!(
                    self.state,
                    EngineState::InferiorStopOk | EngineState::InferiorRunRequested
                ) {
                    self.set_state(EngineState::InferiorRunOk);
                }
            }
            "thread" => match event.body_as::<ThreadEventBody>() {
                Ok(body) if body.reason == "started" && self.thread_id.is_none() => {
                    self.thread_id = Some(body.thread_id);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("bad thread event body: {e}"),
            },
            "output" => match event.body_as::<OutputEventBody>() {
                Ok(body) => {
                    let category = body.category.unwrap_or_else(|| "console".to_string());
                    if category == "telemetry" {
                        return;
                    }
                    self.sink.notify(Notification::Output {
                        category,
                        text: body.output,
                    });
                }
                Err(e) => tracing::warn!("bad output event body: {e}"),
            },
            "exited" => match event.body_as::<ExitedEventBody>() {
                Ok(body) => {
                    tracing::info!(code = body.exit_code, "debuggee exited");
                    self.exit_code = Some(body.exit_code);
                    self.sink.notify(Notification::Exited {
                        code: body.exit_code,
                    });
                }
                Err(e) => tracing::warn!("bad exited event body: {e}"),
            },
            "terminated" => {
                self.sink.notify(Notification::Terminated);
                self.begin_dying();
            }
            other => tracing::debug!(event = other, "event ignored"),
        }
    }

    fn on_initialized(&mut self) {
        self.configured = true;
        let files: Vec<PathBuf> = self.breakpoints.files().map(Path::to_path_buf).collect();
        for file in files {
            if let Err(err) = self.sync_breakpoints(&file) {
                tracing::warn!(path = %file.display(), "cannot send breakpoints: {err}");
            }
        }
        if self.capabilities.supports_configuration_done_request {
            self.client.configuration_done(&mut self.transport);
        }
    }

    fn on_stopped(&mut self, event: &Event) {
        match event.body_as::<StoppedEventBody>() {
            Ok(body) => {
                tracing::debug!(reason = ?body.reason, thread = ?body.thread_id, "debuggee stopped");
                if body.thread_id.is_some() {
                    self.thread_id = body.thread_id;
                }
            }
            Err(e) => tracing::warn!("bad stopped event body: {e}"),
        }
        let pause_stop = std::mem::take(&mut self.unconfirmed_pause);
        if pause_stop && self.resume_seq.is_some() {
            // The pause was already reported stopped and the user resumed.
            tracing::debug!("late stopped event for an earlier pause ignored");
            return;
        }
        match self.state {
            EngineState::InferiorRunOk
            | EngineState::InferiorRunRequested
            | EngineState::InferiorStopRequested => self.notify_stop_ok(),
            EngineState::RunRequested => self.early_stop = true,
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn send_initialize(&mut self) -> Result<(), EngineError> {
        if self.initialize_sent {
            return Ok(());
        }
        self.client.initialize(&mut self.transport)?;
        self.initialize_sent = true;
        Ok(())
    }

    fn begin_dying(&mut self) {
        if matches!(self.state, EngineState::Dying | EngineState::Finished) {
            return;
        }
        self.set_state(EngineState::Dying);
        self.dying_deadline = Some(Instant::now() + self.config.disconnect_timeout);
        if !self.transport.is_running() {
            self.transport.kill();
            return;
        }
        if let Err(err) = self.client.disconnect(&mut self.transport, true) {
            tracing::warn!("cannot send disconnect: {err}");
            self.transport.kill();
        }
    }

    fn finish(&mut self) {
        let failed = self.client.fail_all_pending();
        if failed > 0 {
            tracing::debug!(failed, "pending requests failed at session end");
        }
        self.breakpoint_requests.clear();
        self.latest_breakpoint_request.clear();
        self.resume_seq = None;
        self.unconfirmed_pause = false;
        self.decoder.reset();
        self.dying_deadline = None;
        if self.state == EngineState::Finished {
            return;
        }
        if self.state != EngineState::Dying {
            tracing::warn!(state = ?self.state, "adapter connection closed");
            self.set_state(EngineState::Dying);
        }
        self.set_state(EngineState::Finished);
    }

    fn fail_run(&mut self, err: EngineError) {
        tracing::error!("{err}");
        self.sink.notify(Notification::Error(err.to_string()));
        self.begin_dying();
    }

    fn report_rejection(&mut self, response: &Response) {
        let err = DapError::Rejected {
            command: response.command.clone(),
            message: response.message.clone().unwrap_or_default(),
        };
        tracing::warn!("{err}");
        self.sink.notify(Notification::Error(err.to_string()));
    }

    fn notify_stop_ok(&mut self) {
        self.set_state(EngineState::InferiorStopOk);
        self.sink.notify(Notification::StopOk);
    }

    fn current_thread(&self) -> i64 {
        self.thread_id.unwrap_or(ANY_THREAD)
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?state, "engine state");
        self.state = state;
        self.sink.notify(Notification::StateChanged(state));
    }

    fn require(&self, operation: &'static str, allowed: &[EngineState]) -> Result<(), EngineError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        tracing::error!(operation, state = ?self.state, "operation not allowed in this state");
        EngineError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

fn is_readable_file(path: &Path) -> bool {
    std::fs::File::open(path)
        .and_then(|file| file.metadata())
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
