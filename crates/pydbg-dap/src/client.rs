//! Protocol client: request sequencing and response correlation.
//!
//! The client owns the sequence counter and the pending-request table.
//! It never touches the socket itself; encoded requests go out through a
//! [`RawWriter`] and inbound messages come back in through
//! [`ProtocolClient::dispatch_inbound`].

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::oneshot;

use crate::breakpoint::Breakpoint;
use crate::codec::encode;
use crate::error::DapError;
use crate::protocol::{
    AttachRequestArguments, DisconnectArguments, EvaluateArguments, Event,
    InitializeRequestArguments, Message, Request, Response,
    SetBreakpointsArguments, Source, SourceBreakpoint, ThreadArguments,
};

/// Identifier this client reports in `initialize`.
pub const CLIENT_ID: &str = "pydbg";
/// Human-readable client name reported in `initialize`.
pub const CLIENT_NAME: &str = "pydbg";

/// Sink for encoded outbound bytes.
pub trait RawWriter {
    /// Hand bytes to the wire. Must not block.
    fn write_raw(&mut self, bytes: &[u8]);
}

impl RawWriter for Vec<u8> {
    fn write_raw(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Receiver for callers that want to await one particular response.
pub type ReplyReceiver = oneshot::Receiver<Result<Response, DapError>>;

#[derive(Debug)]
struct PendingRequest {
    command: String,
    reply: Option<oneshot::Sender<Result<Response, DapError>>>,
}

/// What an inbound message turned out to be.
#[derive(Debug)]
pub enum Inbound {
    /// A response that matched a pending request.
    Response {
        /// Command of the original request.
        command: String,
        /// The response itself.
        response: Response,
    },
    /// An adapter event.
    Event(Event),
    /// A request initiated by the adapter (e.g. `runInTerminal`).
    ReverseRequest(Request),
    /// A response nobody was waiting for. Already logged.
    Orphan(Response),
}

/// Sequences outgoing requests and correlates responses.
#[derive(Debug)]
pub struct ProtocolClient {
    adapter_id: String,
    next_seq: i64,
    pending: HashMap<i64, PendingRequest>,
}

impl ProtocolClient {
    /// Create a client for the adapter identified by `adapter_id`.
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            next_seq: 1,
            pending: HashMap::new(),
        }
    }

    /// How many requests are waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the request `seq` is still waiting for its response.
    pub fn is_pending(&self, seq: i64) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Command of the pending request `seq`.
    pub fn pending_command(&self, seq: i64) -> Option<&str> {
        self.pending.get(&seq).map(|p| p.command.as_str())
    }

    /// Send `command` and return its sequence number.
    pub fn send_request(
        &mut self,
        writer: &mut dyn RawWriter,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> i64 {
        self.send(writer, command, arguments, None)
    }

    /// Send `command` and also return a receiver resolved with the response.
    ///
    /// A request that fails to encode is never written or left pending; its
    /// receiver resolves with the encoding error.
    pub fn send_request_with_reply(
        &mut self,
        writer: &mut dyn RawWriter,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> (i64, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let seq = self.send(writer, command, arguments, Some(tx));
        (seq, rx)
    }

    fn send(
        &mut self,
        writer: &mut dyn RawWriter,
        command: &str,
        arguments: Option<serde_json::Value>,
        reply: Option<oneshot::Sender<Result<Response, DapError>>>,
    ) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let request = Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        let bytes = match encode(&request) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(seq, command, "failed to encode request: {err}");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
                return seq;
            }
        };
        self.pending.insert(
            seq,
            PendingRequest {
                command: command.to_string(),
                reply,
            },
        );
        tracing::debug!(seq, command, "-> request");
        writer.write_raw(&bytes);
        seq
    }

    /// Answer a request initiated by the adapter. Nothing is left pending.
    pub fn send_response(
        &mut self,
        writer: &mut dyn RawWriter,
        request: &Request,
        success: bool,
        message: Option<String>,
    ) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let response = Message::Response(Response {
            seq,
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message,
            body: None,
        });
        match encode(&response) {
            Ok(bytes) => {
                tracing::debug!(seq, request_seq = request.seq, command = %request.command, success, "-> response");
                writer.write_raw(&bytes);
            }
            Err(err) => {
                tracing::error!(seq, request_seq = request.seq, "failed to encode response: {err}");
            }
        }
        seq
    }

    /// Route one decoded message.
    ///
    /// A matching response is removed from the pending table and its reply
    /// channel, if any, is resolved. Rejected requests resolve the channel
    /// with [`DapError::Rejected`] but are still returned as
    /// [`Inbound::Response`] so the caller sees `success: false`.
    pub fn dispatch_inbound(&mut self, message: Message) -> Inbound {
        match message {
            Message::Response(response) => match self.pending.remove(&response.request_seq) {
                Some(pending) => {
                    tracing::debug!(
                        request_seq = response.request_seq,
                        command = %pending.command,
                        success = response.success,
                        "<- response"
                    );
                    if let Some(reply) = pending.reply {
                        let result = if response.success {
                            Ok(response.clone())
                        } else {
                            Err(DapError::Rejected {
                                command: pending.command.clone(),
                                message: response.message.clone().unwrap_or_default(),
                            })
                        };
                        // The caller may have stopped waiting.
                        let _ = reply.send(result);
                    }
                    Inbound::Response {
                        command: pending.command,
                        response,
                    }
                }
                None => {
                    let err = DapError::OrphanResponse {
                        request_seq: response.request_seq,
                    };
                    tracing::warn!(command = %response.command, "{err}; dropped");
                    Inbound::Orphan(response)
                }
            },
            Message::Event(event) => {
                tracing::debug!(event = %event.event, "<- event");
                Inbound::Event(event)
            }
            Message::Request(request) => {
                tracing::debug!(command = %request.command, "<- reverse request");
                Inbound::ReverseRequest(request)
            }
        }
    }

    /// Fail every pending request with [`DapError::SessionTerminated`].
    ///
    /// Returns how many entries were failed.
    pub fn fail_all_pending(&mut self) -> usize {
        let count = self.pending.len();
        for (seq, pending) in self.pending.drain() {
            tracing::debug!(seq, command = %pending.command, "failing pending request");
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(DapError::SessionTerminated));
            }
        }
        count
    }

    // -----------------------------------------------------------------------
    // Typed requests
    // -----------------------------------------------------------------------

    /// `initialize`, with the fixed identity and path-format fields.
    pub fn initialize(&mut self, writer: &mut dyn RawWriter) -> Result<i64, DapError> {
        let args = InitializeRequestArguments {
            client_id: CLIENT_ID.into(),
            client_name: CLIENT_NAME.into(),
            adapter_id: self.adapter_id.clone(),
            path_format: "path".into(),
            lines_start_at1: true,
            columns_start_at1: true,
            locale: None,
            supports_variable_type: Some(true),
            supports_run_in_terminal_request: Some(false),
        };
        let args = serde_json::to_value(args)?;
        Ok(self.send_request(writer, "initialize", Some(args)))
    }

    /// `attach`.
    pub fn attach(
        &mut self,
        writer: &mut dyn RawWriter,
        args: &AttachRequestArguments,
    ) -> Result<i64, DapError> {
        let args = serde_json::to_value(args)?;
        Ok(self.send_request(writer, "attach", Some(args)))
    }

    /// `configurationDone`.
    pub fn configuration_done(&mut self, writer: &mut dyn RawWriter) -> i64 {
        self.send_request(writer, "configurationDone", None)
    }

    /// `setBreakpoints` for one file, replacing whatever the adapter had.
    pub fn set_breakpoints(
        &mut self,
        writer: &mut dyn RawWriter,
        path: &Path,
        breakpoints: &[Breakpoint],
    ) -> Result<i64, DapError> {
        let args = SetBreakpointsArguments {
            source: Source {
                name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                path: Some(path.to_string_lossy().into_owned()),
                source_reference: None,
            },
            breakpoints: breakpoints
                .iter()
                .map(|bp| SourceBreakpoint {
                    line: bp.line,
                    condition: bp.condition.clone(),
                    hit_condition: bp.hit_condition.clone(),
                    log_message: bp.log_message.clone(),
                })
                .collect(),
        };
        let args = serde_json::to_value(args)?;
        Ok(self.send_request(writer, "setBreakpoints", Some(args)))
    }

    /// `continue`.
    pub fn continue_thread(
        &mut self,
        writer: &mut dyn RawWriter,
        thread_id: i64,
    ) -> Result<i64, DapError> {
        self.thread_request(writer, "continue", thread_id)
    }

    /// `pause`.
    pub fn pause(&mut self, writer: &mut dyn RawWriter, thread_id: i64) -> Result<i64, DapError> {
        self.thread_request(writer, "pause", thread_id)
    }

    /// `next` (step over).
    pub fn next(&mut self, writer: &mut dyn RawWriter, thread_id: i64) -> Result<i64, DapError> {
        self.thread_request(writer, "next", thread_id)
    }

    /// `stepIn`.
    pub fn step_in(&mut self, writer: &mut dyn RawWriter, thread_id: i64) -> Result<i64, DapError> {
        self.thread_request(writer, "stepIn", thread_id)
    }

    /// `stepOut`.
    pub fn step_out(
        &mut self,
        writer: &mut dyn RawWriter,
        thread_id: i64,
    ) -> Result<i64, DapError> {
        self.thread_request(writer, "stepOut", thread_id)
    }

    fn thread_request(
        &mut self,
        writer: &mut dyn RawWriter,
        command: &str,
        thread_id: i64,
    ) -> Result<i64, DapError> {
        let args = serde_json::to_value(ThreadArguments { thread_id })?;
        Ok(self.send_request(writer, command, Some(args)))
    }

    /// `threads`.
    pub fn threads(&mut self, writer: &mut dyn RawWriter) -> (i64, ReplyReceiver) {
        self.send_request_with_reply(writer, "threads", None)
    }

    /// `stackTrace` for one thread.
    pub fn stack_trace(
        &mut self,
        writer: &mut dyn RawWriter,
        thread_id: i64,
    ) -> (i64, ReplyReceiver) {
        self.send_request_with_reply(
            writer,
            "stackTrace",
            Some(serde_json::json!({ "threadId": thread_id })),
        )
    }

    /// `scopes` for one frame.
    pub fn scopes(&mut self, writer: &mut dyn RawWriter, frame_id: i64) -> (i64, ReplyReceiver) {
        self.send_request_with_reply(
            writer,
            "scopes",
            Some(serde_json::json!({ "frameId": frame_id })),
        )
    }

    /// `variables` for one container reference.
    pub fn variables(
        &mut self,
        writer: &mut dyn RawWriter,
        variables_reference: i64,
    ) -> (i64, ReplyReceiver) {
        self.send_request_with_reply(
            writer,
            "variables",
            Some(serde_json::json!({ "variablesReference": variables_reference })),
        )
    }

    /// `evaluate`.
    pub fn evaluate(
        &mut self,
        writer: &mut dyn RawWriter,
        args: &EvaluateArguments,
    ) -> Result<(i64, ReplyReceiver), DapError> {
        let args = serde_json::to_value(args)?;
        Ok(self.send_request_with_reply(writer, "evaluate", Some(args)))
    }

    /// `disconnect`.
    pub fn disconnect(
        &mut self,
        writer: &mut dyn RawWriter,
        terminate_debuggee: bool,
    ) -> Result<i64, DapError> {
        let args = DisconnectArguments {
            restart: Some(false),
            terminate_debuggee: Some(terminate_debuggee),
        };
        let args = serde_json::to_value(args)?;
        Ok(self.send_request(writer, "disconnect", Some(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageDecoder;
    use std::path::PathBuf;

    fn sent(wire: &[u8]) -> Vec<Request> {
        let mut decoder = MessageDecoder::new();
        decoder.feed(wire);
        decoder
            .drain()
            .map(|m| match m.unwrap() {
                Message::Request(r) => r,
                other => panic!("expected request, got {other:?}"),
            })
            .collect()
    }

    fn response(request_seq: i64, command: &str, success: bool) -> Message {
        Message::Response(Response {
            seq: 100 + request_seq,
            request_seq,
            success,
            command: command.into(),
            message: (!success).then(|| "nope".to_string()),
            body: None,
        })
    }

    #[test]
    fn client_initialize_fixed_fields() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let seq = client.initialize(&mut wire).unwrap();

        let reqs = sent(&wire);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].seq, seq);
        assert_eq!(reqs[0].command, "initialize");
        let args = reqs[0].arguments.as_ref().unwrap();
        assert_eq!(args["clientID"], CLIENT_ID);
        assert_eq!(args["clientName"], CLIENT_NAME);
        assert_eq!(args["adapterID"], "python");
        assert_eq!(args["pathFormat"], "path");
    }

    #[test]
    fn client_sequence_numbers_increment() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let a = client.configuration_done(&mut wire);
        let b = client.pause(&mut wire, 1).unwrap();
        let (c, _) = client.threads(&mut wire);
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(client.pending_count(), 3);
        assert_eq!(client.pending_command(2), Some("pause"));
    }

    #[test]
    fn client_matches_responses_by_seq_not_order() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let first = client.next(&mut wire, 1).unwrap();
        let second = client.step_in(&mut wire, 1).unwrap();

        match client.dispatch_inbound(response(second, "stepIn", true)) {
            Inbound::Response { command, .. } => assert_eq!(command, "stepIn"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(client.is_pending(first));
        assert!(!client.is_pending(second));

        match client.dispatch_inbound(response(first, "next", true)) {
            Inbound::Response { command, .. } => assert_eq!(command, "next"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn client_duplicate_response_is_orphan() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let seq = client.configuration_done(&mut wire);

        assert!(matches!(
            client.dispatch_inbound(response(seq, "configurationDone", true)),
            Inbound::Response { .. }
        ));
        assert!(matches!(
            client.dispatch_inbound(response(seq, "configurationDone", true)),
            Inbound::Orphan(_)
        ));
    }

    #[test]
    fn client_unknown_response_is_orphan() {
        let mut client = ProtocolClient::new("python");
        match client.dispatch_inbound(response(42, "threads", true)) {
            Inbound::Orphan(r) => assert_eq!(r.request_seq, 42),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_reply_channel_resolves_once() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let (seq, rx) = client.threads(&mut wire);

        client.dispatch_inbound(response(seq, "threads", true));
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.request_seq, seq);
    }

    #[tokio::test]
    async fn client_rejected_reply() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let (seq, rx) = client.scopes(&mut wire, 7);

        let inbound = client.dispatch_inbound(response(seq, "scopes", false));
        assert!(matches!(inbound, Inbound::Response { ref response, .. } if !response.success));
        match rx.await.unwrap() {
            Err(DapError::Rejected { command, message }) => {
                assert_eq!(command, "scopes");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_fail_all_pending() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let (_, rx1) = client.threads(&mut wire);
        let (_, rx2) = client.stack_trace(&mut wire, 1);
        client.configuration_done(&mut wire);

        assert_eq!(client.fail_all_pending(), 3);
        assert_eq!(client.pending_count(), 0);
        assert!(matches!(rx1.await.unwrap(), Err(DapError::SessionTerminated)));
        assert!(matches!(rx2.await.unwrap(), Err(DapError::SessionTerminated)));
        assert_eq!(client.fail_all_pending(), 0);
    }

    #[test]
    fn client_events_pass_through() {
        let mut client = ProtocolClient::new("python");
        let event = Message::Event(Event {
            seq: 1,
            event: "initialized".into(),
            body: None,
        });
        match client.dispatch_inbound(event) {
            Inbound::Event(e) => assert_eq!(e.event, "initialized"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn client_answers_reverse_request() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        client.configuration_done(&mut wire);
        wire.clear();

        let reverse = Request {
            seq: 9,
            command: "runInTerminal".into(),
            arguments: None,
        };
        let seq = client.send_response(&mut wire, &reverse, false, Some("unsupported".into()));
        assert_eq!(seq, 2);
        assert_eq!(client.pending_count(), 1);

        let mut decoder = MessageDecoder::new();
        decoder.feed(&wire);
        match decoder.next_message().unwrap().unwrap() {
            Message::Response(r) => {
                assert_eq!(r.request_seq, 9);
                assert_eq!(r.command, "runInTerminal");
                assert!(!r.success);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn client_set_breakpoints_request() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let path = PathBuf::from("/app/main.py");
        let bps = vec![
            Breakpoint::new(path.clone(), 10),
            Breakpoint::new(path.clone(), 20).with_condition("x > 1"),
        ];
        client.set_breakpoints(&mut wire, &path, &bps).unwrap();

        let reqs = sent(&wire);
        let args = reqs[0].arguments.as_ref().unwrap();
        assert_eq!(args["source"]["path"], "/app/main.py");
        assert_eq!(args["source"]["name"], "main.py");
        let lines: Vec<i64> = args["breakpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["line"].as_i64().unwrap())
            .collect();
        assert_eq!(lines, vec![10, 20]);
        assert_eq!(args["breakpoints"][1]["condition"], "x > 1");
    }

    #[test]
    fn client_disconnect_terminates_debuggee() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        client.disconnect(&mut wire, true).unwrap();
        let reqs = sent(&wire);
        assert_eq!(reqs[0].command, "disconnect");
        assert_eq!(reqs[0].arguments.as_ref().unwrap()["terminateDebuggee"], true);
    }

    #[test]
    fn client_evaluate_arguments() {
        let mut wire = Vec::new();
        let mut client = ProtocolClient::new("python");
        let args = EvaluateArguments {
            expression: "x + y".into(),
            frame_id: Some(3),
            context: Some("repl".into()),
        };
        client.evaluate(&mut wire, &args).unwrap();
        let reqs = sent(&wire);
        let sent_args = reqs[0].arguments.as_ref().unwrap();
        assert_eq!(sent_args["expression"], "x + y");
        assert_eq!(sent_args["frameId"], 3);
    }
}
