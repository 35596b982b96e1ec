//! Adapter transport: the adapter process plus the byte stream to it.
//!
//! A [`Transport`] optionally spawns the adapter, then either connects to
//! it over TCP (retrying while the adapter binds its port) or talks over
//! the child's stdin/stdout. Background tasks only move bytes; all state
//! lives in the `Transport` and is advanced by [`Transport::next_event`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::RawWriter;
use crate::error::DapError;

const READ_CHUNK: usize = 8 * 1024;

/// The executable to start for a session, with its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCommand {
    /// Executable path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory; inherits ours when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

impl AdapterCommand {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add environment variables.
    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }
}

impl fmt::Display for AdapterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the adapter's protocol stream is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A listening TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// The spawned adapter's stdin/stdout.
    Stdio,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Stdio => f.write_str("stdio"),
        }
    }
}

/// Socket connect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Upper bound for a single connect call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

/// Connection state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started.
    Disconnected,
    /// Waiting for the socket to accept.
    Connecting,
    /// Bytes can flow.
    Connected,
    /// Permanently closed; a new `start` is needed.
    Closed,
}

/// Lifecycle and data notifications, in the order they happened.
#[derive(Debug)]
pub enum TransportEvent {
    /// The stream is connected.
    Started,
    /// Inbound bytes.
    ReadyRead(Vec<u8>),
    /// A transport fault. Fatal faults are followed by [`Done`](Self::Done).
    Error(DapError),
    /// The transport is closed. Emitted exactly once per `start`.
    Done,
}

/// Messages from the background tasks to the owning `Transport`.
enum Signal {
    Connected { stream: TcpStream, attempt: u32 },
    AttemptFailed { attempt: u32, error: std::io::Error },
    Exhausted { attempts: u32 },
    Bytes(Vec<u8>),
    ReadFailed(std::io::Error),
    Eof,
}

/// A byte-stream connection to a debug adapter.
pub struct Transport {
    endpoint: Endpoint,
    policy: RetryPolicy,
    state: ConnectionState,
    attempts: u32,
    child: Option<Child>,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    queued: VecDeque<TransportEvent>,
    done_emitted: bool,
}

impl Transport {
    /// Create a transport for `endpoint`; nothing happens until [`start`](Self::start).
    pub fn new(endpoint: Endpoint, policy: RetryPolicy) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            child: None,
            writer: None,
            tasks: Vec::new(),
            signals_tx,
            signals_rx,
            queued: VecDeque::new(),
            done_emitted: false,
        }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect attempts made since the last `start`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether bytes can currently be written.
    pub fn is_running(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// OS process id of the spawned adapter, if any.
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn `command` (when given) and begin connecting.
    ///
    /// For [`Endpoint::Stdio`] the command is required and the transport is
    /// connected as soon as the child runs. For [`Endpoint::Tcp`] the
    /// connection is made in the background under the [`RetryPolicy`];
    /// watch [`next_event`](Self::next_event) for `Started`.
    pub fn start(&mut self, command: Option<&AdapterCommand>) -> Result<(), DapError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!(endpoint = %self.endpoint, "transport already started");
            return Ok(());
        }

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        self.signals_tx = signals_tx;
        self.signals_rx = signals_rx;
        self.queued.clear();
        self.done_emitted = false;
        self.attempts = 0;

        if let Some(command) = command {
            if let Err(err) = self.spawn_child(command) {
                self.state = ConnectionState::Closed;
                return Err(err);
            }
        }

        match self.endpoint.clone() {
            Endpoint::Stdio => {
                let pipes = self
                    .child
                    .as_mut()
                    .and_then(|child| Some((child.stdout.take()?, child.stdin.take()?)));
                let Some((stdout, stdin)) = pipes else {
                    self.state = ConnectionState::Closed;
                    return Err(DapError::LaunchFailure {
                        program: command
                            .map(|c| c.program.display().to_string())
                            .unwrap_or_default(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "stdio endpoint needs a spawned adapter with piped stdio",
                        ),
                    });
                };
                self.attach_stream(stdout, stdin);
                self.state = ConnectionState::Connected;
                self.queued.push_back(TransportEvent::Started);
            }
            Endpoint::Tcp { host, port } => {
                self.state = ConnectionState::Connecting;
                let task = spawn_connector(host, port, self.policy, self.signals_tx.clone());
                self.tasks.push(task);
            }
        }
        Ok(())
    }

    /// Wait for the next event. Returns `None` once the transport is
    /// closed and every event, including `Done`, has been delivered.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            if matches!(
                self.state,
                ConnectionState::Closed | ConnectionState::Disconnected
            ) {
                return None;
            }
            let signal = self.signals_rx.recv().await?;
            if let Some(event) = self.handle_signal(signal) {
                return Some(event);
            }
        }
    }

    /// Queue bytes for the adapter. Dropped when not connected.
    pub fn write_raw(&self, bytes: &[u8]) {
        match (&self.writer, self.state) {
            (Some(writer), ConnectionState::Connected) => {
                if writer.send(bytes.to_vec()).is_err() {
                    tracing::debug!("writer task gone; dropping {} bytes", bytes.len());
                }
            }
            _ => tracing::trace!(len = bytes.len(), "transport not connected; write dropped"),
        }
    }

    /// Tear everything down. Idempotent: `Done` is emitted once.
    pub fn kill(&mut self) {
        if self.done_emitted {
            return;
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => tracing::debug!(%status, "adapter already exited"),
                Ok(None) => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("failed to kill adapter: {e}");
                    }
                }
                Err(e) => tracing::warn!("failed to query adapter status: {e}"),
            }
        }

        self.writer = None;
        self.state = ConnectionState::Closed;
        self.done_emitted = true;
        self.queued.push_back(TransportEvent::Done);
        tracing::debug!(endpoint = %self.endpoint, "transport closed");
    }

    fn spawn_child(&mut self, command: &AdapterCommand) -> Result<(), DapError> {
        let piped = self.endpoint == Endpoint::Stdio;
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(if piped { Stdio::piped() } else { Stdio::null() })
            .stdout(if piped { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| DapError::LaunchFailure {
            program: command.program.display().to_string(),
            source,
        })?;
        tracing::debug!(pid = ?child.id(), "spawned adapter: {command}");
        self.child = Some(child);
        Ok(())
    }

    fn attach_stream<R, W>(&mut self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, writer_task) = spawn_writer(writer);
        let reader_task = spawn_reader(reader, self.signals_tx.clone());
        self.writer = Some(writer_tx);
        self.tasks.push(writer_task);
        self.tasks.push(reader_task);
    }

    fn handle_signal(&mut self, signal: Signal) -> Option<TransportEvent> {
        match signal {
            Signal::Connected { stream, attempt } => {
                self.attempts = attempt;
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("set_nodelay failed: {e}");
                }
                let (read_half, write_half) = stream.into_split();
                self.attach_stream(read_half, write_half);
                self.state = ConnectionState::Connected;
                tracing::debug!(endpoint = %self.endpoint, attempt, "connected to adapter");
                Some(TransportEvent::Started)
            }
            Signal::AttemptFailed { attempt, error } => {
                self.attempts = attempt;
                tracing::debug!(endpoint = %self.endpoint, attempt, "connect failed: {error}");
                None
            }
            Signal::Exhausted { attempts } => {
                self.attempts = attempts;
                tracing::warn!(endpoint = %self.endpoint, attempts, "giving up on adapter connection");
                self.kill();
                Some(TransportEvent::Error(DapError::ConnectionFailed { attempts }))
            }
            Signal::Bytes(bytes) => Some(TransportEvent::ReadyRead(bytes)),
            Signal::ReadFailed(error) => {
                self.kill();
                Some(TransportEvent::Error(DapError::Io(error)))
            }
            Signal::Eof => {
                tracing::debug!(endpoint = %self.endpoint, "adapter closed the stream");
                self.kill();
                None
            }
        }
    }
}

impl RawWriter for Transport {
    fn write_raw(&mut self, bytes: &[u8]) {
        Transport::write_raw(self, bytes);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("child", &self.child_id())
            .finish()
    }
}

fn spawn_connector(
    host: String,
    port: u16,
    policy: RetryPolicy,
    signals: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            let result =
                tokio::time::timeout(policy.attempt_timeout, TcpStream::connect((host.as_str(), port)))
                    .await
                    .unwrap_or_else(|_| {
                        Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "connect timed out",
                        ))
                    });
            match result {
                Ok(stream) => {
                    let _ = signals.send(Signal::Connected { stream, attempt });
                    return;
                }
                Err(error) => {
                    if signals.send(Signal::AttemptFailed { attempt, error }).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = signals.send(Signal::Exhausted {
            attempts: policy.max_attempts,
        });
    })
}

fn spawn_reader<R>(mut reader: R, signals: mpsc::UnboundedSender<Signal>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = signals.send(Signal::Eof);
                    return;
                }
                Ok(n) => {
                    if signals.send(Signal::Bytes(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = signals.send(Signal::ReadFailed(e));
                    return;
                }
            }
        }
    })
}

fn spawn_writer<W>(mut writer: W) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    (tx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn collect_until_closed(transport: &mut Transport) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = timeout(Duration::from_secs(10), transport.next_event())
            .await
            .expect("transport stalled")
        {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn transport_gives_up_after_max_attempts() {
        let port = unused_port().await;
        let mut transport = Transport::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            RetryPolicy::default(),
        );
        transport.start(None).unwrap();
        assert_eq!(transport.state(), ConnectionState::Connecting);

        let events = collect_until_closed(&mut transport).await;
        assert_eq!(events.len(), 2, "got: {events:?}");
        assert!(matches!(
            events[0],
            TransportEvent::Error(DapError::ConnectionFailed { attempts: 10 })
        ));
        assert!(matches!(events[1], TransportEvent::Done));
        assert_eq!(transport.attempts(), 10);
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn transport_connects_and_moves_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut transport = Transport::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            RetryPolicy::default(),
        );
        transport.start(None).unwrap();

        let started = transport.next_event().await.unwrap();
        assert!(matches!(started, TransportEvent::Started));
        assert!(transport.is_running());
        assert_eq!(transport.attempts(), 1);

        let mut received = Vec::new();
        while received.len() < 5 {
            match transport.next_event().await.unwrap() {
                TransportEvent::ReadyRead(bytes) => received.extend(bytes),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(received, b"hello");

        transport.write_raw(b"ping");
        assert_eq!(&server.await.unwrap(), b"ping");

        // The server dropped its socket: the transport closes itself.
        let events = collect_until_closed(&mut transport).await;
        assert!(matches!(events.last(), Some(TransportEvent::Done)));
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn transport_retries_until_adapter_listens() {
        let port = unused_port().await;
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let (socket, _) = listener.accept().await.unwrap();
            socket
        });

        let mut transport = Transport::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            RetryPolicy {
                max_attempts: 50,
                ..RetryPolicy::default()
            },
        );
        transport.start(None).unwrap();

        let event = timeout(Duration::from_secs(10), transport.next_event())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::Started), "got: {event:?}");
        assert!(transport.attempts() > 1);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn transport_kill_twice_emits_one_done() {
        let port = unused_port().await;
        let mut transport = Transport::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            RetryPolicy::default(),
        );
        transport.start(None).unwrap();
        transport.kill();
        transport.kill();

        let events = collect_until_closed(&mut transport).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransportEvent::Done));
    }

    #[tokio::test]
    async fn transport_write_before_connect_is_dropped() {
        let transport = Transport::new(Endpoint::Stdio, RetryPolicy::default());
        transport.write_raw(b"ignored");
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn transport_launch_failure() {
        let mut transport = Transport::new(Endpoint::Stdio, RetryPolicy::default());
        let command = AdapterCommand::new("definitely-not-a-real-adapter-xyz");
        let err = transport.start(Some(&command)).unwrap_err();
        match err {
            DapError::LaunchFailure { program, .. } => {
                assert!(program.contains("definitely-not-a-real-adapter-xyz"));
            }
            other => panic!("expected LaunchFailure, got: {other:?}"),
        }
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn transport_stdio_requires_command() {
        let mut transport = Transport::new(Endpoint::Stdio, RetryPolicy::default());
        assert!(matches!(
            transport.start(None),
            Err(DapError::LaunchFailure { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transport_stdio_echo() {
        let mut transport = Transport::new(Endpoint::Stdio, RetryPolicy::default());
        transport.start(Some(&AdapterCommand::new("cat"))).unwrap();
        assert!(matches!(
            transport.next_event().await,
            Some(TransportEvent::Started)
        ));
        assert!(transport.child_id().is_some());

        transport.write_raw(b"abc");
        let mut received = Vec::new();
        while received.len() < 3 {
            match timeout(Duration::from_secs(5), transport.next_event())
                .await
                .unwrap()
            {
                Some(TransportEvent::ReadyRead(bytes)) => received.extend(bytes),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(received, b"abc");

        transport.kill();
        assert!(matches!(
            transport.next_event().await,
            Some(TransportEvent::Done)
        ));
        assert!(transport.next_event().await.is_none());
    }

    #[test]
    fn adapter_command_display() {
        let cmd = AdapterCommand::new("python3").args(["-m", "debugpy"]);
        assert_eq!(cmd.to_string(), "python3 -m debugpy");
    }

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, 10);
    }
}
