use crate::error::ServerError;
use crate::process::{self, Environment, FAILURE_EXIT_STATUS};
use crate::pty::{self, AttachedPty, PtyPair, TerminalInput};
use crate::ssh::request::{ChannelIo, PendingRequest, PtyParams, RequestStream, SessionRequest, WindowSize};
use crate::ssh::scp::{self, ExecPlan, FILE_COPY_FAILURE_STATUS};

use russh::server::Msg;
use russh::{Channel, ChannelMsg, CryptoVec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Buffer size for process/terminal output reads (8 KiB)
const PUMP_BUFFER_SIZE: usize = 8192;

/// Terminal lifecycle of a session channel. A pty-req is only honored in
/// `NoPty`. A window-change fails in `NoPty`, updates the starting size in
/// `Requested` and resizes the live terminal in `Attached`.
pub enum PtyState {
    NoPty,
    Requested(PtyPair),
    Attached(AttachedPty),
}

impl PtyState {
    pub fn name(&self) -> &'static str {
        match self {
            PtyState::NoPty => "no-pty",
            PtyState::Requested(_) => "pty-requested",
            PtyState::Attached(_) => "pty-attached",
        }
    }
}

/// How a process gets its stdio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    /// Use the terminal if one was requested, pipes otherwise.
    Auto,
    /// Always pipes; the binary file-copy stream must not pass a line discipline.
    Piped,
}

/// The attached process: a task resolving to its exit status, and the
/// switch that kills it. Dropping the switch kills the process too.
struct Running {
    status: JoinHandle<u32>,
    kill: oneshot::Sender<()>,
}

impl Running {
    fn finished(status: u32) -> Self {
        let (kill, _) = oneshot::channel();
        Self {
            status: tokio::spawn(async move { status }),
            kill,
        }
    }

    /// Kill the process if it is still running and wait until it is reaped.
    async fn stop(self) {
        let _ = self.kill.send(());
        let _ = self.status.await;
    }
}

/// One "session" channel: applies sub-requests in order, runs at most one
/// process, and reports that process's exit status once when it closes.
pub struct SessionChannel {
    io: ChannelIo,
    input: Option<Channel<Msg>>,
    env: Environment,
    pty: PtyState,
    exit_status: u32,
    running: Option<Running>,
    pumps: Vec<JoinHandle<()>>,
}

impl SessionChannel {
    pub fn new(channel: Channel<Msg>, io: ChannelIo) -> Self {
        Self {
            io,
            input: Some(channel),
            env: Environment::inherit(),
            pty: PtyState::NoPty,
            exit_status: 0,
            running: None,
            pumps: Vec::new(),
        }
    }

    /// Serve the channel until its request stream ends (peer close) or the
    /// attached process finishes, then tear it down.
    pub async fn run(mut self, mut requests: RequestStream) {
        loop {
            tokio::select! {
                pending = requests.recv() => match pending {
                    Some(pending) => self.handle(pending),
                    None => {
                        debug!("Session request stream ended");
                        break;
                    }
                },
                status = wait_running(&mut self.running), if self.running.is_some() => {
                    self.running = None;
                    self.exit_status = status;
                    break;
                }
            }
        }
        // Unanswered requests resolve as failures once their reply slots drop.
        drop(requests);
        self.close().await;
    }

    fn handle(&mut self, pending: PendingRequest) {
        let PendingRequest { request, reply } = pending;
        let kind = request.kind().to_string();
        let ok = match self.apply(request) {
            Ok(()) => true,
            Err(e) => {
                debug!(request = %kind, pty = self.pty.name(), error = %e, "Session request failed");
                false
            }
        };
        if let Some(tx) = reply {
            let _ = tx.send(ok);
        }
    }

    fn apply(&mut self, request: SessionRequest) -> Result<(), ServerError> {
        match request {
            SessionRequest::PtyReq(params) => self.request_pty(params),
            SessionRequest::Env { name, value } => {
                self.env.push(&name, &value)?;
                debug!(name = %name, "Environment override added");
                Ok(())
            }
            SessionRequest::Shell => {
                self.ensure_idle("shell")?;
                self.start(process::default_shell(), Attach::Auto, FAILURE_EXIT_STATUS);
                Ok(())
            }
            SessionRequest::Exec(payload) => {
                self.ensure_idle("exec")?;
                match scp::plan_exec(&payload)? {
                    ExecPlan::FileCopy(args) => {
                        if let Err(e) = scp::validate_copy_args(&args) {
                            debug!(error = %e, "Refusing file copy");
                            self.finish_now(FILE_COPY_FAILURE_STATUS);
                        } else {
                            self.start(args, Attach::Piped, FILE_COPY_FAILURE_STATUS);
                        }
                    }
                    ExecPlan::Shell(command) => {
                        debug!(command = %command, "Executing");
                        self.start(process::command_with_shell(&command), Attach::Auto, FAILURE_EXIT_STATUS);
                    }
                    ExecPlan::Nothing => debug!("Exec request with nothing to run"),
                }
                Ok(())
            }
            SessionRequest::WindowChange(size) => self.resize(size),
            SessionRequest::Other(kind) => Err(ServerError::ChannelProtocol {
                request: "session",
                reason: format!("unsupported request {:?}", kind),
            }),
        }
    }

    fn request_pty(&mut self, params: PtyParams) -> Result<(), ServerError> {
        if !matches!(self.pty, PtyState::NoPty) {
            return Err(ServerError::protocol("pty-req", "terminal already allocated"));
        }
        let pair = PtyPair::open(params.size)?;
        if !params.term.is_empty() {
            self.env.push("TERM", &params.term)?;
        }
        debug!(term = %params.term, cols = params.size.cols, rows = params.size.rows, "Terminal allocated");
        self.pty = PtyState::Requested(pair);
        Ok(())
    }

    fn resize(&mut self, size: WindowSize) -> Result<(), ServerError> {
        match &mut self.pty {
            PtyState::Attached(pty) => {
                let previous = pty.size();
                pty.resize(size)?;
                debug!(cols = size.cols, rows = size.rows, previous = ?previous, "Terminal resized");
                Ok(())
            }
            PtyState::Requested(pair) => {
                let previous = pair.size();
                pair.set_size(size);
                debug!(cols = size.cols, rows = size.rows, previous = ?previous, "Terminal size updated before start");
                Ok(())
            }
            other => Err(ServerError::protocol(
                "window-change",
                format!("no attached terminal ({})", other.name()),
            )),
        }
    }

    fn ensure_idle(&self, request: &'static str) -> Result<(), ServerError> {
        if self.input.is_some() && self.running.is_none() {
            Ok(())
        } else {
            Err(ServerError::protocol(request, "a process is already attached"))
        }
    }

    /// Spawn `argv` and wire it to the channel. Spawn failures are not
    /// reported to the request; the channel closes with `failure_status`.
    fn start(&mut self, argv: Vec<String>, attach: Attach, failure_status: u32) {
        let Some(input) = self.input.take() else {
            return;
        };
        let result = match (attach, std::mem::replace(&mut self.pty, PtyState::NoPty)) {
            (Attach::Auto, PtyState::Requested(pair)) => self.spawn_on_pty(pair, &argv, input),
            (_, pty) => {
                self.pty = pty;
                self.spawn_piped(&argv, input)
            }
        };
        if let Err(e) = result {
            debug!(program = %program_name(&argv), error = %e, "Spawn failed");
            self.finish_now(failure_status);
        }
    }

    fn finish_now(&mut self, status: u32) {
        self.input = None;
        self.running = Some(Running::finished(status));
    }

    fn spawn_on_pty(&mut self, pair: PtyPair, argv: &[String], input: Channel<Msg>) -> Result<(), ServerError> {
        let mut command = process::pty_command(argv, &self.env)?;
        let (child, attached, terminal, reader) = pair.spawn(&mut command)?;
        info!(pid = child.id(), program = %program_name(argv), "Process attached to terminal");

        let output = tokio::spawn(pump_to_channel(reader, self.io.clone()));
        self.pumps.push(tokio::spawn(pump_to_terminal(input, terminal)));
        self.pty = PtyState::Attached(attached);
        self.running = Some(supervise(child, vec![output]));
        Ok(())
    }

    fn spawn_piped(&mut self, argv: &[String], input: Channel<Msg>) -> Result<(), ServerError> {
        let mut child = process::spawn_piped(argv, &self.env)?;
        info!(pid = child.id(), program = %program_name(argv), "Process started");

        if let Some(stdin) = child.stdin.take() {
            self.pumps.push(tokio::spawn(pump_to_writer(input, stdin)));
        }
        let stdout = child.stdout.take().map(|r| tokio::spawn(pump_to_channel(r, self.io.clone())));
        let stderr = child.stderr.take().map(|r| tokio::spawn(pump_to_channel(r, self.io.clone())));
        let outputs = [stdout, stderr].into_iter().flatten().collect();
        self.running = Some(supervise(child, outputs));
        Ok(())
    }

    /// exit-status, then channel close, then the terminal.
    async fn close(mut self) {
        if let Some(running) = self.running.take() {
            running.stop().await;
        }
        let ChannelIo { id, handle } = &self.io;
        debug!(exit_status = self.exit_status, "Closing session channel");
        let _ = handle.exit_status_request(*id, self.exit_status).await;
        let _ = handle.eof(*id).await;
        let _ = handle.close(*id).await;
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.pty = PtyState::NoPty;
    }
}

fn program_name(argv: &[String]) -> &str {
    argv.first().map(String::as_str).unwrap_or_default()
}

async fn wait_running(running: &mut Option<Running>) -> u32 {
    match running {
        Some(running) => (&mut running.status).await.unwrap_or(FAILURE_EXIT_STATUS),
        None => std::future::pending().await,
    }
}

/// Wait for `child` to exit, then for its output to drain. When the kill
/// switch fires first, the child is killed and reaped and its output
/// dropped.
fn supervise(mut child: Child, mut outputs: Vec<JoinHandle<()>>) -> Running {
    let (kill, mut killed) = oneshot::channel::<()>();
    let status = tokio::spawn(async move {
        let status = tokio::select! {
            waited = child.wait() => match waited {
                Ok(status) => process::exit_code(status),
                Err(e) => {
                    debug!(error = %e, "Waiting for process failed");
                    FAILURE_EXIT_STATUS
                }
            },
            _ = &mut killed => {
                let pid = child.id();
                let _ = child.start_kill();
                let _ = child.wait().await;
                for output in &outputs {
                    output.abort();
                }
                debug!(pid = pid, "Process killed on channel close");
                return FAILURE_EXIT_STATUS;
            }
        };
        // A descendant still holding the output open must not keep the
        // channel from closing once the peer is gone.
        tokio::select! {
            _ = async {
                for output in outputs.iter_mut() {
                    let _ = output.await;
                }
            } => {}
            _ = &mut killed => {}
        }
        for output in &outputs {
            output.abort();
        }
        status
    });
    Running { status, kill }
}

/// Copy a process or terminal output stream into the channel.
async fn pump_to_channel<R: AsyncRead + Unpin>(mut reader: R, io: ChannelIo) {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if io.handle.data(io.id, CryptoVec::from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Copy channel data into a process's stdin; EOF from the peer closes stdin.
async fn pump_to_writer<W: AsyncWrite + Unpin>(mut channel: Channel<Msg>, mut writer: W) {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
            ChannelMsg::Eof => break,
            _ => {}
        }
    }
    let _ = writer.shutdown().await;
}

/// Copy channel data into the terminal's primary device and apply queued
/// resizes. A resize is applied even while a write is stalled on a child
/// that stopped reading.
async fn pump_to_terminal(mut channel: Channel<Msg>, terminal: TerminalInput) {
    let (mut writer, mut resizes) = terminal.into_parts();
    let mut pending: Vec<u8> = Vec::new();
    let mut written = 0;
    let mut peer_done = false;
    loop {
        tokio::select! {
            Some(size) = resizes.recv() => {
                if let Err(e) = pty::apply_size(&writer, size) {
                    debug!(error = %e, "Terminal resize failed");
                }
            }
            result = writer.write(&pending[written..]), if written < pending.len() => match result {
                Ok(0) | Err(_) => break,
                Ok(n) => written += n,
            },
            msg = channel.wait(), if written == pending.len() && !peer_done => match msg {
                Some(ChannelMsg::Data { data }) => {
                    pending = data.to_vec();
                    written = 0;
                }
                Some(ChannelMsg::Eof) | None => peer_done = true,
                Some(_) => {}
            },
            else => break,
        }
    }
}
