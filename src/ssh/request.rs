//! Typed model of what the transport hands the dispatcher and the channel
//! handlers: channel offers, global requests and per-channel sub-requests.

use crate::error::ServerError;
use crate::utils::format_target;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId};
use tokio::sync::{mpsc, oneshot};

/// Answer to a channel offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDecision {
    Accept,
    Reject(RejectReason),
}

impl OpenDecision {
    pub fn is_accept(self) -> bool {
        matches!(self, OpenDecision::Accept)
    }
}

/// Why an offer was refused. Only logged: the transport answers every
/// refused open with `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`, so
/// `ConnectFailed` never reaches the peer as its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Channel type not served here.
    Prohibited,
    /// Outbound connection for a forward could not be made.
    ConnectFailed,
}

/// Destination and advertised origin of a `direct-tcpip` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
    pub originator_host: String,
    pub originator_port: u32,
}

impl ForwardTarget {
    /// Validate the wire values; a destination port must fit in 16 bits.
    pub fn new(
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Self, ServerError> {
        if host.is_empty() {
            return Err(ServerError::protocol("direct-tcpip", "empty host"));
        }
        let port = u16::try_from(port)
            .map_err(|_| ServerError::protocol("direct-tcpip", format!("port {} out of range", port)))?;
        Ok(Self {
            host: host.to_string(),
            port,
            originator_host: originator_host.to_string(),
            originator_port,
        })
    }

    pub fn address(&self) -> String {
        format_target(&self.host, self.port)
    }
}

/// Terminal parameters of a `pty-req`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyParams {
    pub term: String,
    pub size: WindowSize,
}

/// Character and pixel geometry. Wire values are 32-bit; the kernel keeps
/// 16-bit fields, so larger values saturate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
    pub pix_width: u16,
    pub pix_height: u16,
}

impl WindowSize {
    pub fn from_wire(cols: u32, rows: u32, pix_width: u32, pix_height: u32) -> Self {
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Self {
            cols: clamp(cols),
            rows: clamp(rows),
            pix_width: clamp(pix_width),
            pix_height: clamp(pix_height),
        }
    }
}

/// Channel-scoped requests, delivered to a channel's handler in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    PtyReq(PtyParams),
    Env { name: String, value: String },
    Shell,
    Exec(Vec<u8>),
    WindowChange(WindowSize),
    /// Anything without a meaning here (subsystem, x11-req, signal...).
    Other(String),
}

impl SessionRequest {
    pub fn kind(&self) -> &str {
        match self {
            SessionRequest::PtyReq(_) => "pty-req",
            SessionRequest::Env { .. } => "env",
            SessionRequest::Shell => "shell",
            SessionRequest::Exec(_) => "exec",
            SessionRequest::WindowChange(_) => "window-change",
            SessionRequest::Other(kind) => kind,
        }
    }
}

/// A sub-request plus the slot for its success/failure answer. `reply` is
/// `None` when the peer did not ask for one.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: SessionRequest,
    pub reply: Option<oneshot::Sender<bool>>,
}

impl PendingRequest {
    pub fn answer(self, ok: bool) {
        if let Some(tx) = self.reply {
            let _ = tx.send(ok);
        }
    }
}

pub type RequestStream = mpsc::UnboundedReceiver<PendingRequest>;

/// Connection-scoped request that wants a yes/no answer.
#[derive(Debug)]
pub struct GlobalRequest {
    pub kind: String,
    pub reply: oneshot::Sender<bool>,
}

/// The handle a channel task needs to talk back to its peer.
#[derive(Clone)]
pub struct ChannelIo {
    pub id: ChannelId,
    pub handle: Handle,
}

/// A new channel proposed by the peer. The dispatcher answers through
/// `decision` before the channel is confirmed.
pub enum ChannelOffer {
    Session {
        channel: Channel<Msg>,
        io: ChannelIo,
        requests: RequestStream,
        decision: oneshot::Sender<OpenDecision>,
    },
    DirectTcpip {
        channel: Channel<Msg>,
        target: ForwardTarget,
        requests: RequestStream,
        decision: oneshot::Sender<OpenDecision>,
    },
    Unsupported {
        kind: String,
        decision: oneshot::Sender<OpenDecision>,
    },
}

impl ChannelOffer {
    pub fn kind(&self) -> &str {
        match self {
            ChannelOffer::Session { .. } => "session",
            ChannelOffer::DirectTcpip { .. } => "direct-tcpip",
            ChannelOffer::Unsupported { kind, .. } => kind,
        }
    }
}
