use crate::error::ServerError;
use crate::ssh::forward;
use crate::ssh::request::{ChannelOffer, GlobalRequest, OpenDecision, RejectReason};
use crate::ssh::session::SessionChannel;

use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, info_span, Instrument};

/// Lifecycle of one connection as seen by its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Authenticating,
    Active,
    Draining,
    Closed,
}

/// What the dispatcher may use of the transport: the authentication outcome
/// and the two inbound sequences. Replies travel back through the oneshot
/// slots carried by each item.
pub struct ConnectionStreams {
    pub authenticated: oneshot::Receiver<String>,
    pub offers: mpsc::UnboundedReceiver<ChannelOffer>,
    pub globals: mpsc::UnboundedReceiver<GlobalRequest>,
}

/// Demultiplexes one connection's channel offers and holds the connection
/// open until every channel handler it started has finished.
pub struct ConnectionDispatcher {
    conn_id: String,
    peer: SocketAddr,
    state: ConnState,
    tracker: TaskTracker,
}

impl ConnectionDispatcher {
    pub fn new(conn_id: String, peer: SocketAddr) -> Self {
        Self {
            conn_id,
            peer,
            state: ConnState::Authenticating,
            tracker: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn transition(&mut self, next: ConnState) {
        debug!(conn_id = %self.conn_id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Drive the connection to `Closed`. Returns an error only when the
    /// transport ended before authentication completed.
    pub async fn run(mut self, streams: ConnectionStreams) -> Result<(), ServerError> {
        let ConnectionStreams {
            authenticated,
            mut offers,
            globals,
        } = streams;

        let user = match authenticated.await {
            Ok(user) => user,
            Err(_) => {
                self.transition(ConnState::Closed);
                return Err(ServerError::Authentication(format!(
                    "{} closed before authenticating",
                    self.peer
                )));
            }
        };
        debug!(conn_id = %self.conn_id, user = %user, peer = %self.peer, "Connection active");
        self.transition(ConnState::Active);

        self.tracker
            .spawn(serve_global_requests(globals).in_current_span());

        while let Some(offer) = offers.recv().await {
            self.dispatch(offer);
        }

        self.transition(ConnState::Draining);
        self.tracker.close();
        self.tracker.wait().await;
        self.transition(ConnState::Closed);
        Ok(())
    }

    fn dispatch(&self, offer: ChannelOffer) {
        debug!(conn_id = %self.conn_id, kind = %offer.kind(), "Channel offer");
        match offer {
            ChannelOffer::Session {
                channel,
                io,
                requests,
                decision,
            } => {
                let span = info_span!("session", channel = ?io.id);
                let session = SessionChannel::new(channel, io);
                self.tracker.spawn(session.run(requests).instrument(span));
                let _ = decision.send(OpenDecision::Accept);
            }
            ChannelOffer::DirectTcpip {
                channel,
                target,
                requests,
                decision,
            } => {
                let span = info_span!("forward", target = %target.address());
                self.tracker.spawn(
                    forward::handle_forward(channel, target, requests, decision).instrument(span),
                );
            }
            ChannelOffer::Unsupported { kind, decision } => {
                debug!(conn_id = %self.conn_id, kind = %kind, "Channel type rejected");
                let _ = decision.send(OpenDecision::Reject(RejectReason::Prohibited));
            }
        }
    }
}

/// Acknowledge every global request without acting on it.
async fn serve_global_requests(mut globals: mpsc::UnboundedReceiver<GlobalRequest>) {
    while let Some(request) = globals.recv().await {
        debug!(kind = %request.kind, "Global request acknowledged");
        let _ = request.reply.send(true);
    }
}
