use crate::auth::{pubkey, CredentialStore};
use crate::ssh::dispatcher::ConnectionStreams;
use crate::ssh::request::{
    ChannelIo, ChannelOffer, ForwardTarget, GlobalRequest, OpenDecision, PendingRequest, PtyParams,
    RejectReason, SessionRequest, WindowSize,
};
use std::sync::Arc;

use dashmap::DashMap;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Per-connection russh handler.
///
/// Authenticates against the [`CredentialStore`] and otherwise only
/// translates callbacks: channel opens become [`ChannelOffer`]s, connection
/// requests become [`GlobalRequest`]s, and channel requests are queued in
/// arrival order on the owning channel's request stream. Callbacks wait for
/// the answer so the peer's replies keep request order.
pub struct SshHandler {
    store: Arc<CredentialStore>,
    peer_addr: std::net::SocketAddr,
    conn_id: String,
    username: Option<String>,
    authenticated: Option<oneshot::Sender<String>>,
    offers: mpsc::UnboundedSender<ChannelOffer>,
    globals: mpsc::UnboundedSender<GlobalRequest>,
    channels: DashMap<ChannelId, mpsc::UnboundedSender<PendingRequest>>,
}

impl SshHandler {
    pub fn new(
        store: Arc<CredentialStore>,
        peer_addr: std::net::SocketAddr,
        conn_id: String,
    ) -> (Self, ConnectionStreams) {
        let (auth_tx, authenticated) = oneshot::channel();
        let (offers_tx, offers) = mpsc::unbounded_channel();
        let (globals_tx, globals) = mpsc::unbounded_channel();
        let handler = Self {
            store,
            peer_addr,
            conn_id,
            username: None,
            authenticated: Some(auth_tx),
            offers: offers_tx,
            globals: globals_tx,
            channels: DashMap::new(),
        };
        let streams = ConnectionStreams {
            authenticated,
            offers,
            globals,
        };
        (handler, streams)
    }

    fn methods(&self) -> MethodSet {
        if self.store.password_enabled() {
            MethodSet::from([MethodKind::Password, MethodKind::PublicKey].as_slice())
        } else {
            MethodSet::from([MethodKind::PublicKey].as_slice())
        }
    }

    fn reject(&self) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(self.methods()),
            partial_success: false,
        }
    }

    fn accept(&mut self, user: &str) -> Auth {
        self.username = Some(user.to_string());
        if let Some(tx) = self.authenticated.take() {
            let _ = tx.send(user.to_string());
        }
        Auth::Accept
    }

    /// Hand an offer to the dispatcher and wait for its decision.
    async fn offer(
        &self,
        make: impl FnOnce(oneshot::Sender<OpenDecision>) -> ChannelOffer,
    ) -> OpenDecision {
        let (decision, decided) = oneshot::channel();
        let offer = make(decision);
        let kind = offer.kind().to_string();
        if self.offers.send(offer).is_err() {
            return OpenDecision::Reject(RejectReason::Prohibited);
        }
        match decided.await {
            Ok(decision) => {
                if let OpenDecision::Reject(reason) = decision {
                    debug!(conn_id = %self.conn_id, user = ?self.username, kind = %kind, reason = ?reason, "Channel open rejected");
                }
                decision
            }
            Err(_) => OpenDecision::Reject(RejectReason::Prohibited),
        }
    }

    fn open_request_stream(&self, id: ChannelId) -> mpsc::UnboundedReceiver<PendingRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(id, tx);
        rx
    }

    /// Queue `request` on its channel and wait for the channel's answer.
    /// A channel that is gone answers failure.
    async fn submit(&self, channel: ChannelId, request: SessionRequest) -> bool {
        let Some(tx) = self.channels.get(&channel).map(|tx| tx.clone()) else {
            debug!(conn_id = %self.conn_id, request = %request.kind(), "Request for unknown channel");
            return false;
        };
        let (reply, answered) = oneshot::channel();
        let pending = PendingRequest {
            request,
            reply: Some(reply),
        };
        if tx.send(pending).is_err() {
            return false;
        }
        answered.await.unwrap_or(false)
    }

    async fn submit_and_reply(&self, channel: ChannelId, request: SessionRequest, session: &mut Session) {
        if self.submit(channel, request).await {
            let _ = session.channel_success(channel);
        } else {
            let _ = session.channel_failure(channel);
        }
    }

    async fn global(&self, kind: &str) -> bool {
        let (reply, answered) = oneshot::channel();
        let request = GlobalRequest {
            kind: kind.to_string(),
            reply,
        };
        if self.globals.send(request).is_err() {
            return false;
        }
        answered.await.unwrap_or(false)
    }
}

impl russh::server::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(conn_id = %self.conn_id, user = %user, "Auth none requested");
        Ok(self.reject())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if !self.store.password_enabled() {
            debug!(conn_id = %self.conn_id, user = %user, "Password auth failed: passwords disabled");
            return Ok(self.reject());
        }
        match self.store.verify_password(user, password) {
            Ok(()) => {
                info!(conn_id = %self.conn_id, user = %user, ip = %self.peer_addr.ip(), "Password auth success");
                Ok(self.accept(user))
            }
            Err(e) => {
                debug!(conn_id = %self.conn_id, user = %user, error = %e, "Password auth failed");
                Ok(self.reject())
            }
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = pubkey::fingerprint(public_key);
        match self.store.verify_public_key(user, public_key) {
            Ok(()) => {
                info!(
                    conn_id = %self.conn_id,
                    user = %user,
                    ip = %self.peer_addr.ip(),
                    fingerprint = %fingerprint,
                    "Public key auth success"
                );
                Ok(self.accept(user))
            }
            Err(e) => {
                debug!(conn_id = %self.conn_id, fingerprint = %fingerprint, error = %e, "Public key auth failed");
                Ok(self.reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let io = ChannelIo {
            id,
            handle: session.handle(),
        };
        let requests = self.open_request_stream(id);
        let decision = self
            .offer(|decision| ChannelOffer::Session {
                channel,
                io,
                requests,
                decision,
            })
            .await;
        if !decision.is_accept() {
            self.channels.remove(&id);
        }
        Ok(decision.is_accept())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = match ForwardTarget::new(
            host_to_connect,
            port_to_connect,
            originator_address,
            originator_port,
        ) {
            Ok(target) => target,
            Err(e) => {
                debug!(conn_id = %self.conn_id, error = %e, "Forward rejected");
                return Ok(false);
            }
        };
        let id = channel.id();
        let requests = self.open_request_stream(id);
        let decision = self
            .offer(|decision| ChannelOffer::DirectTcpip {
                channel,
                target,
                requests,
                decision,
            })
            .await;
        if !decision.is_accept() {
            self.channels.remove(&id);
        }
        Ok(decision.is_accept())
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, originator = %format!("{}:{}", originator_address, originator_port), "X11 channel offered");
        drop(channel);
        let decision = self
            .offer(|decision| ChannelOffer::Unsupported {
                kind: "x11".into(),
                decision,
            })
            .await;
        Ok(decision.is_accept())
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, host = %host_to_connect, port = port_to_connect, "Forwarded-tcpip channel offered");
        drop(channel);
        let decision = self
            .offer(|decision| ChannelOffer::Unsupported {
                kind: "forwarded-tcpip".into(),
                decision,
            })
            .await;
        Ok(decision.is_accept())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        if self.channels.remove(&channel).is_some() {
            debug!(conn_id = %self.conn_id, channel = ?channel, "Channel closed by peer");
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let params = PtyParams {
            term: term.to_string(),
            size: WindowSize::from_wire(col_width, row_height, pix_width, pix_height),
        };
        self.submit_and_reply(channel, SessionRequest::PtyReq(params), session)
            .await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = SessionRequest::Env {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.submit_and_reply(channel, request, session).await;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.submit_and_reply(channel, SessionRequest::Shell, session)
            .await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.submit_and_reply(channel, SessionRequest::Exec(data.to_vec()), session)
            .await;
        Ok(())
    }

    /// window-change never carries a reply; the outcome is only logged.
    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let size = WindowSize::from_wire(col_width, row_height, pix_width, pix_height);
        if let Some(tx) = self.channels.get(&channel) {
            let _ = tx.send(PendingRequest {
                request: SessionRequest::WindowChange(size),
                reply: None,
            });
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = SessionRequest::Other(format!("subsystem:{}", name));
        self.submit_and_reply(channel, request, session).await;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.submit_and_reply(channel, SessionRequest::Other("x11-req".into()), session)
            .await;
        Ok(())
    }

    async fn agent_request(&mut self, channel: ChannelId, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(self
            .submit(channel, SessionRequest::Other("auth-agent-req@openssh.com".into()))
            .await)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, address = %address, port = *port, "tcpip-forward received");
        Ok(self.global("tcpip-forward").await)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, address = %address, port, "cancel-tcpip-forward received");
        Ok(self.global("cancel-tcpip-forward").await)
    }

    async fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, path = %socket_path, "streamlocal-forward received");
        Ok(self.global("streamlocal-forward@openssh.com").await)
    }

    async fn cancel_streamlocal_forward(
        &mut self,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn_id = %self.conn_id, path = %socket_path, "cancel-streamlocal-forward received");
        Ok(self.global("cancel-streamlocal-forward@openssh.com").await)
    }
}
