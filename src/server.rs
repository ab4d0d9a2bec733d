use crate::auth::CredentialStore;
use crate::error::ServerError;
use crate::ssh::dispatcher::ConnectionDispatcher;
use crate::ssh::handler::SshHandler;
use crate::utils::generate_correlation_id;

use russh::{MethodKind, MethodSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Identification string sent before the key exchange.
const SERVER_ID: &str = "SSH-2.0-sshdog";

/// TCP keep-alive interval for accepted sockets.
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Listener and owner of the host identities and credentials.
///
/// `stop` asks the accept loop to end; `wait` returns once the loop has
/// exited and the listening socket is closed. Connections already accepted
/// are left to drain on their own.
pub struct Server {
    store: Arc<CredentialStore>,
    ssh_config: Arc<russh::server::Config>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl Server {
    /// Fails with [`ServerError::NoHostIdentity`] when the store holds no host key.
    pub fn new(store: CredentialStore) -> Result<Self, ServerError> {
        if store.host_keys().is_empty() {
            return Err(ServerError::NoHostIdentity);
        }

        let mut ssh_config = russh::server::Config::default();
        ssh_config.keys = store.host_keys().to_vec();
        ssh_config.server_id = russh::SshId::Standard(SERVER_ID.to_string());
        ssh_config.methods = if store.password_enabled() {
            MethodSet::from([MethodKind::PublicKey, MethodKind::Password].as_slice())
        } else {
            MethodSet::from([MethodKind::PublicKey].as_slice())
        };
        ssh_config.auth_rejection_time = Duration::from_secs(1);
        ssh_config.auth_rejection_time_initial = Some(Duration::from_secs(0));

        Ok(Self {
            store: Arc::new(store),
            ssh_config: Arc::new(ssh_config),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        })
    }

    /// Bind the TCP listener.
    pub async fn listen(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Bind `addr` and run the accept loop in the background. Returns the
    /// bound address, which differs from `addr` when port 0 was asked for.
    pub async fn listen_and_serve(self: &Arc<Self>, addr: &str) -> Result<SocketAddr, ServerError> {
        let listener = Self::listen(addr).await?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr = %local, "Listening");
        tokio::spawn(self.clone().serve(listener));
        Ok(local)
    }

    /// Accept connections until `stop` is called or `accept` fails. Every
    /// connection runs in its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("Stop requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        configure_tcp_socket(&stream);
                        let store = self.store.clone();
                        let config = self.ssh_config.clone();
                        tokio::spawn(handle_connection(store, config, stream, peer));
                    }
                    Err(e) => {
                        debug!(error = %e, "Accept failed, listener shutting down");
                        break;
                    }
                },
            }
        }
        drop(listener);
        info!("Listener closed");
        self.done.cancel();
    }

    /// Signal the accept loop to end. Further calls have no effect.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Resolve once the accept loop has exited. Returns immediately if it
    /// already has.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}

fn configure_tcp_socket(stream: &TcpStream) {
    use socket2::SockRef;
    let sock = SockRef::from(stream);
    let ka = socket2::TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    let _ = sock.set_tcp_keepalive(&ka);
}

/// Run the transport and the dispatcher for one accepted socket. The
/// dispatcher finishes after every channel task it started, and only then
/// is the connection considered released.
async fn handle_connection(
    store: Arc<CredentialStore>,
    config: Arc<russh::server::Config>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let conn_id = generate_correlation_id();
    let span = info_span!("conn", conn_id = %conn_id, peer = %peer);

    async move {
        debug!("New SSH connection");
        let (handler, streams) = SshHandler::new(store, peer, conn_id.clone());
        let dispatcher = tokio::spawn(
            ConnectionDispatcher::new(conn_id, peer)
                .run(streams)
                .in_current_span(),
        );

        match russh::server::run_stream(config, stream, handler).await {
            Ok(session) => {
                if let Err(e) = session.await {
                    debug!(error = %e, "Transport ended with error");
                }
            }
            Err(e) => debug!(error = %e, "Handshake failed"),
        }

        match dispatcher.await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!(error = %e, "Connection dropped"),
            Err(e) => debug!(error = %e, "Dispatcher task failed"),
        }
    }
    .instrument(span)
    .await
}
