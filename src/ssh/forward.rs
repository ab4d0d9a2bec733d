use crate::error::ServerError;
use crate::ssh::request::{ForwardTarget, OpenDecision, RejectReason, RequestStream};

use anyhow::Result;
use russh::server::Msg;
use russh::Channel;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Buffer size for relay read operations (8 KiB)
const RELAY_BUFFER_SIZE: usize = 8192;

/// Upper bound on one outbound connect, name resolution included.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an offer may wait on its dial before it is answered. The
/// transport serves no other channel of the connection while an offer is
/// pending, so a slow dial is accepted first and finished afterwards.
pub const DECISION_WINDOW: Duration = Duration::from_millis(200);

/// Open the outbound connection for a forward. Any destination is allowed.
pub async fn dial(target: &ForwardTarget) -> Result<TcpStream, ServerError> {
    dial_within(target, DIAL_TIMEOUT).await
}

pub async fn dial_within(target: &ForwardTarget, limit: Duration) -> Result<TcpStream, ServerError> {
    let connect = TcpStream::connect((target.host.as_str(), target.port));
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => result.map_err(|source| ServerError::ForwardDial {
            target: target.address(),
            source,
        }),
        Err(_) => Err(ServerError::ForwardDial {
            target: target.address(),
            source: io::Error::new(io::ErrorKind::TimedOut, "connection timeout"),
        }),
    }
}

/// Serve one `direct-tcpip` offer.
///
/// A dial that fails inside [`DECISION_WINDOW`] rejects the offer without
/// the channel ever opening. A dial still running at the end of the window
/// gets the channel accepted; if it then fails, the channel is closed with
/// no data relayed.
pub async fn handle_forward(
    channel: Channel<Msg>,
    target: ForwardTarget,
    requests: RequestStream,
    decision: oneshot::Sender<OpenDecision>,
) {
    debug!(
        target = %target.address(),
        originator = %format!("{}:{}", target.originator_host, target.originator_port),
        "Forwarding request"
    );

    let mut dialing = Box::pin(dial(&target));
    let early = tokio::time::timeout(DECISION_WINDOW, &mut dialing).await;
    let outbound = match early {
        Ok(Err(e)) => {
            debug!(error = %e, "Forward connect failed");
            let _ = decision.send(OpenDecision::Reject(RejectReason::ConnectFailed));
            return;
        }
        Ok(Ok(stream)) => {
            if decision.send(OpenDecision::Accept).is_err() {
                debug!("Transport gone before forward was accepted");
                return;
            }
            Some(stream)
        }
        Err(_) => {
            debug!("Forward still connecting, accepting channel");
            if decision.send(OpenDecision::Accept).is_err() {
                debug!("Transport gone before forward was accepted");
                return;
            }
            None
        }
    };

    let refuser = tokio::spawn(refuse_requests(requests));
    let outbound = match outbound {
        Some(stream) => stream,
        None => match dialing.await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "Forward connect failed after accept");
                let _ = channel.eof().await;
                let _ = channel.close().await;
                refuser.abort();
                return;
            }
        },
    };

    let start = Instant::now();
    match relay(channel.into_stream(), outbound).await {
        Ok((bytes_up, bytes_down)) => info!(
            target = %target.address(),
            bytes_up,
            bytes_down,
            duration_ms = start.elapsed().as_millis() as u64,
            "Forward completed"
        ),
        Err(e) => debug!(target = %target.address(), error = %e, "Forward relay failed"),
    }
    refuser.abort();
}

/// Forward channels take no sub-requests; every one is answered with failure.
async fn refuse_requests(mut requests: RequestStream) {
    while let Some(pending) = requests.recv().await {
        debug!(request = %pending.request.kind(), "Refusing request on forward channel");
        pending.answer(false);
    }
}

/// Copy reader → writer until EOF or error, then half-close the writer.
async fn relay_one_direction<R, W>(mut reader: R, mut writer: W) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                total += n as u64;
            }
        }
    }
    let _ = writer.shutdown().await;
    total
}

/// Bidirectional relay; completes once both directions have ended.
/// Returns (bytes_up, bytes_down) where up is A→B.
pub async fn relay<A, B>(stream_a: A, stream_b: B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(stream_a);
    let (b_read, b_write) = tokio::io::split(stream_b);

    let up = tokio::spawn(relay_one_direction(a_read, b_write));
    let down = tokio::spawn(relay_one_direction(b_read, a_write));
    let (up, down) = tokio::join!(up, down);
    Ok((up?, down?))
}
