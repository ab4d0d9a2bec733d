use sshdog::auth::CredentialStore;
use sshdog::server::Server;

use russh::client::{self, Handle, Msg};
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg, PublicKey, PublicKeyBase64};
use russh::{Channel, ChannelMsg};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

/// Upper bound for any single wait on the server in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal russh client handler for testing
pub struct TestClientHandler;

impl client::Handler for TestClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A running server plus the fixtures it was started from.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<Server>,
    pub client_key: PrivateKey,
    pub passwd: Option<PathBuf>,
    pub _dir: TempDir,
}

pub fn random_key() -> PrivateKey {
    PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap()
}

pub fn authorized_keys_line(key: &PrivateKey) -> String {
    format!(
        "ssh-ed25519 {} test@sshdog",
        PublicKey::from(key).public_key_base64()
    )
}

/// Start a server on an ephemeral loopback port with one authorized client
/// key and, if `passwd` is given, password auth against that file content.
pub async fn start_server(passwd: Option<&str>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let client_key = random_key();

    let mut store = CredentialStore::new();
    store.generate_ephemeral_host_key().unwrap();
    store
        .add_authorized_keys(authorized_keys_line(&client_key).as_bytes())
        .unwrap();
    let passwd = passwd.map(|text| {
        let path = dir.path().join("passwd");
        std::fs::write(&path, text).unwrap();
        store.enable_passwords(path.clone());
        path
    });

    let server = Arc::new(Server::new(store).unwrap());
    let addr = server.listen_and_serve("127.0.0.1:0").await.unwrap();
    TestServer {
        addr,
        server,
        client_key,
        passwd,
        _dir: dir,
    }
}

pub async fn connect(addr: SocketAddr) -> Handle<TestClientHandler> {
    let config = Arc::new(client::Config::default());
    client::connect(config, addr, TestClientHandler).await.unwrap()
}

/// Connect and authenticate with the server's authorized client key.
pub async fn connect_authenticated(server: &TestServer) -> Handle<TestClientHandler> {
    let mut handle = connect(server.addr).await;
    let key = PrivateKeyWithHashAlg::new(Arc::new(server.client_key.clone()), None);
    let result = handle.authenticate_publickey("tester", key).await.unwrap();
    assert!(result.success(), "authorized key should log in");
    handle
}

/// Next success/failure reply on the channel, skipping data and window
/// adjustments.
pub async fn next_reply(channel: &mut Channel<Msg>) -> bool {
    loop {
        let msg = timeout(STEP_TIMEOUT, channel.wait())
            .await
            .expect("timed out waiting for a reply");
        match msg {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) => return false,
            Some(_) => continue,
            None => panic!("channel closed before replying"),
        }
    }
}

/// Everything a channel produced up to its close.
#[derive(Debug, Default)]
pub struct ChannelOutput {
    pub data: Vec<u8>,
    pub exit_status: Option<u32>,
    pub exit_status_count: usize,
    /// Success/failure replies seen while reading, in order.
    pub replies: Vec<bool>,
}

impl ChannelOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Read until the server closes the channel.
pub async fn collect(channel: &mut Channel<Msg>) -> ChannelOutput {
    let mut out = ChannelOutput::default();
    loop {
        let msg = timeout(STEP_TIMEOUT, channel.wait())
            .await
            .expect("timed out waiting for channel output");
        match msg {
            Some(ChannelMsg::Data { data }) => out.data.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, .. }) => out.data.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                out.exit_status = Some(exit_status);
                out.exit_status_count += 1;
            }
            Some(ChannelMsg::Success) => out.replies.push(true),
            Some(ChannelMsg::Failure) => out.replies.push(false),
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }
    out
}

/// Read data until `needle` shows up; returns what was read so far.
pub async fn read_until(channel: &mut Channel<Msg>, needle: &str) -> String {
    let mut seen = Vec::new();
    loop {
        let msg = timeout(STEP_TIMEOUT, channel.wait())
            .await
            .expect("timed out waiting for output");
        match msg {
            Some(ChannelMsg::Data { data }) => {
                seen.extend_from_slice(&data);
                let text = String::from_utf8_lossy(&seen).into_owned();
                if text.contains(needle) {
                    return text;
                }
            }
            Some(_) => {}
            None => panic!(
                "channel closed before {:?} appeared in {:?}",
                needle,
                String::from_utf8_lossy(&seen)
            ),
        }
    }
}

/// Open a session channel and run `command` to completion.
pub async fn exec(handle: &Handle<TestClientHandler>, command: &str) -> ChannelOutput {
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, command).await.unwrap();
    let out = collect(&mut channel).await;
    assert_eq!(out.replies.first(), Some(&true), "exec should be accepted");
    out
}

/// Spawn a TCP echo server on loopback; returns its port.
pub async fn tcp_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A loopback listener whose accept queue is already full, so a further
/// connect to it neither succeeds nor fails until the client gives up.
pub struct StalledTarget {
    pub port: u16,
    _listener: socket2::Socket,
    _queued: Vec<std::net::TcpStream>,
}

pub fn stalled_target() -> StalledTarget {
    use socket2::{Domain, Socket, Type};

    let listener = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    listener.bind(&bind.into()).unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap().as_socket().unwrap();

    let mut queued = Vec::new();
    for _ in 0..16 {
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => queued.push(stream),
            Err(_) => break,
        }
    }
    StalledTarget {
        port: addr.port(),
        _listener: listener,
        _queued: queued,
    }
}

/// Whether an `scp` binary is on PATH for the server to run.
pub fn scp_available() -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join("scp").is_file()))
        .unwrap_or(false)
}

/// Wait for the copy protocol's zero-byte acknowledgement, skipping request
/// replies and window adjustments.
pub async fn expect_ack(channel: &mut Channel<Msg>) {
    loop {
        let msg = timeout(STEP_TIMEOUT, channel.wait())
            .await
            .expect("timed out waiting for scp ack");
        match msg {
            Some(ChannelMsg::Data { data }) => {
                assert_eq!(data.first(), Some(&0u8), "scp answered {:?}", String::from_utf8_lossy(&data));
                return;
            }
            Some(ChannelMsg::ExtendedData { data, .. }) => {
                panic!("scp error output: {:?}", String::from_utf8_lossy(&data))
            }
            Some(ChannelMsg::Failure) => panic!("exec of scp refused"),
            Some(ChannelMsg::Close) | None => panic!("channel closed during scp transfer"),
            Some(_) => {}
        }
    }
}

/// Upload `body` to `dest` through the server's copy handler.
pub async fn scp_upload(handle: &Handle<TestClientHandler>, dest: &std::path::Path, body: &[u8]) -> ChannelOutput {
    let mut channel = handle.channel_open_session().await.unwrap();
    channel
        .exec(true, format!("scp -t {}", dest.display()))
        .await
        .unwrap();
    expect_ack(&mut channel).await;

    let header = format!("C0644 {} upload\n", body.len());
    channel.data(header.as_bytes()).await.unwrap();
    expect_ack(&mut channel).await;

    channel.data(body).await.unwrap();
    channel.data(&b"\0"[..]).await.unwrap();
    expect_ack(&mut channel).await;

    channel.eof().await.unwrap();
    collect(&mut channel).await
}
