use crate::helpers::*;
use tokio::time::timeout;

#[tokio::test]
async fn stop_closes_listener_and_wait_returns_repeatedly() {
    let server = start_server(None).await;
    let addr = server.addr;

    server.server.stop();
    timeout(STEP_TIMEOUT, server.server.wait())
        .await
        .expect("wait should return after stop");
    timeout(STEP_TIMEOUT, server.server.wait())
        .await
        .expect("second wait must not block");

    assert!(
        tokio::net::TcpStream::connect(addr).await.is_err(),
        "listener should be closed"
    );
}

#[tokio::test]
async fn established_connection_survives_stop() {
    let server = start_server(None).await;
    let handle = connect_authenticated(&server).await;

    server.server.stop();
    server.server.wait().await;

    let out = exec(&handle, "echo still-here").await;
    assert_eq!(out.text(), "still-here\n");
    assert_eq!(out.exit_status, Some(0));
}
