//! End-to-end tests for the TCP command channel: echo round trip, error
//! replies, the capacity-1 backpressure policy, and listener resilience
//! against malformed peers.

use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use hearth_net::{CommandClient, CommandServer, NetError};

async fn start_server() -> (CommandServer, CommandClient) {
    let server = CommandServer::bind("127.0.0.1:0").await.expect("bind server");
    let client = CommandClient::new("127.0.0.1", server.local_addr().port());
    (server, client)
}

#[tokio::test]
async fn echo_round_trip() {
    let (mut server, client) = start_server().await;

    let request = tokio::spawn(async move { client.send(json!("echo hello")).await });

    let message = server.recv().await.expect("pending command");
    assert_eq!(message.payload(), &json!("echo hello"));
    message.send_reply(json!("hello")).await.expect("send reply");

    let reply = request.await.expect("join").expect("send");
    assert_eq!(reply, json!("hello"));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn error_reply_surfaces_as_remote_error() {
    let (mut server, client) = start_server().await;

    let request = tokio::spawn(async move { client.send(json!("explode")).await });

    let message = server.recv().await.expect("pending command");
    message.send_error("boom").await.expect("send error");

    let err = request.await.expect("join").expect_err("must fail");
    match err {
        NetError::Remote(message) => assert!(message.contains("boom")),
        other => panic!("expected remote error, got {other:?}"),
    }

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn capacity_one_queue_blocks_second_client() {
    let (mut server, client) = start_server().await;
    let second_client = client.clone();

    let first = tokio::spawn(async move { client.send(json!("first")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio::spawn(async move { second_client.send(json!("second")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The first command occupies the queue, so the second send is stalled.
    assert!(!second.is_finished(), "second send must block on backpressure");

    let message = server.recv().await.expect("first command");
    assert_eq!(message.payload(), &json!("first"));
    message.send_reply(json!("first-reply")).await.expect("reply first");

    let message = server.recv().await.expect("second command");
    assert_eq!(message.payload(), &json!("second"));
    message
        .send_reply(json!("second-reply"))
        .await
        .expect("reply second");

    // Each client receives its own reply, not the other's.
    assert_eq!(first.await.expect("join").expect("send"), json!("first-reply"));
    assert_eq!(
        second.await.expect("join").expect("send"),
        json!("second-reply")
    );

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn malformed_request_does_not_stop_the_listener() {
    let (mut server, client) = start_server().await;
    let addr = server.local_addr();

    // A framed payload that is not valid JSON.
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(&(7u32.to_le_bytes()))
        .await
        .expect("write prefix");
    stream.write_all(b"garbage").await.expect("write payload");
    drop(stream);

    // The listener must survive and serve the next well-formed request.
    let request = tokio::spawn(async move { client.send(json!("ping")).await });
    let message = server.recv().await.expect("pending command");
    message.send_reply(json!("pong")).await.expect("send reply");
    assert_eq!(request.await.expect("join").expect("send"), json!("pong"));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn unsupported_request_version_is_dropped() {
    let (mut server, _client) = start_server().await;
    let addr = server.local_addr();

    let payload = serde_json::to_vec(&json!({ "v": 9, "payload": "x" })).expect("encode");
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .expect("write prefix");
    stream.write_all(&payload).await.expect("write payload");

    // The server drops the connection without replying.
    assert!(
        server
            .recv_timeout(Duration::from_millis(200))
            .await
            .expect("listener alive")
            .is_none(),
        "version-mismatched request must not be queued"
    );

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn recv_timeout_returns_none_when_idle() {
    let (mut server, _client) = start_server().await;
    let got = server
        .recv_timeout(Duration::from_millis(50))
        .await
        .expect("listener alive");
    assert!(got.is_none());
    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn silent_peer_does_not_wedge_the_listener() {
    let (mut server, client) = start_server().await;

    // A peer that connects and never sends a frame. The bounded read must
    // give up on it so later well-formed clients are still served.
    let idle = TcpStream::connect(server.local_addr())
        .await
        .expect("connect idle peer");

    let request = tokio::spawn(async move { client.send(json!("ping")).await });

    let message = tokio::time::timeout(Duration::from_secs(3), server.recv())
        .await
        .expect("well-formed request must still be accepted")
        .expect("pending command");
    assert_eq!(message.payload(), &json!("ping"));
    message.send_reply(json!("pong")).await.expect("send reply");
    assert_eq!(request.await.expect("join").expect("send"), json!("pong"));

    drop(idle);
    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn connection_refused_propagates_to_caller() {
    // Bind and immediately drop a listener to obtain a dead port.
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let client = CommandClient::new("127.0.0.1", dead_port);
    let err = client.send(json!("ping")).await.expect_err("must fail");
    assert!(matches!(err, NetError::Io(_)));
}
