//! Sessions over real byte streams

use proven_bidi_rpc::{Connection, Error as SessionError, Invocation, Passive, Server};
use proven_bidi_rpc_stream::*;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use proven_bidi_rpc::Message;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::Encoder;

const LIMIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn hello() -> Server {
    Server::new(|session: Connection| async move {
        session
            .register("hello", |call: Invocation| async move {
                let name: String = call.arg(0)?;
                Ok::<_, SessionError>(json!(format!("Hello, {name}!")))
            })
            .await
    })
}

#[tokio::test]
async fn test_hello_world_over_duplex() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64);
    let config = StreamConfig::default();

    let conn = hello().create_connection();
    let client = Connection::passive();
    let server_driver = attach(left, conn, &config);
    let client_driver = attach(right, client.clone(), &config);

    timeout(LIMIT, client.ready()).await.unwrap().unwrap();
    let greeting = client
        .remote()
        .invoke("hello", vec![json!("world")])
        .await
        .unwrap();
    assert_eq!(greeting, json!("Hello, world!"));

    // Closing one end tears the other down through the stream.
    client.close();
    timeout(LIMIT, client_driver).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_driver).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_hello_world_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(StreamServer::new(hello(), StreamConfig::default()));
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let first = connect(addr, Passive, &StreamConfig::default()).await.unwrap();
    let second = connect(addr, Passive, &StreamConfig::default()).await.unwrap();
    for client in [&first, &second] {
        timeout(LIMIT, client.ready()).await.unwrap().unwrap();
    }

    let (first_remote, second_remote) = (first.remote(), second.remote());
    let (a, b) = tokio::join!(
        first_remote.invoke("hello", vec![json!("first")]),
        second_remote.invoke("hello", vec![json!("second")]),
    );
    assert_eq!(a.unwrap(), json!("Hello, first!"));
    assert_eq!(b.unwrap(), json!("Hello, second!"));

    server.shutdown();
    timeout(LIMIT, serving).await.unwrap().unwrap().unwrap();

    // Running sessions outlive the accept loop.
    let again = first.remote().invoke("hello", vec![json!("again")]).await;
    assert_eq!(again.unwrap(), json!("Hello, again!"));

    first.close();
    second.close();
}

#[tokio::test]
async fn test_shutdown_before_serve_starts() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let server = Arc::new(StreamServer::new(hello(), StreamConfig::default()));
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });
    // The accept loop has not been polled yet.
    server.shutdown();

    timeout(LIMIT, serving).await.unwrap().unwrap().unwrap();

    // Serving again after shutdown returns straight away.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    timeout(LIMIT, server.serve(listener)).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_side_methods_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The server calls back into whatever the client exposes.
    let server = Server::new(|session: Connection| async move {
        session
            .register("relay", |call: Invocation| async move {
                let text: String = call.arg(0)?;
                call.session()
                    .remote()
                    .invoke("shout", vec![json!(text)])
                    .await
            })
            .await
    });
    let server = Arc::new(StreamServer::new(server, StreamConfig::default()));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let client = connect(
        addr,
        |session: Connection| async move {
            session
                .register("shout", |call: Invocation| async move {
                    let text: String = call.arg(0)?;
                    Ok::<_, SessionError>(json!(text.to_uppercase()))
                })
                .await
        },
        &StreamConfig::default(),
    )
    .await
    .unwrap();

    timeout(LIMIT, client.ready()).await.unwrap().unwrap();
    let relayed = client
        .remote()
        .invoke("relay", vec![json!("quiet")])
        .await
        .unwrap();
    assert_eq!(relayed, json!("QUIET"));

    server.shutdown();
    client.close();
}

#[tokio::test]
async fn test_corrupt_frame_closes_session() {
    init_tracing();
    let (mut raw, io) = tokio::io::duplex(1024);
    let session = Connection::passive();
    let driver = attach(io, session.clone(), &StreamConfig::default());

    let pending = session.call("anything", vec![]);

    let mut buf = BytesMut::new();
    MessageCodec::new()
        .encode(Message::RemoteReady, &mut buf)
        .unwrap();
    // Flip a payload byte so the checksum no longer matches.
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;
    raw.write_all(&buf).await.unwrap();

    let outcome = timeout(LIMIT, pending).await.unwrap();
    assert!(matches!(outcome, Err(SessionError::ConnectionClosed)));
    timeout(LIMIT, driver).await.unwrap().unwrap().unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_frames_from_a_scripted_peer() {
    init_tracing();
    // Both sides open with the same handshake frame.
    let mut ready = BytesMut::new();
    MessageCodec::new()
        .encode(Message::RemoteReady, &mut ready)
        .unwrap();

    let io = tokio_test::io::Builder::new()
        .read(&ready)
        .write(&ready)
        .wait(Duration::from_millis(200))
        .build();
    let session = Connection::passive();
    let driver = attach(io, session.clone(), &StreamConfig::default());

    timeout(LIMIT, session.ready()).await.unwrap().unwrap();
    session.close();
    timeout(LIMIT, driver).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_attach_twice_fails() {
    init_tracing();
    let session = Connection::passive();
    let (io, _peer) = tokio::io::duplex(64);

    // Someone already drives this session by hand.
    let _outbound = session.take_outbound().unwrap();
    let outcome = timeout(LIMIT, drive(io, session.clone(), &StreamConfig::default()))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Err(Error::Session(SessionError::AlreadyAttached))
    ));

    session.close();
}
