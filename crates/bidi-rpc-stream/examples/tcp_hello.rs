//! Serve a `hello` method over TCP and call it from a client on the same
//! process.

use proven_bidi_rpc::{Connection, Error as SessionError, Invocation, Passive, Server};
use proven_bidi_rpc_stream::{StreamConfig, StreamServer, connect};

use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Server::new(|session: Connection| async move {
        session
            .register("hello", |call: Invocation| async move {
                let name: String = call.arg(0)?;
                Ok::<_, SessionError>(json!(format!("Hello, {name}!")))
            })
            .await
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = Arc::new(StreamServer::new(server, StreamConfig::default()));
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let client = connect(addr, Passive, &StreamConfig::default()).await?;
    client.ready().await?;

    let greeting = client
        .remote()
        .invoke("hello", vec![json!("world")])
        .await?;
    info!(%greeting, "Received");

    client.close();
    server.shutdown();
    serving.await??;
    Ok(())
}
