//! Byte-stream transports for bidirectional RPC sessions.
//!
//! Frames [`proven_bidi_rpc::Message`] values as CBOR onto any
//! `AsyncRead + AsyncWrite` stream and drives sessions over them. Includes a
//! TCP accept loop and a client connector.
//!
//! # Example
//!
//! ```no_run
//! use proven_bidi_rpc::{Connection, Passive, Server};
//! use proven_bidi_rpc_stream::{StreamConfig, StreamServer, connect};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!
//!     let server = Arc::new(StreamServer::new(Server::new(Passive), StreamConfig::default()));
//!     tokio::spawn({
//!         let server = Arc::clone(&server);
//!         async move { server.serve(listener).await }
//!     });
//!
//!     let client: Connection = connect(addr, Passive, &StreamConfig::default()).await?;
//!     client.ready().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod error;
pub mod framing;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use error::{Error, Result};
pub use framing::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MessageCodec};
pub use server::StreamServer;
pub use transport::{StreamConfig, attach, connect, drive};
