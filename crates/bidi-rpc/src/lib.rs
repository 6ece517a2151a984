//! Symmetric bidirectional RPC sessions.
//!
//! Two peers joined by an ordered duplex message stream each expose a set of
//! named methods to the other and may call the other's methods. Both ends run
//! the same engine; "server" and "client" only name which side set up the
//! transport. Either side can grow or shrink its exposed interface at runtime
//! through an acknowledged register/deregister handshake.
//!
//! The engine works on structured [`Message`] values. Byte framing and the
//! physical transport live outside this crate; [`link`] wires two sessions
//! together in process.
//!
//! # Example
//!
//! ```no_run
//! use proven_bidi_rpc::{Connection, Error, Invocation, Server, link};
//! use serde_json::json;
//!
//! async fn example() -> Result<(), Error> {
//!     let server = Server::new(|session: Connection| async move {
//!         session
//!             .register("hello", |call: Invocation| async move {
//!                 let name: String = call.arg(0)?;
//!                 Ok::<_, Error>(json!(format!("Hello, {name}!")))
//!             })
//!             .await
//!     });
//!
//!     let conn = server.create_connection();
//!     let client = Connection::passive();
//!     let _link = link(&conn, &client)?;
//!
//!     client.ready().await?;
//!     let greeting = client.remote().invoke("hello", vec![json!("world")]).await?;
//!     assert_eq!(greeting, json!("Hello, world!"));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod error;
pub mod handler;
pub mod link;
pub mod methods;
pub mod outbound;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod sandbox;
pub mod server;

// Re-export commonly used types
pub use connection::{Connection, PendingCall, Progress, SessionConfig, SessionState};
pub use error::{Error, Result};
pub use handler::{Passive, StartupHandler};
pub use link::{Link, LinkConfig, link, link_with_config};
pub use methods::{Invocation, Method, MethodTable};
pub use outbound::{Outbound, Outbox};
pub use protocol::{Message, MessageId};
pub use remote::{Remote, RemoteMethod};
pub use server::Server;

// Re-export dependencies that are part of our public API
pub use serde_json::Value;
