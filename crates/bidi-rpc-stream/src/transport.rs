//! Sessions over framed byte streams.

use crate::error::Result;
use crate::framing::{MAX_FRAME_SIZE, MessageCodec};

use proven_bidi_rpc::{Connection, SessionConfig, StartupHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, debug, debug_span, instrument, warn};

/// Configuration for byte-stream transports.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    /// Check frame checksums on receipt.
    pub verify_checksum: bool,
    /// Concurrent sessions a server accepts.
    pub max_connections: usize,
    /// Configuration for each session.
    pub session: SessionConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            verify_checksum: true,
            max_connections: 100,
            session: SessionConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Codec matching this configuration.
    #[must_use]
    pub const fn codec(&self) -> MessageCodec {
        let codec = MessageCodec::new().with_max_frame_size(self.max_frame_size);
        if self.verify_checksum {
            codec
        } else {
            codec.without_checksum_verification()
        }
    }
}

/// Drive `connection` over `io` until either direction ends.
///
/// # Errors
///
/// Returns an error if the session is already bound to a transport.
/// Failures of the stream itself end the session and are logged.
pub async fn drive<T>(io: T, connection: Connection, config: &StreamConfig) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send,
{
    let (reader, writer) = tokio::io::split(io);
    let inbound = FramedRead::new(reader, config.codec());
    let outbound = FramedWrite::new(writer, config.codec());

    connection.run(inbound, outbound).await?;
    debug!("Stream transport finished");
    Ok(())
}

/// Bind `connection` to `io` and drive it in the background.
///
/// Must be called within a Tokio runtime.
pub fn attach<T>(io: T, connection: Connection, config: &StreamConfig) -> JoinHandle<Result<()>>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let config = config.clone();
    tokio::spawn(
        async move {
            let outcome = drive(io, connection, &config).await;
            if let Err(e) = &outcome {
                warn!("Stream transport failed: {}", e);
            }
            outcome
        }
        .instrument(debug_span!("stream")),
    )
}

/// Connect to a server over TCP and start a session running `handler`.
///
/// # Errors
///
/// Returns an error if the TCP connection cannot be established.
#[instrument(skip(handler, config))]
pub async fn connect<A>(
    addr: A,
    handler: impl StartupHandler,
    config: &StreamConfig,
) -> Result<Connection>
where
    A: ToSocketAddrs + std::fmt::Debug,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("Connected to {:?}", stream.peer_addr()?);

    let connection = Connection::with_config(handler, config.session.clone());
    let _driver = attach(stream, connection.clone(), config);
    Ok(connection)
}
