//! Message framing for byte streams.
//!
//! Each frame is a 4-byte big-endian payload length, a 4-byte CRC32 of the
//! payload (0 when not computed) and the CBOR-encoded message.

use crate::codec;
use crate::error::Error;

use bytes::{Buf, BufMut, BytesMut};
use proven_bidi_rpc::Message;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size (4 bytes length + 4 bytes checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload the length prefix can describe.
const MAX_PREFIXED_LEN: usize = u32::MAX as usize;

/// Codec turning a byte stream into protocol messages and back.
#[derive(Clone, Debug)]
pub struct MessageCodec {
    max_frame_size: usize,
    verify_checksum: bool,
}

impl MessageCodec {
    /// Create a new message codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            verify_checksum: true,
        }
    }

    /// Create a codec with custom max frame size, capped at what the 4-byte
    /// length prefix can carry.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = if size > MAX_PREFIXED_LEN {
            MAX_PREFIXED_LEN
        } else {
            size
        };
        self
    }

    /// Accept frames without checking their checksum.
    #[must_use]
    pub const fn without_checksum_verification(mut self) -> Self {
        self.verify_checksum = false;
        self
    }

    const fn check_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;
        let checksum = header.get_u32();

        self.check_size(payload_len)?;

        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        if self.verify_checksum && checksum != 0 {
            let actual = crc32fast::hash(&payload);
            if actual != checksum {
                return Err(Error::ChecksumMismatch {
                    expected: checksum,
                    actual,
                });
            }
        }

        codec::decode(&payload).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Error> {
        let payload = codec::encode(&message)?;
        self.check_size(payload.len())?;
        let length = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
            size: payload.len(),
            max: MAX_PREFIXED_LEN,
        })?;

        buf.reserve(FRAME_HEADER_SIZE + payload.len());

        buf.put_u32(length);
        buf.put_u32(crc32fast::hash(&payload));
        buf.put(payload);

        Ok(())
    }
}
