//! Length-prefixed framing for [`Envelope`]s.
//!
//! ```text
//! 0       2       4               12      16
//! ┌───────┬───────┬───────────────┬───────┬──────────────────────┐
//! │version│ kind  │   sequence    │ size  │  JSON payload (size) │
//! └───────┴───────┴───────────────┴───────┴──────────────────────┘
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, BytesMut};
use hopctl_common::constants::MiB;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{Envelope, PayloadKind};

/// The current wire version.
pub const WIRE_VERSION: u16 = 1;

/// Frames larger than this are rejected before the payload is buffered.
pub const MAX_FRAME_SIZE: u32 = 4 * MiB;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported wire version: {0}")]
    Version(u16),
    #[error("Unknown payload kind: {0}")]
    Kind(u16),
    #[error("Frame too large: {0} bytes")]
    TooLarge(u32),
    #[error("Header does not match payload")]
    Mismatch,
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub kind: PayloadKind,
    pub sequence: u64,
    /// The size of the payload.
    pub size: u32,
}

impl Header {
    /// Returns the length of the header in bytes.
    #[inline]
    pub const fn len() -> usize {
        16
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Payload(Header),
}

#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Envelope;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < Header::len() {
                        return Ok(None);
                    }

                    let version = src.get_u16();
                    if version != WIRE_VERSION {
                        return Err(Error::Version(version));
                    }

                    let raw_kind = src.get_u16();
                    let kind = PayloadKind::from_u16(raw_kind).ok_or(Error::Kind(raw_kind))?;
                    let sequence = src.get_u64();
                    let size = src.get_u32();
                    if size > MAX_FRAME_SIZE {
                        return Err(Error::TooLarge(size));
                    }

                    src.reserve(size as usize);
                    self.state = State::Payload(Header { version, kind, sequence, size });
                }
                State::Payload(header) => {
                    if src.len() < header.size as usize {
                        return Ok(None);
                    }

                    let payload = src.split_to(header.size as usize);
                    self.state = State::Header;

                    let envelope: Envelope = serde_json::from_slice(&payload)?;
                    if envelope.kind() != header.kind || envelope.sequence != header.sequence {
                        return Err(Error::Mismatch);
                    }

                    return Ok(Some(envelope));
                }
            }
        }
    }
}

impl Encoder<Envelope> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Envelope>>::encode(self, &item, dst)
    }
}

impl Encoder<&Envelope> for Codec {
    type Error = Error;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(item)?;
        let size = u32::try_from(payload.len()).map_err(|_| Error::TooLarge(u32::MAX))?;
        if size > MAX_FRAME_SIZE {
            return Err(Error::TooLarge(size));
        }

        dst.reserve(Header::len() + payload.len());

        dst.put_u16(WIRE_VERSION);
        dst.put_u16(item.kind() as u16);
        dst.put_u64(item.sequence);
        dst.put_u32(size);
        dst.put_slice(&payload);

        tracing::trace!(kind = ?item.kind(), sequence = item.sequence, size, "encoded envelope");

        Ok(())
    }
}
