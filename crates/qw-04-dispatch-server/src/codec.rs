//! # Wire Codec
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────┐
//! │ length (u32 BE)│ bincode(Frame { version, message })  │
//! └────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Frames larger than [`MAX_FRAME_LENGTH`] are refused before allocation.

use crate::errors::CodecError;
use shared_types::{Frame, WireMessage, MAX_FRAME_LENGTH, PROTOCOL_VERSION};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Length-prefixed bincode codec for [`WireMessage`].
#[derive(Debug)]
pub struct WireCodec {
    frames: LengthDelimitedCodec,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, CodecError> {
        let Some(payload) = self.frames.decode(src)? else {
            return Ok(None);
        };
        let frame: Frame = bincode::deserialize(&payload)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: frame.version,
                expected: PROTOCOL_VERSION,
            });
        }
        Ok(Some(frame.message))
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = CodecError;

    fn encode(&mut self, message: WireMessage, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = bincode::serialize(&Frame::new(message))?;
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
