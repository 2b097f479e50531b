//! Frame header
//!
//! Every control frame starts with six bytes: a magic byte, the message
//! type, and the payload length as a big-endian u32. Frames larger than
//! [`MAX_PAYLOAD_SIZE`] are refused on both ends; bulk traffic travels on
//! tunnel legs, never in frames.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

/// First byte of every frame
pub const FRAME_MAGIC: u8 = 0xB7;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 6;

/// Largest payload a frame may carry (4 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, payload_length: u32) -> Self {
        Self {
            message_type,
            payload_length,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(FRAME_MAGIC);
        dst.put_u8(self.message_type.as_u8());
        dst.put_u32(self.payload_length);
    }

    /// Take a header off the front of `src`.
    ///
    /// `Ok(None)` leaves `src` untouched until a whole header is buffered.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        if src[0] != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(src[0]));
        }
        let message_type =
            MessageType::from_u8(src[1]).ok_or(ProtocolError::UnknownMessageType(src[1]))?;

        src.advance(2);
        let payload_length = src.get_u32();
        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Some(Self {
            message_type,
            payload_length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        FrameHeader::new(MessageType::Reply, 0x0102_0304).encode(&mut buf);
        assert_eq!(&buf[..], &[FRAME_MAGIC, MessageType::Reply.as_u8(), 1, 2, 3, 4]);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.message_type, MessageType::Reply);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut buf = BytesMut::from(&[FRAME_MAGIC, 0x03, 0][..]);
        assert!(FrameHeader::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = BytesMut::from(&[0x16, 0x03, 0, 0, 0, 1][..]);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::BadMagic(0x16))
        ));
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = BytesMut::from(&[FRAME_MAGIC, 0xFE, 0, 0, 0, 10][..]);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::UnknownMessageType(0xFE))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(MessageType::Command, MAX_PAYLOAD_SIZE as u32 + 1).encode(&mut buf);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
