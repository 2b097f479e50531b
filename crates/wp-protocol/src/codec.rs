//! Tokio codecs for agent connections and UDP tunnel legs

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// Largest datagram a UDP tunnel leg can carry
pub const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    FrameHeader::new(message.message_type(), payload.len() as u32).encode(dst);
    dst.extend_from_slice(&payload);
    Ok(())
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&message, dst)
    }
}

/// Read exactly one frame from a stream without buffering past it.
///
/// Used for the first frame of a connection, after which the stream may
/// switch to raw relayed bytes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = BytesMut::zeroed(HEADER_SIZE);
    reader.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&mut header_buf)?
        .ok_or(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;

    let mut payload = vec![0u8; header.payload_length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

/// Write exactly one frame to a stream
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Length-prefixed datagram framing for UDP traffic inside a tunnel leg
///
/// Each datagram is a 2-byte big-endian length followed by the payload,
/// so datagram boundaries survive the trip through a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for DatagramCodec {
    type Error = ProtocolError;

    fn encode(&mut self, datagram: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        dst.reserve(2 + datagram.len());
        dst.put_u16(datagram.len() as u16);
        dst.extend_from_slice(&datagram);
        Ok(())
    }
}
