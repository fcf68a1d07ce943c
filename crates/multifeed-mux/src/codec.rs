use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MuxError, MuxResult};
use crate::message::{MuxMessage, MAX_MESSAGE_SIZE};

/// Codec for session frames: `[4 bytes len (BE)][1 byte tag][bincode payload]`.
///
/// `len` counts the tag byte plus the payload.
#[derive(Clone, Copy, Debug)]
pub struct MuxCodec {
    max_message_size: usize,
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl MuxCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode a message with framing.
    pub fn encode(&self, msg: &MuxMessage) -> MuxResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| MuxError::Serialization(e.to_string()))?;
        if payload.len() > self.max_message_size {
            return Err(MuxError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one framed message from the front of `data`. Returns the
    /// message and the number of bytes it occupied.
    pub fn decode(&self, data: &[u8]) -> MuxResult<(MuxMessage, usize)> {
        if data.len() < 5 {
            return Err(MuxError::Framing("too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        self.check_len(len)?;
        let total = 4 + len;
        if data.len() < total {
            return Err(MuxError::Framing(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_body(data[4], &data[5..total])?;
        Ok((msg, total))
    }

    /// Read one frame. Returns `None` on a clean end of stream.
    pub async fn read_frame<R>(&self, reader: &mut R) -> MuxResult<Option<MuxMessage>>
    where
        R: AsyncRead + Unpin,
    {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.check_len(len)?;
        let mut frame = vec![0u8; 4 + len];
        frame[..4].copy_from_slice(&(len as u32).to_be_bytes());
        reader.read_exact(&mut frame[4..]).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                MuxError::Framing(format!("stream ended inside a {len}-byte frame"))
            } else {
                e.into()
            }
        })?;
        self.decode(&frame).map(|(msg, _)| Some(msg))
    }

    /// Write and flush one frame.
    pub async fn write_frame<W>(&self, writer: &mut W, msg: &MuxMessage) -> MuxResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode(msg)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    fn check_len(&self, len: usize) -> MuxResult<()> {
        if len < 1 {
            return Err(MuxError::Framing("zero-length frame".into()));
        }
        if len - 1 > self.max_message_size {
            return Err(MuxError::MessageTooLarge {
                size: len - 1,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn decode_body(tag: u8, payload: &[u8]) -> MuxResult<MuxMessage> {
        let msg: MuxMessage = bincode::deserialize(payload)
            .map_err(|e| MuxError::Deserialization(e.to_string()))?;
        if msg.type_tag() != tag {
            return Err(MuxError::InvalidMessageType(tag));
        }
        Ok(msg)
    }
}
