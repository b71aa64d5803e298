//! Packet framing for the TCP transport.
//!
//! Every packet is sent as one length-prefixed frame:
//!
//! ```text
//! [u32 BE: len][i32 BE: channel][u8: has_id][16 bytes: id, if has_id][payload]
//! ```

use super::Packet;
use crate::buffer::{DataBuf, DataBufMut};
use crate::config::NetworkConfig;
use crate::error::{Result, RpcError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > NetworkConfig::MAX_PACKET_SIZE {
        return Err(RpcError::PacketTooLarge {
            size: len,
            max: NetworkConfig::MAX_PACKET_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > NetworkConfig::MAX_PACKET_SIZE {
        return Err(RpcError::PacketTooLarge {
            size: payload.len(),
            max: NetworkConfig::MAX_PACKET_SIZE,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a packet into a frame payload.
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let content = packet.content();
    let mut buf = DataBufMut::with_capacity(21 + content.readable_bytes());
    buf.write_int(packet.channel());
    buf.write_nullable(packet.unique_id(), |b, id| {
        b.write_unique_id(&id);
    });
    buf.write_raw(&content.remaining());
    buf.freeze().to_byte_array()
}

/// Decode a frame payload into a packet. The payload bytes are not copied.
pub fn decode_packet(frame: Vec<u8>) -> Result<Packet> {
    let mut buf = DataBuf::from(frame);
    let channel = buf.read_int()?;
    let unique_id = buf.read_nullable(DataBuf::read_unique_id)?;

    let mut packet = Packet::new(channel, buf);
    if let Some(id) = unique_id {
        packet = packet.with_unique_id(id);
    }
    Ok(packet)
}
