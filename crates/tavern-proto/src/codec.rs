//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! CBOR envelope. The reader enforces a caller-supplied maximum size before
//! allocating; the batch writer concatenates already-encoded frames into
//! one buffer so a backlog drains with a single transport write.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Envelope, ProtocolError};

/// Read one frame, failing fast on an oversized length prefix.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Envelope, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(ProtocolError::FrameTooLarge { size: len, max: max_size });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Envelope::decode(&buf)
}

/// Write one already-encoded frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Bytes) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_frames(writer, std::slice::from_ref(frame)).await
}

/// Write a batch of already-encoded frames as a single transport write.
pub async fn write_frames<W>(writer: &mut W, frames: &[Bytes]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = frames.iter().map(|f| f.len() + 4).sum();
    let mut buf = BytesMut::with_capacity(total);
    for frame in frames {
        buf.put_u32(frame.len() as u32);
        buf.put_slice(frame);
    }

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let frame = Envelope::bare(kind::PING).encode().unwrap();
        write_frame(&mut client, &frame).await.unwrap();

        let decoded = read_frame(&mut server, 1024).await.unwrap();
        assert_eq!(decoded.kind, kind::PING);
    }

    #[tokio::test]
    async fn batched_frames_arrive_in_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frames: Vec<Bytes> = ["a", "b", "c"]
            .iter()
            .map(|k| Envelope::bare(*k).encode().unwrap())
            .collect();
        write_frames(&mut client, &frames).await.unwrap();

        for expected in ["a", "b", "c"] {
            let decoded = read_frame(&mut server, 1024).await.unwrap();
            assert_eq!(decoded.kind, expected);
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_read() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Claim a gigantic frame without sending the body.
        client.write_all(&0xffff_ffffu32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 2048).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 2048, .. }));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0x01, 0x02]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, 2048).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
