/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 *  SPDX-License-Identifier: Apache-2.0                                       *
\* -------------------------------------------------------------------------- */

//! Varint-length-delimited framing over a byte stream.

use prost::Message;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest legal varint prefix for a u64 length.
const MAX_VARINT_BYTES: usize = 10;

/// Refuse frames larger than this; no legitimate record comes close.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Reads one length-delimited message. Returns `Ok(None)` on a clean EOF
/// at a frame boundary.
pub async fn read_message<M, R>(reader: &mut R) -> io::Result<Option<M>>
where
    M: Message + Default,
    R: AsyncRead + Unpin,
{
    let len = match read_varint(reader).await? {
        Some(len) => len,
        None => return Ok(None),
    };

    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    let message = M::decode(buf.as_slice())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Some(message))
}

/// Writes one message with its varint length prefix and flushes.
pub async fn write_message<M, W>(writer: &mut W, message: &M) -> io::Result<()>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(message.encoded_len() + MAX_VARINT_BYTES);
    message
        .encode_length_delimited(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    writer.write_all(&buf).await?;
    writer.flush().await
}

async fn read_varint<R>(reader: &mut R) -> io::Result<Option<u64>>
where
    R: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            // EOF before the first byte is a closed connection, not an error
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        value |= u64::from(byte[0] & 0x7f) << (i * 7);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }

    Err(io::Error::new(io::ErrorKind::InvalidData, "varint prefix too long"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{ContainerRequest, CreateRequest};

    #[tokio::test]
    async fn test_round_trip() {
        let request = ContainerRequest {
            create: Some(CreateRequest { name: "a/b".to_string() }),
            ..ContainerRequest::default()
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &request).await.expect("write");

        let mut cursor = buf.as_slice();
        let decoded: ContainerRequest = read_message(&mut cursor)
            .await
            .expect("read")
            .expect("message present");

        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_eof_between_frames_is_none() {
        let mut empty: &[u8] = &[];
        let decoded: Option<ContainerRequest> =
            read_message(&mut empty).await.expect("clean eof");
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let request = ContainerRequest {
            create: Some(CreateRequest { name: "abc".to_string() }),
            ..ContainerRequest::default()
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &request).await.expect("write");
        buf.truncate(buf.len() - 1);

        let mut cursor = buf.as_slice();
        let result: io::Result<Option<ContainerRequest>> =
            read_message(&mut cursor).await;
        assert!(result.is_err());
    }
}
