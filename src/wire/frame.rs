//! Raw frame read/write: a 4-byte big-endian unsigned length prefix
//! followed by that many payload bytes. Framing replaces line-delimited
//! encoding because sub-LLM request/response payloads routinely exceed
//! traditional line-message ceilings.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SandboxError;

/// Reads one length-prefixed frame from `reader`.
///
/// Fails closed: a length prefix describing a frame larger than
/// `max_frame_bytes` is a [`SandboxError::OversizedFrame`], not silently
/// truncated or read partially. EOF while reading the prefix or the
/// body is reported as [`SandboxError::ChildDied`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Vec<u8>, SandboxError> {
    let mut len_buf = [0_u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_eof(e, "reading frame length"))?;
    let len = u32::from_be_bytes(len_buf);

    if len > max_frame_bytes {
        return Err(SandboxError::OversizedFrame {
            actual: len,
            limit: max_frame_bytes,
        });
    }

    let mut payload = vec![0_u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| map_eof(e, "reading frame payload"))?;
    Ok(payload)
}

/// Writes `payload` as one length-prefixed frame to `writer`.
///
/// # Errors
/// Returns [`SandboxError::OversizedFrame`] if `payload` exceeds
/// `max_frame_bytes`, without attempting the write.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_frame_bytes: u32,
) -> Result<(), SandboxError> {
    let len = u32::try_from(payload.len()).map_err(|_| SandboxError::OversizedFrame {
        actual: u32::MAX,
        limit: max_frame_bytes,
    })?;
    if len > max_frame_bytes {
        return Err(SandboxError::OversizedFrame {
            actual: len,
            limit: max_frame_bytes,
        });
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(e: std::io::Error, context: &str) -> SandboxError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SandboxError::ChildDied(format!("connection closed while {context}"))
    } else {
        SandboxError::Io(e)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello", 1024)
            .await
            .unwrap_or_else(|e| panic!("write should succeed: {e}"));

        let mut cursor = std::io::Cursor::new(buf);
        let payload = read_frame(&mut cursor, 1024)
            .await
            .unwrap_or_else(|e| panic!("read should succeed: {e}"));
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let mut buf = Vec::new();
        let result = write_frame(&mut buf, &[0_u8; 10], 5).await;
        assert!(matches!(result, Err(SandboxError::OversizedFrame { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100_u32.to_be_bytes());
        buf.extend_from_slice(&[0_u8; 100]);
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, 10).await;
        assert!(matches!(result, Err(SandboxError::OversizedFrame { .. })));
    }

    #[tokio::test]
    async fn test_eof_reported_as_child_died() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, 1024).await;
        assert!(matches!(result, Err(SandboxError::ChildDied(_))));
    }
}
