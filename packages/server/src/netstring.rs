//! Netstring framing: `<len>:<payload>,` with the length in ASCII decimal.
//!
//! The server acknowledges nothing itself; after each frame it sends it
//! waits for the peer to answer with an `ack` frame.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Reply a peer must send after every frame.
pub const ACK: &str = "ack";

/// Errors from reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum NetstringError {
    /// Socket failure, including the peer closing mid-frame.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The length prefix is not a decimal number.
    #[error("bad length prefix: {message}")]
    Length {
        /// What was read instead.
        message: String,
    },

    /// The length exceeds [`MAX_FRAME_BYTES`].
    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLong { len: usize, max: usize },

    /// The payload is not followed by `,`.
    #[error("missing frame terminator")]
    Terminator,

    /// The payload is not UTF-8.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The peer answered a frame with something other than `ack`.
    #[error("expected ack, got {reply:?}")]
    NoAck {
        /// The reply received, if any.
        reply: Option<String>,
    },

    /// An outgoing message could not be encoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Frames `payload`.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 12);
    frame.extend_from_slice(payload.len().to_string().as_bytes());
    frame.push(b':');
    frame.extend_from_slice(payload);
    frame.push(b',');
    frame
}

/// Reads one frame. Returns `None` if the peer closed the connection
/// before sending anything.
///
/// # Errors
///
/// Returns [`NetstringError`] for a malformed or oversized frame, invalid
/// UTF-8, or a socket failure.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<String>, NetstringError> {
    let mut digits = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && digits.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match byte {
            b':' if !digits.is_empty() => break,
            b'0'..=b'9' if digits.len() < 20 => digits.push(byte),
            _ => {
                digits.push(byte);
                return Err(NetstringError::Length {
                    message: String::from_utf8_lossy(&digits).into_owned(),
                });
            }
        }
    }

    let len_text = String::from_utf8_lossy(&digits);
    let len: usize = len_text.parse().map_err(|_| NetstringError::Length {
        message: len_text.to_string(),
    })?;
    if len > MAX_FRAME_BYTES {
        return Err(NetstringError::TooLong {
            len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    if reader.read_u8().await? != b',' {
        return Err(NetstringError::Terminator);
    }
    Ok(Some(String::from_utf8(payload)?))
}

/// # Errors
///
/// Returns [`NetstringError::Io`] if the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> Result<(), NetstringError> {
    writer.write_all(&encode(payload.as_bytes())).await?;
    writer.flush().await?;
    Ok(())
}

/// Sends `message` as JSON and waits for the peer's `ack`.
///
/// # Errors
///
/// Returns [`NetstringError::NoAck`] if the peer answers with anything
/// else or hangs up, or another [`NetstringError`] on failure.
pub async fn send_json<S, T>(stream: &mut S, message: &T) -> Result<(), NetstringError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    write_frame(stream, &serde_json::to_string(message)?).await?;
    match read_frame(stream).await? {
        Some(reply) if reply == ACK => Ok(()),
        reply => Err(NetstringError::NoAck { reply }),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[test]
    fn frames_carry_byte_length() {
        assert_eq!(encode(b"ping"), b"4:ping,");
        assert_eq!(encode("café".as_bytes()), "5:café,".as_bytes());
        assert_eq!(encode(b""), b"0:,");
    }

    #[tokio::test]
    async fn reads_consecutive_frames_then_eof() {
        let mut input: &[u8] = b"4:ping,3:ack,";
        assert_eq!(read_frame(&mut input).await.unwrap().as_deref(), Some("ping"));
        assert_eq!(read_frame(&mut input).await.unwrap().as_deref(), Some("ack"));
        assert_eq!(read_frame(&mut input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_malformed_frames() {
        let mut bad_len: &[u8] = b"x:ping,";
        assert!(matches!(read_frame(&mut bad_len).await, Err(NetstringError::Length { .. })));

        let mut no_comma: &[u8] = b"4:ping;";
        assert!(matches!(read_frame(&mut no_comma).await, Err(NetstringError::Terminator)));

        let mut truncated: &[u8] = b"10:ping";
        assert!(matches!(read_frame(&mut truncated).await, Err(NetstringError::Io(_))));

        let mut huge: &[u8] = b"99999999:";
        assert!(matches!(read_frame(&mut huge).await, Err(NetstringError::TooLong { .. })));
    }

    #[tokio::test]
    async fn send_waits_for_ack() {
        let (mut server, mut client) = duplex(256);
        let peer = tokio::spawn(async move {
            let frame = read_frame(&mut client).await.unwrap().unwrap();
            write_frame(&mut client, ACK).await.unwrap();
            let _ = read_frame(&mut client).await.unwrap();
            write_frame(&mut client, "nope").await.unwrap();
            frame
        });

        send_json(&mut server, &serde_json::json!({"type": "pong"})).await.unwrap();
        let err = send_json(&mut server, &serde_json::json!({"type": "done"})).await.unwrap_err();
        assert!(matches!(err, NetstringError::NoAck { reply: Some(r) } if r == "nope"));
        assert_eq!(peer.await.unwrap(), r#"{"type":"pong"}"#);
    }
}
