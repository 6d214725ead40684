//! Length-prefixed frame I/O (spec §6):
//!
//! ```text
//! u32 little-endian length N  // length in bytes of the payload that follows
//! u8  tag                      // counts toward N
//! u8  body[N-1]                 // tag-specific payload (may be empty)
//! ```
//!
//! Warning: this is a private wire format. Do not read or write frames
//! without going through [`read_frame`] / [`write_frame`].

use crate::tags::{Tag, UnknownTag};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    UnknownTag(#[from] UnknownTag),
    #[error("frame declared zero length")]
    EmptyFrame,
}

/// Read one frame from an async duplex stream, blocking until the whole
/// frame has arrived.
pub async fn read_frame<S>(stream: &mut S) -> Result<(Tag, Vec<u8>), FramingError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let len = stream.read_u32_le().await?;
    if len == 0 {
        return Err(FramingError::EmptyFrame);
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;

    let tag = Tag::try_from(buf[0])?;
    let body = buf.split_off(1);
    Ok((tag, body))
}

/// Write one frame to an async duplex stream.
pub async fn write_frame<S>(stream: &mut S, tag: Tag, body: &[u8]) -> Result<(), FramingError>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let len = 1u32 + body.len() as u32;
    stream.write_u32_le(len).await?;
    stream.write_u8(tag.as_u8()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Parse a frame out of a buffer that may or may not carry the `u32` length
/// prefix (spec §6: "Legacy unframed fallback"). Prefer [`read_frame`] for
/// anything reading directly off a live stream; this exists for callers
/// that already have a whole datagram/message in hand (e.g. a transport
/// that delivers message boundaries itself) and must tolerate peers that
/// skip the length prefix.
pub fn parse_legacy_frame(frame: &[u8]) -> Result<(Tag, &[u8]), FramingError> {
    if frame.is_empty() {
        return Err(FramingError::EmptyFrame);
    }

    if frame.len() >= 5 {
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if len > 0 && frame.len() >= 4 + len as usize {
            let tag = Tag::try_from(frame[4])?;
            let body = if len > 1 { &frame[5..4 + len as usize] } else { &[] };
            return Ok((tag, body));
        }
    }

    let tag = Tag::try_from(frame[0])?;
    Ok((tag, &frame[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, Tag::Apply, b"{}").await.unwrap();
        let (tag, body) = read_frame(&mut b).await.unwrap();
        assert_eq!(tag, Tag::Apply);
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn round_trips_an_empty_body() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, Tag::Ping, &[]).await.unwrap();
        let (tag, body) = read_frame(&mut b).await.unwrap();
        assert_eq!(tag, Tag::Ping);
        assert!(body.is_empty());
    }

    #[test]
    fn legacy_fallback_treats_first_byte_as_tag() {
        let buf = [0xFEu8];
        let (tag, body) = parse_legacy_frame(&buf).unwrap();
        assert_eq!(tag, Tag::Ping);
        assert!(body.is_empty());
    }

    #[test]
    fn legacy_fallback_prefers_length_prefix_when_present() {
        let mut buf = vec![];
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.push(Tag::Apply.as_u8());
        buf.extend_from_slice(b"ab");
        let (tag, body) = parse_legacy_frame(&buf).unwrap();
        assert_eq!(tag, Tag::Apply);
        assert_eq!(body, b"ab");
    }
}
