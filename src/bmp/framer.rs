//! BMP Framer (C10): RFC 7854 length-prefixed message reassembly over a
//! persistent TCP stream.

use tokio::io::{AsyncReadExt, AsyncRead};

use crate::error::BmpParseError;

const COMMON_HEADER_SIZE: usize = 6;

#[derive(Debug)]
pub struct BmpFrame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Read exactly one BMP message off `stream`. Returns `Ok(None)` on a clean
/// EOF at a message boundary (the only non-error end-of-session case);
/// a short/early EOF mid-message surfaces as an `Err` so the caller can
/// close the connection without corrupting shared state (spec.md §4.10,
/// §8 "truncated trailing message").
pub async fn read_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<Option<BmpFrame>, BmpParseError> {
    let mut header = [0u8; COMMON_HEADER_SIZE];
    match read_exact_or_eof(stream, &mut header).await? {
        false => return Ok(None),
        true => {}
    };

    let version = header[0];
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let msg_type = header[5];

    if version != 3 {
        return Err(BmpParseError(format!("unsupported BMP version {}", version)));
    }
    if length < COMMON_HEADER_SIZE {
        return Err(BmpParseError(format!(
            "BMP message length {} shorter than common header",
            length
        )));
    }

    let mut payload = vec![0u8; length - COMMON_HEADER_SIZE];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| BmpParseError(format!("truncated BMP message body: {}", e)))?;

    Ok(Some(BmpFrame { msg_type, payload }))
}

/// Like `read_exact`, but treats EOF on the *first* byte as a clean
/// end-of-stream (`Ok(false)`) and any other short read as an error.
async fn read_exact_or_eof<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
) -> Result<bool, BmpParseError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|e| BmpParseError(format!("read error: {}", e)))?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(BmpParseError("truncated BMP common header".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_message(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(3); // version
        let length = (COMMON_HEADER_SIZE + payload.len()) as u32;
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(msg_type);
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn test_frames_concatenated_messages() {
        let mut buf = encode_message(4, b"hello");
        buf.extend(encode_message(0, b"world!"));
        let mut cursor = Cursor::new(buf);

        let first = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.msg_type, 4);
        assert_eq!(first.payload, b"hello");

        let second = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(second.msg_type, 0);
        assert_eq!(second.payload, b"world!");

        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_trailing_message_errors_cleanly() {
        let mut buf = encode_message(4, b"hello");
        buf.extend_from_slice(&[3, 0, 0, 0, 20, 0, 1, 2]); // claims 20 bytes, has far fewer
        let mut cursor = Cursor::new(buf);

        let first = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.payload, b"hello");

        assert!(read_frame(&mut cursor).await.is_err());
    }
}
