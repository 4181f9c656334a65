//! Line codec — frames a TCP byte stream into UTF-8 text lines.
//!
//! Splits on `\n` (a trailing `\r` is tolerated and stripped), and
//! serializes outgoing lines with `\n` termination. Invalid UTF-8 consumes
//! the offending line from the buffer, so a session can report it back to
//! the client and keep decoding.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line length (excluding the terminator). Anything longer is a
/// misbehaving client, not chat.
const MAX_LINE_LENGTH: usize = 8192;

/// Codec error: a framing failure or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames text lines on `\n` boundaries.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|&b| b == b'\n') else {
            // No complete line yet. Check if the buffer is getting too large.
            if src.len() > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }
            return Ok(None);
        };

        // Extract the line (without the terminator), advance the buffer.
        let line_bytes = src.split_to(pos);
        src.advance(1); // skip \n

        let bytes: &[u8] = &line_bytes;
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

        // The bad line is already consumed, so the caller may keep decoding.
        match std::str::from_utf8(bytes) {
            Ok(line) => Ok(Some(line.to_owned())),
            Err(_) => Err(CodecError::InvalidUtf8),
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_complete_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("hello there\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "hello there");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_strips_carriage_return() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("hello\r\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "hello");
    }

    #[test]
    fn decode_partial_line_then_complete() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("hel");

        // Not enough data yet.
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // More data arrives.
        buf.extend_from_slice(b"lo\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "hello");
    }

    #[test]
    fn decode_two_lines_in_one_read() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("first\nsecond\n");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "second");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_preserves_cyrillic() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("привет\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "привет");
    }

    #[test]
    fn decode_rejects_oversized_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::LineTooLong));
    }

    #[test]
    fn decode_empty_buffer() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_invalid_utf8_consumes_line_and_recovers() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n'][..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8));

        // The bad line was consumed; the next line decodes cleanly.
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "ok");
        assert!(buf.is_empty());
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        codec.encode("hello".to_owned(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"hello\n");
    }

    #[test]
    fn encode_empty_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        codec.encode(String::new(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"\n");
    }
}
