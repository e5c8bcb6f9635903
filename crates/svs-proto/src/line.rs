//! CRLF line framing for tokio.
//!
//! Frames at `\n` (tolerating bare `\n` from legacy peers), strips the
//! terminator, and refuses lines longer than the configured maximum before
//! a terminator is seen. Outbound lines are capped to the same limit; the
//! daemon's mode and kick builders guarantee they never build past it.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtoError;
use crate::BUFSIZE;

/// Tokio codec producing one `String` per wire line.
pub struct LineCodec {
    max_len: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl LineCodec {
    /// Codec with the protocol default limit of [`BUFSIZE`] bytes.
    pub fn new() -> Self {
        Self::with_max_len(BUFSIZE)
    }

    /// Codec with a custom limit, for tests.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtoError> {
        loop {
            let newline = src.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        let _ = src.split_to(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            match newline {
                Some(pos) => {
                    let mut frame = src.split_to(pos + 1);
                    // Strip \n and an optional preceding \r.
                    frame.truncate(pos);
                    if frame.last() == Some(&b'\r') {
                        frame.truncate(frame.len() - 1);
                    }

                    let line = std::str::from_utf8(&frame)
                        .map_err(|_| ProtoError::InvalidUtf8)?
                        .to_owned();
                    return Ok(Some(line));
                }
                None if src.len() > self.max_len => {
                    self.discarding = true;
                    return Err(ProtoError::LineTooLong { max: self.max_len });
                }
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtoError;

    fn encode(&mut self, mut line: String, dst: &mut BytesMut) -> Result<(), ProtoError> {
        if line.len() + 2 > self.max_len {
            // Truncate on a char boundary rather than kill the link.
            let mut cut = self.max_len - 2;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(codec: &mut LineCodec, data: &str) -> Vec<Result<Option<String>, ProtoError>> {
        let mut buf = BytesMut::from(data.as_bytes());
        let mut out = Vec::new();
        loop {
            match codec.decode(&mut buf) {
                Ok(None) => break,
                other => out.push(other),
            }
        }
        out
    }

    #[test]
    fn splits_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let got = feed(&mut codec, "PING :a\r\nPONG :b\n");
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap().as_deref(), Some("PING :a"));
        assert_eq!(got[1].as_ref().unwrap().as_deref(), Some("PONG :b"));
    }

    #[test]
    fn oversized_line_is_discarded_not_fatal() {
        let mut codec = LineCodec::with_max_len(16);
        let long = format!("{} tail\r\nPING :x\r\n", "A".repeat(64));
        let got = feed(&mut codec, &long);
        assert!(matches!(got[0], Err(ProtoError::LineTooLong { .. })));
        assert_eq!(got[1].as_ref().unwrap().as_deref(), Some("PING :x"));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("PRIVMSG #c :hi".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PRIVMSG #c :hi\r\n");
    }

    #[test]
    fn encode_truncates_at_limit() {
        let mut codec = LineCodec::with_max_len(12);
        let mut buf = BytesMut::new();
        codec.encode("ABCDEFGHIJKLMNOP".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"ABCDEFGHIJ\r\n");
    }
}
