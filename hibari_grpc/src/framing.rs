//! Length-prefixed message envelopes.
//!
//! Every message crosses the wire as a 5-byte prefix — one compressed-flag
//! byte and a big-endian u32 length — followed by exactly that many payload
//! bytes. The decoder is a two-state machine that accumulates partial reads
//! across HTTP/2 DATA chunks, so envelopes may arrive split at any byte
//! boundary.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::status::GrpcStatus;

/// Bytes preceding every payload: flag (1) + length (4).
pub const ENVELOPE_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub compressed: bool,
    pub payload: Bytes,
}

impl Envelope {
    pub fn plain(payload: impl Into<Bytes>) -> Self {
        Self {
            compressed: false,
            payload: payload.into(),
        }
    }

    pub fn compressed(payload: impl Into<Bytes>) -> Self {
        Self {
            compressed: true,
            payload: payload.into(),
        }
    }
}

/// Appends the wire form of `envelope` to `buf`.
pub fn encode_envelope(envelope: &Envelope, buf: &mut BytesMut) {
    buf.reserve(ENVELOPE_HEADER_LEN + envelope.payload.len());
    buf.put_u8(envelope.compressed as u8);
    buf.put_u32(envelope.payload.len() as u32);
    buf.extend_from_slice(&envelope.payload);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The announced payload length exceeds the configured maximum. Checked
    /// at the prefix, before any payload bytes are buffered.
    MessageTooLarge { len: usize, max: usize },
    /// The flag byte was neither 0 nor 1.
    InvalidFlag(u8),
    /// The stream ended in the middle of an envelope.
    Truncated,
}

impl FrameError {
    pub(crate) fn to_grpc_status(&self) -> GrpcStatus {
        match self {
            Self::MessageTooLarge { len, max } => GrpcStatus::resource_exhausted(format!(
                "message of {} bytes exceeds the {} byte limit",
                len, max
            )),
            Self::InvalidFlag(flag) => {
                GrpcStatus::internal(format!("invalid message flag 0x{:02x}", flag))
            }
            Self::Truncated => GrpcStatus::internal("stream ended mid-message"),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooLarge { len, max } => {
                write!(f, "message length {} exceeds maximum {}", len, max)
            }
            Self::InvalidFlag(flag) => write!(f, "invalid envelope flag 0x{:02x}", flag),
            Self::Truncated => write!(f, "truncated envelope"),
        }
    }
}

impl std::error::Error for FrameError {}

enum DecodeState {
    Header,
    Body { compressed: bool, len: usize },
}

/// Incremental envelope decoder.
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            state: DecodeState::Header,
            max_message_size,
        }
    }

    /// Feeds one transport chunk into the decoder.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete envelope, or `None` when more bytes are
    /// needed. Errors are terminal for the stream.
    pub fn next(&mut self) -> Result<Option<Envelope>, FrameError> {
        if let DecodeState::Header = self.state {
            if self.buf.len() < ENVELOPE_HEADER_LEN {
                return Ok(None);
            }
            let flag = self.buf.get_u8();
            let compressed = match flag {
                0 => false,
                1 => true,
                other => return Err(FrameError::InvalidFlag(other)),
            };
            let len = self.buf.get_u32() as usize;
            if len > self.max_message_size {
                return Err(FrameError::MessageTooLarge {
                    len,
                    max: self.max_message_size,
                });
            }
            self.state = DecodeState::Body { compressed, len };
        }

        if let DecodeState::Body { compressed, len } = self.state {
            if self.buf.len() < len {
                return Ok(None);
            }
            let payload = self.buf.split_to(len).freeze();
            self.state = DecodeState::Header;
            return Ok(Some(Envelope {
                compressed,
                payload,
            }));
        }

        Ok(None)
    }

    /// Whether the stream may end here without losing bytes.
    pub fn is_clean(&self) -> bool {
        matches!(self.state, DecodeState::Header) && self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(envelope) = decoder.next().unwrap() {
            out.push(envelope);
        }
        out
    }

    #[test]
    fn test_encode_wire_layout() {
        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::plain(&b"hello"[..]), &mut buf);
        assert_eq!(&buf[..], b"\x00\x00\x00\x00\x05hello");

        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::compressed(&b"x"[..]), &mut buf);
        assert_eq!(&buf[..], b"\x01\x00\x00\x00\x01x");
    }

    #[test]
    fn test_decode_across_chunk_boundaries() {
        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::plain(&b"split me"[..]), &mut buf);

        let mut decoder = FrameDecoder::new(1024);
        // Feed one byte at a time; the envelope appears only at the end.
        for (i, byte) in buf.iter().enumerate() {
            decoder.push(&[*byte]);
            let got = decoder.next().unwrap();
            if i + 1 < buf.len() {
                assert!(got.is_none());
            } else {
                assert_eq!(got, Some(Envelope::plain(&b"split me"[..])));
            }
        }
        assert!(decoder.is_clean());
    }

    #[test]
    fn test_decode_back_to_back_envelopes() {
        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::plain(&b"a"[..]), &mut buf);
        encode_envelope(&Envelope::plain(&b""[..]), &mut buf);
        encode_envelope(&Envelope::compressed(&b"bc"[..]), &mut buf);

        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&buf);
        let got = decode_all(&mut decoder);
        assert_eq!(
            got,
            vec![
                Envelope::plain(&b"a"[..]),
                Envelope::plain(&b""[..]),
                Envelope::compressed(&b"bc"[..]),
            ]
        );
        assert!(decoder.is_clean());
    }

    #[test]
    fn test_oversized_length_rejected_at_header() {
        let mut decoder = FrameDecoder::new(16);
        // Announces 17 bytes; only the prefix is fed.
        decoder.push(b"\x00\x00\x00\x00\x11");
        assert_eq!(
            decoder.next(),
            Err(FrameError::MessageTooLarge { len: 17, max: 16 })
        );
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let mut decoder = FrameDecoder::new(16);
        decoder.push(b"\x02\x00\x00\x00\x00");
        assert_eq!(decoder.next(), Err(FrameError::InvalidFlag(2)));
    }

    #[test]
    fn test_partial_frame_is_not_clean() {
        let mut decoder = FrameDecoder::new(16);
        decoder.push(b"\x00\x00\x00\x00\x02a");
        assert!(decoder.next().unwrap().is_none());
        assert!(!decoder.is_clean());
    }

    quickcheck! {
        fn prop_envelope_round_trip(payloads: Vec<Vec<u8>>, flags: Vec<bool>) -> bool {
            let envelopes: Vec<Envelope> = payloads
                .into_iter()
                .zip(flags.into_iter().chain(std::iter::repeat(false)))
                .map(|(payload, compressed)| Envelope { compressed, payload: payload.into() })
                .collect();

            let mut buf = BytesMut::new();
            for envelope in &envelopes {
                encode_envelope(envelope, &mut buf);
            }

            let mut decoder = FrameDecoder::new(usize::MAX);
            decoder.push(&buf);
            let mut got = Vec::new();
            while let Ok(Some(envelope)) = decoder.next() {
                got.push(envelope);
            }
            got == envelopes && decoder.is_clean()
        }
    }
}
