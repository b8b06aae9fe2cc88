//! Message compression codings negotiated via `grpc-encoding` /
//! `grpc-accept-encoding`.
//!
//! `identity`, `gzip` and `deflate` are implemented; other registered names
//! (`snappy`, `zstd`, ...) are carried through negotiation but decode as
//! unsupported, which the framing layer reports as `Unimplemented`.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Coding {
    Identity,
    Gzip,
    Deflate,
    /// A coding named by the peer that this engine does not implement.
    Other(String),
}

impl Coding {
    pub fn parse(name: &str) -> Coding {
        match name.trim() {
            "identity" => Coding::Identity,
            "gzip" => Coding::Gzip,
            "deflate" => Coding::Deflate,
            other => Coding::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Coding::Identity => "identity",
            Coding::Gzip => "gzip",
            Coding::Deflate => "deflate",
            Coding::Other(name) => name,
        }
    }

    /// Whether compressed envelopes in this coding can be decoded here.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Coding::Other(_))
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The codings this engine can decode, in preference order.
pub fn supported_codings() -> &'static [Coding] {
    static SUPPORTED: Lazy<Vec<Coding>> =
        Lazy::new(|| vec![Coding::Identity, Coding::Gzip, Coding::Deflate]);
    &SUPPORTED
}

/// The `grpc-accept-encoding` value advertising [`supported_codings`].
pub fn accept_encoding_value() -> &'static str {
    static VALUE: Lazy<String> = Lazy::new(|| {
        supported_codings()
            .iter()
            .map(Coding::name)
            .collect::<Vec<_>>()
            .join(",")
    });
    &VALUE
}

#[derive(Debug)]
pub enum CompressionError {
    /// The peer flagged an envelope as compressed under a coding this engine
    /// does not implement (or under `identity`).
    Unsupported(String),
    /// The compressed payload was malformed.
    Corrupt(String),
    /// The decompressed payload exceeds the configured maximum.
    TooLarge { limit: usize },
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(name) => write!(f, "unsupported message encoding {:?}", name),
            Self::Corrupt(msg) => write!(f, "corrupt compressed message: {}", msg),
            Self::TooLarge { limit } => {
                write!(f, "decompressed message exceeds the limit of {} bytes", limit)
            }
        }
    }
}

impl std::error::Error for CompressionError {}

impl CompressionError {
    pub(crate) fn to_grpc_status(&self) -> crate::status::GrpcStatus {
        use crate::status::GrpcStatus;
        match self {
            Self::Unsupported(name) => {
                GrpcStatus::unimplemented(format!("message encoding {:?} is not supported", name))
            }
            Self::TooLarge { limit } => GrpcStatus::resource_exhausted(format!(
                "decompressed message exceeds the {} byte limit",
                limit
            )),
            Self::Corrupt(_) => GrpcStatus::internal("corrupt compressed message"),
        }
    }
}

/// Compresses an outbound payload. `Identity` passes the bytes through.
pub fn compress(coding: &Coding, payload: &[u8]) -> Result<Bytes, CompressionError> {
    match coding {
        Coding::Identity => Ok(Bytes::copy_from_slice(payload)),
        Coding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            write_all(&mut encoder, payload)?;
            encoder
                .finish()
                .map(Bytes::from)
                .map_err(|err| CompressionError::Corrupt(err.to_string()))
        }
        Coding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            write_all(&mut encoder, payload)?;
            encoder
                .finish()
                .map(Bytes::from)
                .map_err(|err| CompressionError::Corrupt(err.to_string()))
        }
        Coding::Other(name) => Err(CompressionError::Unsupported(name.clone())),
    }
}

/// Decompresses an inbound payload that arrived with the compressed flag set,
/// bounding the inflated size by `limit`.
pub fn decompress(coding: &Coding, payload: &[u8], limit: usize) -> Result<Bytes, CompressionError> {
    match coding {
        // A compressed flag under identity means no coding was negotiated.
        Coding::Identity => Err(CompressionError::Unsupported("identity".into())),
        Coding::Gzip => bounded_read(GzDecoder::new(payload), limit),
        Coding::Deflate => bounded_read(ZlibDecoder::new(payload), limit),
        Coding::Other(name) => Err(CompressionError::Unsupported(name.clone())),
    }
}

fn write_all<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), CompressionError> {
    writer
        .write_all(payload)
        .map_err(|err| CompressionError::Corrupt(err.to_string()))
}

fn bounded_read<R: Read>(reader: R, limit: usize) -> Result<Bytes, CompressionError> {
    let mut out = Vec::new();
    let mut bounded = reader.take(limit as u64 + 1);
    bounded
        .read_to_end(&mut out)
        .map_err(|err| CompressionError::Corrupt(err.to_string()))?;
    if out.len() > limit {
        return Err(CompressionError::TooLarge { limit });
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let packed = compress(&Coding::Gzip, &payload).unwrap();
        assert_ne!(packed.as_ref(), payload.as_slice());
        let unpacked = decompress(&Coding::Gzip, &packed, 1 << 20).unwrap();
        assert_eq!(unpacked.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_deflate_round_trip() {
        let payload = b"abcabcabcabc".repeat(100);
        let packed = compress(&Coding::Deflate, &payload).unwrap();
        let unpacked = decompress(&Coding::Deflate, &packed, 1 << 20).unwrap();
        assert_eq!(unpacked.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_decompress_respects_limit() {
        let payload = vec![0u8; 4096];
        let packed = compress(&Coding::Gzip, &payload).unwrap();
        assert!(matches!(
            decompress(&Coding::Gzip, &packed, 1024),
            Err(CompressionError::TooLarge { limit: 1024 })
        ));
    }

    #[test]
    fn test_unknown_coding_is_unsupported() {
        assert!(matches!(
            decompress(&Coding::Other("zstd".into()), b"", 1024),
            Err(CompressionError::Unsupported(_))
        ));
        assert!(matches!(
            decompress(&Coding::Identity, b"", 1024),
            Err(CompressionError::Unsupported(_))
        ));
    }

    #[test]
    fn test_coding_names_round_trip() {
        for coding in supported_codings() {
            assert_eq!(&Coding::parse(coding.name()), coding);
        }
        assert_eq!(Coding::parse(" gzip "), Coding::Gzip);
        assert_eq!(Coding::parse("snappy"), Coding::Other("snappy".into()));
    }

    #[test]
    fn test_accept_encoding_value() {
        assert_eq!(accept_encoding_value(), "identity,gzip,deflate");
    }
}
