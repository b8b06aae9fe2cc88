//! Custom metadata: validated header names and ASCII or binary values.
//!
//! Application metadata travels as ordinary HTTP/2 header fields, so names
//! are constrained to a conservative character class and a handful of names
//! is reserved for the protocol itself. Names ending in `-bin` carry raw
//! bytes, base64-coded (without padding) on the wire; every other name
//! carries printable ASCII.

use std::fmt;

use base64::Engine;
use bytes::Bytes;

/// Names the protocol claims for itself; custom metadata may not use them.
const RESERVED_NAMES: [&str; 4] = ["user-agent", "content-type", "te", "trailer"];

fn valid_name_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'a'..=b'z' | b'_' | b'-' | b'.')
}

/// A validated metadata header name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderName {
    name: String,
}

impl HeaderName {
    /// Validates `name` against the metadata naming rules: non-empty,
    /// lowercase ASCII from `[0-9 a-z _ - .]`, not `grpc-`-prefixed, not a
    /// reserved name.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidMetadata> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidMetadata::EmptyName);
        }
        if let Some(byte) = name.bytes().find(|b| !valid_name_byte(*b)) {
            return Err(InvalidMetadata::InvalidNameByte { name, byte });
        }
        if name.starts_with("grpc-") {
            return Err(InvalidMetadata::GrpcPrefix(name));
        }
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(InvalidMetadata::ReservedName(name));
        }
        Ok(Self { name })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Binary headers end in `-bin` and carry raw bytes.
    pub fn is_binary(&self) -> bool {
        self.name.ends_with("-bin")
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One application-defined metadata entry.
///
/// Duplicate names are permitted and are semantically equivalent to a single
/// entry whose value is the comma-joined concatenation; order across distinct
/// names is not preserved by the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMetadata {
    name: HeaderName,
    value: Bytes,
}

impl CustomMetadata {
    /// Pairs a validated name with a value. ASCII headers trim surrounding
    /// whitespace and reject bytes outside `0x20..=0x7E`; binary headers
    /// accept anything.
    pub fn new(name: HeaderName, value: impl Into<Bytes>) -> Result<Self, InvalidMetadata> {
        let value = value.into();
        if name.is_binary() {
            return Ok(Self { name, value });
        }
        let trimmed = trim_ascii(&value);
        if let Some(byte) = trimmed.iter().find(|b| !(0x20..=0x7e).contains(*b)) {
            return Err(InvalidMetadata::NonPrintableValue {
                name: name.name,
                byte: *byte,
            });
        }
        Ok(Self {
            name,
            value: value.slice_ref(trimmed),
        })
    }

    /// Convenience constructor for an ASCII entry.
    pub fn ascii(name: &str, value: &str) -> Result<Self, InvalidMetadata> {
        let name = HeaderName::new(name)?;
        if name.is_binary() {
            return Err(InvalidMetadata::BinaryName(name.name));
        }
        Self::new(name, Bytes::copy_from_slice(value.as_bytes()))
    }

    /// Convenience constructor for a binary (`-bin`) entry.
    pub fn binary(name: &str, value: impl Into<Bytes>) -> Result<Self, InvalidMetadata> {
        let name = HeaderName::new(name)?;
        if !name.is_binary() {
            return Err(InvalidMetadata::NotBinaryName(name.name));
        }
        Self::new(name, value)
    }

    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The value as it appears on the wire: base64 without padding for
    /// binary headers, the bytes themselves for ASCII headers.
    pub fn wire_value(&self) -> Vec<u8> {
        if self.name.is_binary() {
            base64::engine::general_purpose::STANDARD_NO_PAD
                .encode(&self.value)
                .into_bytes()
        } else {
            self.value.to_vec()
        }
    }

    /// Reconstructs an entry from its wire form, decoding base64 for binary
    /// names.
    pub fn from_wire(name: &str, value: &[u8]) -> Result<Self, InvalidMetadata> {
        let name = HeaderName::new(name)?;
        if name.is_binary() {
            let decoded = decode_base64_lenient(value)
                .ok_or_else(|| InvalidMetadata::InvalidBase64(name.name.clone()))?;
            Self::new(name, decoded)
        } else {
            Self::new(name, Bytes::copy_from_slice(value))
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

/// Decodes base64 trying the standard and URL-safe alphabets, padded and
/// unpadded, for compatibility with peers that pad (or don't).
pub(crate) fn decode_base64_lenient(value: &[u8]) -> Option<Vec<u8>> {
    use base64::engine::general_purpose;
    let engines = [
        general_purpose::STANDARD,
        general_purpose::STANDARD_NO_PAD,
        general_purpose::URL_SAFE,
        general_purpose::URL_SAFE_NO_PAD,
    ];
    for engine in engines {
        if let Ok(decoded) = engine.decode(value) {
            return Some(decoded);
        }
    }
    None
}

/// Why a metadata name or value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidMetadata {
    EmptyName,
    InvalidNameByte { name: String, byte: u8 },
    GrpcPrefix(String),
    ReservedName(String),
    /// An ASCII constructor was handed a `-bin` name.
    BinaryName(String),
    /// A binary constructor was handed a name without the `-bin` suffix.
    NotBinaryName(String),
    NonPrintableValue { name: String, byte: u8 },
    InvalidBase64(String),
}

impl fmt::Display for InvalidMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "metadata name is empty"),
            Self::InvalidNameByte { name, byte } => {
                write!(f, "metadata name {:?} contains invalid byte 0x{:02x}", name, byte)
            }
            Self::GrpcPrefix(name) => {
                write!(f, "metadata name {:?} uses the reserved grpc- prefix", name)
            }
            Self::ReservedName(name) => write!(f, "metadata name {:?} is reserved", name),
            Self::BinaryName(name) => {
                write!(f, "metadata name {:?} is binary but an ASCII value was given", name)
            }
            Self::NotBinaryName(name) => {
                write!(f, "metadata name {:?} lacks the -bin suffix required for binary values", name)
            }
            Self::NonPrintableValue { name, byte } => write!(
                f,
                "metadata value for {:?} contains non-printable byte 0x{:02x}",
                name, byte
            ),
            Self::InvalidBase64(name) => {
                write!(f, "metadata value for {:?} is not valid base64", name)
            }
        }
    }
}

impl std::error::Error for InvalidMetadata {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["x-request-id", "trace.id", "a", "x_y-0.z", "key-bin"] {
            assert!(HeaderName::new(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_rejected_names() {
        assert_eq!(HeaderName::new(""), Err(InvalidMetadata::EmptyName));
        assert!(matches!(
            HeaderName::new("X-Upper"),
            Err(InvalidMetadata::InvalidNameByte { .. })
        ));
        assert!(matches!(
            HeaderName::new("has space"),
            Err(InvalidMetadata::InvalidNameByte { .. })
        ));
        assert!(matches!(
            HeaderName::new("grpc-timeout"),
            Err(InvalidMetadata::GrpcPrefix(_))
        ));
        for reserved in ["user-agent", "content-type", "te", "trailer"] {
            assert!(matches!(
                HeaderName::new(reserved),
                Err(InvalidMetadata::ReservedName(_))
            ));
        }
    }

    #[test]
    fn test_binary_suffix_detection() {
        assert!(HeaderName::new("trace-bin").unwrap().is_binary());
        assert!(!HeaderName::new("trace").unwrap().is_binary());
    }

    #[test]
    fn test_ascii_value_trimmed_and_validated() {
        let md = CustomMetadata::ascii("x-token", "  abc  ").unwrap();
        assert_eq!(md.value(), b"abc");

        // Control bytes are rejected.
        let err = CustomMetadata::ascii("bad", "\x01").unwrap_err();
        assert!(matches!(err, InvalidMetadata::NonPrintableValue { .. }));
    }

    #[test]
    fn test_binary_value_any_bytes() {
        let md = CustomMetadata::binary("trace-bin", vec![0x00, 0xff, 0x10]).unwrap();
        assert_eq!(md.value(), &[0x00, 0xff, 0x10]);
    }

    #[test]
    fn test_binary_wire_value_is_unpadded_base64() {
        let md = CustomMetadata::binary("trace-bin", vec![0x00, 0xff, 0x10]).unwrap();
        assert_eq!(md.wire_value(), b"AP8Q".to_vec());
    }

    #[test]
    fn test_wire_round_trip() {
        let md = CustomMetadata::binary("trace-bin", vec![0x00, 0xff, 0x10]).unwrap();
        let back = CustomMetadata::from_wire("trace-bin", &md.wire_value()).unwrap();
        assert_eq!(back, md);

        let md = CustomMetadata::ascii("x-token", "abc").unwrap();
        let back = CustomMetadata::from_wire("x-token", &md.wire_value()).unwrap();
        assert_eq!(back, md);
    }

    #[test]
    fn test_lenient_base64_decode() {
        // Padded and unpadded forms both decode.
        assert_eq!(decode_base64_lenient(b"aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64_lenient(b"aGVsbG8").unwrap(), b"hello");
        assert!(decode_base64_lenient(b"!!not base64!!").is_none());
    }

    #[test]
    fn test_ascii_constructor_rejects_bin_name() {
        assert!(matches!(
            CustomMetadata::ascii("data-bin", "x"),
            Err(InvalidMetadata::BinaryName(_))
        ));
        assert!(matches!(
            CustomMetadata::binary("data", vec![1]),
            Err(InvalidMetadata::NotBinaryName(_))
        ));
    }

    quickcheck::quickcheck! {
        fn prop_binary_wire_round_trip(value: Vec<u8>) -> bool {
            let md = CustomMetadata::binary("x-bin", value).unwrap();
            CustomMetadata::from_wire("x-bin", &md.wire_value()) == Ok(md)
        }
    }
}
