//! gRPC status codes and the typed status a call terminates with.

use std::fmt;

use bytes::Bytes;
use percent_encoding::{percent_decode, percent_encode, AsciiSet, CONTROLS};

use crate::metadata::CustomMetadata;

pub(crate) const GRPC_STATUS_HEADER: &str = "grpc-status";
pub(crate) const GRPC_MESSAGE_HEADER: &str = "grpc-message";
pub(crate) const GRPC_STATUS_DETAILS_HEADER: &str = "grpc-status-details-bin";

/// Characters escaped in `grpc-message` beyond the control set.
const MESSAGE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}');

/// The canonical gRPC status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// The numeric value carried in the `grpc-status` trailer.
    pub fn value(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Code> {
        Some(match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        })
    }

    /// Parses the ASCII decimal form used on the wire.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Code> {
        let text = std::str::from_utf8(bytes).ok()?;
        Code::from_i32(text.parse().ok()?)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Code::Ok => "the operation completed successfully",
            Code::Cancelled => "the operation was cancelled",
            Code::Unknown => "unknown error",
            Code::InvalidArgument => "client specified an invalid argument",
            Code::DeadlineExceeded => "deadline expired before the operation could complete",
            Code::NotFound => "some requested entity was not found",
            Code::AlreadyExists => "the entity to create already exists",
            Code::PermissionDenied => "the caller lacks permission for the operation",
            Code::ResourceExhausted => "some resource has been exhausted",
            Code::FailedPrecondition => "the system is not in a state required for the operation",
            Code::Aborted => "the operation was aborted",
            Code::OutOfRange => "the operation was attempted past the valid range",
            Code::Unimplemented => "the operation is not implemented or not supported",
            Code::Internal => "internal error",
            Code::Unavailable => "the service is currently unavailable",
            Code::DataLoss => "unrecoverable data loss or corruption",
            Code::Unauthenticated => "the request lacks valid authentication credentials",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A typed gRPC status: code, optional message, optional opaque details
/// (`grpc-status-details-bin`), and trailing custom metadata.
///
/// This is both the value a call terminates with and the error type handlers
/// raise intentionally; the engine maps it onto status trailers.
#[derive(Debug, Clone, PartialEq)]
pub struct GrpcStatus {
    code: Code,
    message: Option<String>,
    details: Option<Bytes>,
    metadata: Vec<CustomMetadata>,
}

impl GrpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: None,
            metadata: Vec::new(),
        }
    }

    /// A status with no message.
    pub fn with_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: None,
            metadata: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::with_code(Code::Ok)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn with_metadata(mut self, metadata: Vec<CustomMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_details(mut self, details: impl Into<Bytes>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn details(&self) -> Option<&Bytes> {
        self.details.as_ref()
    }

    pub fn metadata(&self) -> &[CustomMetadata] {
        &self.metadata
    }

    /// Percent-encodes a message for the `grpc-message` trailer.
    pub(crate) fn encode_message(message: &str) -> String {
        percent_encode(message.as_bytes(), MESSAGE_ENCODE_SET).to_string()
    }

    /// Decodes a `grpc-message` trailer value. Undecodable sequences are kept
    /// lossily rather than rejected.
    pub(crate) fn decode_message(raw: &[u8]) -> String {
        percent_decode(raw).decode_utf8_lossy().into_owned()
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for GrpcStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values_match_the_wire_table() {
        let table = [
            (Code::Ok, 0),
            (Code::Cancelled, 1),
            (Code::Unknown, 2),
            (Code::InvalidArgument, 3),
            (Code::DeadlineExceeded, 4),
            (Code::NotFound, 5),
            (Code::AlreadyExists, 6),
            (Code::PermissionDenied, 7),
            (Code::ResourceExhausted, 8),
            (Code::FailedPrecondition, 9),
            (Code::Aborted, 10),
            (Code::OutOfRange, 11),
            (Code::Unimplemented, 12),
            (Code::Internal, 13),
            (Code::Unavailable, 14),
            (Code::DataLoss, 15),
            (Code::Unauthenticated, 16),
        ];
        for (code, value) in table {
            assert_eq!(code.value(), value);
            assert_eq!(Code::from_i32(value), Some(code));
        }
        assert_eq!(Code::from_i32(17), None);
        assert_eq!(Code::from_i32(-1), None);
    }

    #[test]
    fn test_code_from_wire_bytes() {
        assert_eq!(Code::from_bytes(b"0"), Some(Code::Ok));
        assert_eq!(Code::from_bytes(b"12"), Some(Code::Unimplemented));
        assert_eq!(Code::from_bytes(b"x"), None);
        assert_eq!(Code::from_bytes(b""), None);
    }

    #[test]
    fn test_message_percent_round_trip() {
        let message = "name \"world\" not found: try {again}?";
        let encoded = GrpcStatus::encode_message(message);
        assert!(!encoded.contains(' '));
        assert_eq!(GrpcStatus::decode_message(encoded.as_bytes()), message);
    }

    #[test]
    fn test_message_unicode_survives() {
        let message = "ошибка 失敗";
        let encoded = GrpcStatus::encode_message(message);
        assert!(encoded.is_ascii());
        assert_eq!(GrpcStatus::decode_message(encoded.as_bytes()), message);
    }

    #[test]
    fn test_display() {
        let status = GrpcStatus::unimplemented("no such method");
        assert_eq!(status.to_string(), "Unimplemented: no such method");
        assert_eq!(GrpcStatus::ok().to_string(), "Ok");
    }
}
