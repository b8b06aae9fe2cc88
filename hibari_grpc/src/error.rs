//! Error taxonomy for the call engine.
//!
//! Every failure a call can observe is a value of [`CallError`]; the engine
//! never panics across a call boundary. Errors are `Clone` because terminal
//! failures are sticky: the same error is replayed to every subsequent
//! `recv`/`send` on the affected direction.

use std::fmt;

use crate::status::{Code, GrpcStatus};

#[derive(Debug, Clone)]
pub enum CallError {
    /// An intentional, typed protocol error; becomes `grpc-status` trailers
    /// on the wire.
    Grpc(GrpcStatus),
    /// The call failed before any application bytes could have reached the
    /// peer's handler. The only class eligible for transparent retry.
    Setup(SetupFailure),
    /// The client went away mid-call.
    ClientDisconnected,
    /// The server went away mid-call.
    ServerDisconnected,
    /// The call was used after its terminal event (send after trailers, recv
    /// after the stream already ended, any operation after close).
    HandlerTerminated,
    /// The response was already initiated when an operation that must precede
    /// initiation ran.
    ResponseAlreadyInitiated,
    /// The peer omitted a mandatory pseudo-header.
    MissingPseudoHeader(&'static str),
    /// `recv_final` saw a non-terminal element.
    UnexpectedNonFinalInput,
    /// The underlying transport failed.
    Transport(String),
    /// The peer violated gRPC wire semantics.
    Protocol(String),
}

impl CallError {
    /// Whether this failure happened during call setup, i.e. before the peer
    /// handler could have observed anything. Retry policy lives outside the
    /// engine; this is the classification it keys on.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    /// The status this error maps to when it must be reported on the wire.
    /// Messages are kept generic for internal failures so details never leak
    /// to the peer.
    pub fn to_grpc_status(&self) -> GrpcStatus {
        match self {
            Self::Grpc(status) => status.clone(),
            Self::Setup(failure) => failure.to_grpc_status(),
            Self::ClientDisconnected => GrpcStatus::cancelled("client disconnected"),
            Self::ServerDisconnected => GrpcStatus::unavailable("server disconnected"),
            Self::HandlerTerminated | Self::ResponseAlreadyInitiated => {
                GrpcStatus::internal("call used after terminal event")
            }
            Self::MissingPseudoHeader(_) | Self::UnexpectedNonFinalInput | Self::Protocol(_) => {
                GrpcStatus::new(Code::Internal, "protocol error")
            }
            Self::Transport(_) => GrpcStatus::unavailable("transport error"),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc(status) => write!(f, "gRPC error: {}", status),
            Self::Setup(failure) => write!(f, "call setup failed: {}", failure),
            Self::ClientDisconnected => write!(f, "client disconnected"),
            Self::ServerDisconnected => write!(f, "server disconnected"),
            Self::HandlerTerminated => write!(f, "call already terminated"),
            Self::ResponseAlreadyInitiated => write!(f, "response already initiated"),
            Self::MissingPseudoHeader(name) => {
                write!(f, "peer omitted mandatory pseudo-header {}", name)
            }
            Self::UnexpectedNonFinalInput => {
                write!(f, "expected the final input but the stream continues")
            }
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for CallError {}

impl From<GrpcStatus> for CallError {
    fn from(status: GrpcStatus) -> Self {
        Self::Grpc(status)
    }
}

impl From<crate::metadata::InvalidMetadata> for CallError {
    fn from(err: crate::metadata::InvalidMetadata) -> Self {
        Self::Grpc(GrpcStatus::invalid_argument(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// What went wrong before the handler was involved.
#[derive(Debug, Clone)]
pub struct SetupFailure {
    pub kind: SetupKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    /// The stream could not be opened at all.
    Connect,
    /// The inbound request headers failed validation.
    InvalidRequestHeaders,
    /// The response head was missing mandatory fields or carried a non-gRPC
    /// HTTP status.
    InvalidResponseHeaders,
    /// The requested path is not served.
    UnknownMethod,
}

impl SetupFailure {
    pub fn new(kind: SetupKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn to_grpc_status(&self) -> GrpcStatus {
        let code = match self.kind {
            SetupKind::Connect => Code::Unavailable,
            SetupKind::InvalidRequestHeaders => Code::InvalidArgument,
            SetupKind::InvalidResponseHeaders => Code::Internal,
            SetupKind::UnknownMethod => Code::Unimplemented,
        };
        GrpcStatus::new(code, self.message.clone())
    }
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SetupKind::Connect => "connect",
            SetupKind::InvalidRequestHeaders => "invalid request headers",
            SetupKind::InvalidResponseHeaders => "invalid response headers",
            SetupKind::UnknownMethod => "unknown method",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_classification() {
        let err = CallError::Setup(SetupFailure::new(SetupKind::Connect, "refused"));
        assert!(err.is_setup_failure());
        assert!(!CallError::ServerDisconnected.is_setup_failure());
        assert!(!CallError::Grpc(GrpcStatus::ok()).is_setup_failure());
    }

    #[test]
    fn test_wire_status_mapping() {
        let err = CallError::Setup(SetupFailure::new(SetupKind::UnknownMethod, "/a/B"));
        assert_eq!(err.to_grpc_status().code(), Code::Unimplemented);

        let err = CallError::ClientDisconnected;
        assert_eq!(err.to_grpc_status().code(), Code::Cancelled);

        // Internal details never leak into the wire message.
        let err = CallError::Protocol("secret internal state".into());
        assert_eq!(err.to_grpc_status().message(), Some("protocol error"));
    }
}
