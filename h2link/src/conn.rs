//! The handle traits every HTTP/2 binding implements.
//!
//! One gRPC call maps onto one HTTP/2 stream. Each direction of the stream is
//! owned by exactly one task, so the traits hand out independently movable
//! halves rather than a single connection object.

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::HeaderMap;

/// Errors surfaced by a transport binding.
#[derive(Debug)]
pub enum TransportError {
    /// An I/O error on the underlying connection.
    Io(io::Error),
    /// The peer closed the stream or connection before we were done with it.
    Closed,
    /// The stream was reset with a reason.
    Reset(String),
    /// The binding observed something that violates HTTP/2 semantics.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Closed => write!(f, "stream closed by peer"),
            Self::Reset(reason) => write!(f, "stream reset: {}", reason),
            Self::Protocol(msg) => write!(f, "HTTP/2 protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Write half of one HTTP/2 stream.
///
/// The caller must end the stream with exactly one of [`finish`] or
/// [`finish_with_trailers`]; writing after that is a contract violation and
/// bindings may return [`TransportError::Closed`].
///
/// [`finish`]: ChunkWriter::finish
/// [`finish_with_trailers`]: ChunkWriter::finish_with_trailers
#[async_trait]
pub trait ChunkWriter: Send {
    /// Sends one DATA chunk. Suspends while the transport applies
    /// backpressure.
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Half-closes the stream without a trailing header block.
    async fn finish(&mut self) -> Result<()>;

    /// Sends a trailing header block and half-closes the stream.
    async fn finish_with_trailers(&mut self, trailers: HeaderMap) -> Result<()>;

    /// Abandons the stream (RST_STREAM or the binding's equivalent).
    /// Synchronous so it can run from drop paths.
    fn abort(&mut self);
}

/// Read half of one HTTP/2 stream.
#[async_trait]
pub trait ChunkReader: Send {
    /// Next DATA chunk, or `None` once the body has ended. Trailers, if any,
    /// are available from [`trailers`] afterwards.
    ///
    /// [`trailers`]: ChunkReader::trailers
    async fn chunk(&mut self) -> Result<Option<Bytes>>;

    /// The trailing header block, if the peer sent one. Only meaningful after
    /// [`chunk`] has returned `None`.
    ///
    /// [`chunk`]: ChunkReader::chunk
    async fn trailers(&mut self) -> Result<Option<HeaderMap>>;
}

pub type BoxChunkWriter = Box<dyn ChunkWriter>;
pub type BoxChunkReader = Box<dyn ChunkReader>;

/// The response head as observed by a client, with the body still streaming.
pub struct ResponseHead {
    pub status: http::StatusCode,
    pub headers: HeaderMap,
    pub body: BoxChunkReader,
}

/// Resolves once the peer has produced its response HEADERS frame.
pub type ResponseFuture = BoxFuture<'static, Result<ResponseHead>>;

/// Client side of an established HTTP/2 connection.
#[async_trait]
pub trait H2Conn: Send + Sync + 'static {
    /// Opens a new stream carrying `head`. The returned writer feeds the
    /// request body; the future resolves when the response HEADERS arrive,
    /// which may be long after the request body has been fully written.
    async fn open(&self, head: http::request::Parts) -> Result<(BoxChunkWriter, ResponseFuture)>;

    /// The scheme requests on this connection should carry (`http` for h2c,
    /// `https` for h2 over TLS).
    fn scheme(&self) -> http::uri::Scheme;
}

/// Lets the server send its response HEADERS for one accepted stream.
#[async_trait]
pub trait Responder: Send {
    /// Sends the response HEADERS. With `end_of_stream` set the response
    /// consists of that single frame and no writer is returned; otherwise the
    /// returned writer feeds the response body.
    async fn send_response(
        &mut self,
        status: http::StatusCode,
        headers: HeaderMap,
        end_of_stream: bool,
    ) -> Result<Option<BoxChunkWriter>>;
}

pub type BoxResponder = Box<dyn Responder>;

/// One request stream accepted on a server connection.
pub struct IncomingCall {
    /// The scheme this transport carries (`http` for h2c, `https` for h2
    /// over TLS); requests naming a different `:scheme` are invalid.
    pub scheme: http::uri::Scheme,
    pub head: http::request::Parts,
    pub body: BoxChunkReader,
    pub respond: BoxResponder,
}

/// Server side of an established HTTP/2 connection.
#[async_trait]
pub trait H2Server: Send {
    /// The next request stream opened by the peer, or `None` once the
    /// connection has shut down.
    async fn accept(&mut self) -> Option<Result<IncomingCall>>;
}
