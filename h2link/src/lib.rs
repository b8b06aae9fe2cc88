//! Abstract HTTP/2 stream seam consumed by the hibari gRPC engine.
//!
//! The engine never talks to an HTTP/2 library directly. It sees one open
//! stream at a time through a pair of handles: a [`ChunkWriter`] that accepts
//! DATA chunks and an optional trailing header block, and a [`ChunkReader`]
//! that yields the peer's chunks and trailers. Opening a stream (client) and
//! accepting one (server) go through [`H2Conn`] and [`H2Server`].
//!
//! Two bindings ship with the crate:
//!
//! - [`mem`] — an in-process paired transport used by the test suites;
//! - [`hyper_conn`] — hyper 1.x `client::conn::http2` / `server::conn::http2`.

pub mod conn;
pub mod hyper_conn;
pub mod mem;

pub use conn::{
    BoxChunkReader, BoxChunkWriter, BoxResponder, ChunkReader, ChunkWriter, H2Conn, H2Server,
    IncomingCall, Responder, ResponseFuture, ResponseHead, Result, TransportError,
};
