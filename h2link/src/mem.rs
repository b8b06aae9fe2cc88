//! In-process paired transport.
//!
//! [`pair`] returns a client connection and a server acceptor wired directly
//! to each other over channels. Every HTTP/2 event the engine cares about
//! (HEADERS, DATA, trailers, reset) is modeled as one frame, so protocol
//! tests run without sockets while still exercising real backpressure and
//! real peer-disconnect behavior: dropping a writer without finishing the
//! stream surfaces as [`TransportError::Closed`] on the other side.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::{mpsc, oneshot};

use crate::conn::{
    BoxChunkWriter, ChunkReader, ChunkWriter, H2Conn, H2Server, IncomingCall, Responder,
    ResponseFuture, ResponseHead, Result, TransportError,
};

/// Frames in flight per stream direction before the writer suspends.
const FRAME_WINDOW: usize = 32;

enum Frame {
    Data(Bytes),
    Trailers(HeaderMap),
    End,
    Reset(String),
}

/// Creates a connected client/server transport pair.
pub fn pair() -> (MemConn, MemServer) {
    let (accept_tx, accept_rx) = mpsc::channel(FRAME_WINDOW);
    (MemConn { accept_tx }, MemServer { accept_rx })
}

// ============================================================================
// Stream halves
// ============================================================================

struct PipeWriter {
    tx: mpsc::Sender<Frame>,
    done: bool,
}

impl PipeWriter {
    fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx, done: false }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.done {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl ChunkWriter for PipeWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.send(Frame::Data(data)).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.send(Frame::End).await?;
        self.done = true;
        Ok(())
    }

    async fn finish_with_trailers(&mut self, trailers: HeaderMap) -> Result<()> {
        self.send(Frame::Trailers(trailers)).await?;
        self.done = true;
        Ok(())
    }

    fn abort(&mut self) {
        if !self.done {
            self.done = true;
            let _ = self.tx.try_send(Frame::Reset("stream aborted".into()));
        }
    }
}

struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    ended: bool,
    trailers: Option<HeaderMap>,
}

impl PipeReader {
    fn new(rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            rx,
            ended: false,
            trailers: None,
        }
    }

    /// A body that ended at the HEADERS frame (no DATA, no trailers).
    fn empty() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self {
            rx,
            ended: true,
            trailers: None,
        }
    }
}

#[async_trait]
impl ChunkReader for PipeReader {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.ended {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame::Data(data)) => Ok(Some(data)),
            Some(Frame::Trailers(trailers)) => {
                self.ended = true;
                self.trailers = Some(trailers);
                Ok(None)
            }
            Some(Frame::End) => {
                self.ended = true;
                Ok(None)
            }
            Some(Frame::Reset(reason)) => {
                self.ended = true;
                Err(TransportError::Reset(reason))
            }
            // Writer dropped without ending the stream.
            None => {
                self.ended = true;
                Err(TransportError::Closed)
            }
        }
    }

    async fn trailers(&mut self) -> Result<Option<HeaderMap>> {
        Ok(self.trailers.take())
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Client half of an in-memory connection pair. Cloneable; every [`open`]
/// call produces an independent stream.
///
/// [`open`]: H2Conn::open
#[derive(Clone)]
pub struct MemConn {
    accept_tx: mpsc::Sender<PendingCall>,
}

struct PendingCall {
    head: http::request::Parts,
    body: PipeReader,
    respond: MemResponder,
}

#[async_trait]
impl H2Conn for MemConn {
    async fn open(&self, head: http::request::Parts) -> Result<(BoxChunkWriter, ResponseFuture)> {
        let (req_tx, req_rx) = mpsc::channel(FRAME_WINDOW);
        let (head_tx, head_rx) = oneshot::channel();

        let pending = PendingCall {
            head,
            body: PipeReader::new(req_rx),
            respond: MemResponder {
                head_tx: Some(head_tx),
            },
        };
        self.accept_tx
            .send(pending)
            .await
            .map_err(|_| TransportError::Closed)?;

        let response: ResponseFuture = Box::pin(async move {
            match head_rx.await {
                Ok(head) => head,
                // Responder dropped without answering.
                Err(_) => Err(TransportError::Closed),
            }
        });
        Ok((Box::new(PipeWriter::new(req_tx)), response))
    }

    fn scheme(&self) -> http::uri::Scheme {
        http::uri::Scheme::HTTP
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Server half of an in-memory connection pair.
pub struct MemServer {
    accept_rx: mpsc::Receiver<PendingCall>,
}

#[async_trait]
impl H2Server for MemServer {
    async fn accept(&mut self) -> Option<Result<IncomingCall>> {
        let pending = self.accept_rx.recv().await?;
        Some(Ok(IncomingCall {
            scheme: http::uri::Scheme::HTTP,
            head: pending.head,
            body: Box::new(pending.body),
            respond: Box::new(pending.respond),
        }))
    }
}

struct MemResponder {
    head_tx: Option<oneshot::Sender<Result<ResponseHead>>>,
}

#[async_trait]
impl Responder for MemResponder {
    async fn send_response(
        &mut self,
        status: http::StatusCode,
        headers: HeaderMap,
        end_of_stream: bool,
    ) -> Result<Option<BoxChunkWriter>> {
        let head_tx = self
            .head_tx
            .take()
            .ok_or_else(|| TransportError::Protocol("response already sent".into()))?;

        let (body, writer) = if end_of_stream {
            (PipeReader::empty(), None)
        } else {
            let (tx, rx) = mpsc::channel(FRAME_WINDOW);
            (
                PipeReader::new(rx),
                Some(Box::new(PipeWriter::new(tx)) as BoxChunkWriter),
            )
        };

        let head = ResponseHead {
            status,
            headers,
            body: Box::new(body),
        };
        head_tx
            .send(Ok(head))
            .map_err(|_| TransportError::Closed)?;
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_head(path: &str) -> http::request::Parts {
        let (parts, ()) = http::Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_round_trip_with_trailers() {
        let (conn, mut server) = pair();

        let (mut req_writer, response) = conn.open(request_head("/echo")).await.unwrap();
        let mut call = server.accept().await.unwrap().unwrap();
        assert_eq!(call.head.uri.path(), "/echo");

        req_writer.write(Bytes::from_static(b"ping")).await.unwrap();
        req_writer.finish().await.unwrap();

        assert_eq!(
            call.body.chunk().await.unwrap(),
            Some(Bytes::from_static(b"ping"))
        );
        assert_eq!(call.body.chunk().await.unwrap(), None);
        assert!(call.body.trailers().await.unwrap().is_none());

        let mut resp_writer = call
            .respond
            .send_response(http::StatusCode::OK, HeaderMap::new(), false)
            .await
            .unwrap()
            .unwrap();
        resp_writer.write(Bytes::from_static(b"pong")).await.unwrap();
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", "0".parse().unwrap());
        resp_writer.finish_with_trailers(trailers).await.unwrap();

        let mut head = response.await.unwrap();
        assert_eq!(head.status, http::StatusCode::OK);
        assert_eq!(
            head.body.chunk().await.unwrap(),
            Some(Bytes::from_static(b"pong"))
        );
        assert_eq!(head.body.chunk().await.unwrap(), None);
        let trailers = head.body.trailers().await.unwrap().unwrap();
        assert_eq!(trailers.get("grpc-status").unwrap(), "0");
    }

    #[tokio::test]
    async fn test_trailers_only_response() {
        let (conn, mut server) = pair();

        let (_req_writer, response) = conn.open(request_head("/missing")).await.unwrap();
        let mut call = server.accept().await.unwrap().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", "12".parse().unwrap());
        let writer = call
            .respond
            .send_response(http::StatusCode::OK, headers, true)
            .await
            .unwrap();
        assert!(writer.is_none());

        let mut head = response.await.unwrap();
        assert_eq!(head.headers.get("grpc-status").unwrap(), "12");
        assert_eq!(head.body.chunk().await.unwrap(), None);
        assert!(head.body.trailers().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_writer_surfaces_as_closed() {
        let (conn, mut server) = pair();

        let (req_writer, _response) = conn.open(request_head("/drop")).await.unwrap();
        let mut call = server.accept().await.unwrap().unwrap();

        drop(req_writer);
        assert!(matches!(
            call.body.chunk().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_abort_surfaces_as_reset() {
        let (conn, mut server) = pair();

        let (mut req_writer, _response) = conn.open(request_head("/abort")).await.unwrap();
        let mut call = server.accept().await.unwrap().unwrap();

        req_writer.abort();
        assert!(matches!(
            call.body.chunk().await,
            Err(TransportError::Reset(_))
        ));
    }
}
