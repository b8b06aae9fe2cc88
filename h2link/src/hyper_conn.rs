//! hyper 1.x binding for the stream seam.
//!
//! Client streams go through `hyper::client::conn::http2`; server streams are
//! accepted from `hyper::server::conn::http2::serve_connection`. Outbound
//! bodies are channel-backed [`http_body::Body`] implementations so a
//! [`ChunkWriter`] handle can feed a stream that hyper polls, and inbound
//! bodies are read frame-by-frame off `hyper::body::Incoming`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::conn::{
    BoxChunkWriter, ChunkReader, ChunkWriter, H2Conn, H2Server, IncomingCall, Responder,
    ResponseFuture, ResponseHead, Result, TransportError,
};

/// Frames in flight per outbound body before the writer suspends.
const BODY_WINDOW: usize = 32;

fn hyper_err(err: hyper::Error) -> TransportError {
    if err.is_canceled() || err.is_incomplete_message() {
        TransportError::Closed
    } else {
        TransportError::Protocol(err.to_string())
    }
}

// ============================================================================
// Channel-backed outbound body
// ============================================================================

enum BodyFrame {
    Frame(Frame<Bytes>),
    Abort,
}

/// Error produced by an aborted outbound body; makes hyper reset the stream.
#[derive(Debug)]
pub struct BodyAborted;

impl fmt::Display for BodyAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stream aborted by sender")
    }
}

impl std::error::Error for BodyAborted {}

pin_project_lite::pin_project! {
    /// Outbound body fed through a [`HyperWriter`] handle.
    pub struct ChannelBody {
        rx: mpsc::Receiver<BodyFrame>,
    }
}

impl ChannelBody {
    fn channel() -> (HyperWriter, ChannelBody) {
        let (tx, rx) = mpsc::channel(BODY_WINDOW);
        (HyperWriter { tx: Some(tx) }, ChannelBody { rx })
    }

    /// A body that is already at end-of-stream.
    fn empty() -> ChannelBody {
        let (_tx, rx) = mpsc::channel(1);
        ChannelBody { rx }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = BodyAborted;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(BodyFrame::Frame(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(Some(BodyFrame::Abort)) => Poll::Ready(Some(Err(BodyAborted))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

struct HyperWriter {
    tx: Option<mpsc::Sender<BodyFrame>>,
}

impl HyperWriter {
    async fn send(&mut self, frame: BodyFrame) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl ChunkWriter for HyperWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.send(BodyFrame::Frame(Frame::data(data))).await
    }

    async fn finish(&mut self) -> Result<()> {
        // Closing the channel ends the body.
        if self.tx.take().is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn finish_with_trailers(&mut self, trailers: HeaderMap) -> Result<()> {
        self.send(BodyFrame::Frame(Frame::trailers(trailers))).await?;
        self.tx = None;
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(BodyFrame::Abort);
        }
    }
}

// ============================================================================
// Inbound body reader
// ============================================================================

struct IncomingReader {
    body: Incoming,
    trailers: Option<HeaderMap>,
    ended: bool,
}

impl IncomingReader {
    fn new(body: Incoming) -> Self {
        Self {
            body,
            trailers: None,
            ended: false,
        }
    }
}

#[async_trait]
impl ChunkReader for IncomingReader {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        while !self.ended {
            match self.body.frame().await {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => return Ok(Some(data)),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            self.trailers = Some(trailers);
                            self.ended = true;
                        }
                        // Unknown frame kinds are skipped.
                    }
                },
                Some(Err(err)) => {
                    self.ended = true;
                    return Err(hyper_err(err));
                }
                None => self.ended = true,
            }
        }
        Ok(None)
    }

    async fn trailers(&mut self) -> Result<Option<HeaderMap>> {
        Ok(self.trailers.take())
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Client half of a hyper HTTP/2 connection.
pub struct HyperConn {
    send_request: Mutex<hyper::client::conn::http2::SendRequest<ChannelBody>>,
    scheme: http::uri::Scheme,
}

/// Performs the HTTP/2 handshake on `io` and spawns the connection driver.
pub async fn connect<T>(io: T, scheme: http::uri::Scheme) -> Result<HyperConn>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (send_request, connection) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(io))
            .await
            .map_err(hyper_err)?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("HTTP/2 client connection terminated: {}", err);
        }
    });
    Ok(HyperConn {
        send_request: Mutex::new(send_request),
        scheme,
    })
}

#[async_trait]
impl H2Conn for HyperConn {
    async fn open(&self, head: http::request::Parts) -> Result<(BoxChunkWriter, ResponseFuture)> {
        let (writer, body) = ChannelBody::channel();
        let request = Request::from_parts(head, body);

        let mut send_request = self.send_request.lock().await;
        send_request.ready().await.map_err(hyper_err)?;
        let in_flight = send_request.send_request(request);
        drop(send_request);

        let response: ResponseFuture = Box::pin(async move {
            let response = in_flight.await.map_err(hyper_err)?;
            let (parts, body) = response.into_parts();
            Ok(ResponseHead {
                status: parts.status,
                headers: parts.headers,
                body: Box::new(IncomingReader::new(body)),
            })
        });
        Ok((Box::new(writer), response))
    }

    fn scheme(&self) -> http::uri::Scheme {
        self.scheme.clone()
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Serves one HTTP/2 connection, yielding its request streams through
/// [`H2Server::accept`]. The connection driver runs on a spawned task.
pub struct HyperServer {
    accept_rx: mpsc::Receiver<IncomingCall>,
}

pub fn serve<T>(io: T, scheme: http::uri::Scheme) -> HyperServer
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (accept_tx, accept_rx) = mpsc::channel(16);
    let service = AcceptService { accept_tx, scheme };
    let connection = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), service);
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("HTTP/2 server connection terminated: {}", err);
        }
    });
    HyperServer { accept_rx }
}

#[async_trait]
impl H2Server for HyperServer {
    async fn accept(&mut self) -> Option<Result<IncomingCall>> {
        self.accept_rx.recv().await.map(Ok)
    }
}

#[derive(Clone)]
struct AcceptService {
    accept_tx: mpsc::Sender<IncomingCall>,
    scheme: http::uri::Scheme,
}

impl hyper::service::Service<Request<Incoming>> for AcceptService {
    type Response = Response<ChannelBody>;
    type Error = TransportError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let accept_tx = self.accept_tx.clone();
        let scheme = self.scheme.clone();
        Box::pin(async move {
            let (head, body) = request.into_parts();
            let (resp_tx, resp_rx) = oneshot::channel();
            let call = IncomingCall {
                scheme,
                head,
                body: Box::new(IncomingReader::new(body)),
                respond: Box::new(HyperResponder {
                    resp_tx: Some(resp_tx),
                }),
            };
            accept_tx
                .send(call)
                .await
                .map_err(|_| TransportError::Closed)?;
            // An unanswered call (responder dropped) resets the stream.
            resp_rx.await.map_err(|_| TransportError::Closed)
        })
    }
}

struct HyperResponder {
    resp_tx: Option<oneshot::Sender<Response<ChannelBody>>>,
}

#[async_trait]
impl Responder for HyperResponder {
    async fn send_response(
        &mut self,
        status: http::StatusCode,
        headers: HeaderMap,
        end_of_stream: bool,
    ) -> Result<Option<BoxChunkWriter>> {
        let resp_tx = self
            .resp_tx
            .take()
            .ok_or_else(|| TransportError::Protocol("response already sent".into()))?;

        let (body, writer) = if end_of_stream {
            (ChannelBody::empty(), None)
        } else {
            let (writer, body) = ChannelBody::channel();
            (body, Some(Box::new(writer) as BoxChunkWriter))
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        resp_tx.send(response).map_err(|_| TransportError::Closed)?;
        Ok(writer)
    }
}
