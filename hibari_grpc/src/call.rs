//! The call facade: what handlers and client code actually hold.
//!
//! Both roles share one generic core over the session channel; the concrete
//! [`ClientCall`] and [`ServerCall`] types add the role-specific surface (the
//! response-initiation latch lives only on the server, the response headers
//! accessor only on the client).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::channel::{
    Channel, ClientSession, NoMetadata, OutboundElem, ServerSession, Session, StreamElem,
};
use crate::compression::Coding;
use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::headers::{ResponseHeaders, Trailers};
use crate::metadata::CustomMetadata;
use crate::server::RequestInfo;
use crate::status::GrpcStatus;

// ============================================================================
// Shared core
// ============================================================================

pub(crate) struct CallCore<S: Session> {
    channel: Arc<Channel<S>>,
    config: CallConfig,
    /// Set once the terminal inbound element has been delivered; the
    /// `recv_next` family errors past this point instead of replaying.
    saw_end: AtomicBool,
}

impl<S: Session> CallCore<S> {
    pub(crate) fn new(channel: Arc<Channel<S>>, config: CallConfig) -> Self {
        Self {
            channel,
            config,
            saw_end: AtomicBool::new(false),
        }
    }

    pub(crate) fn channel(&self) -> &Arc<Channel<S>> {
        &self.channel
    }

    pub(crate) async fn recv(&self) -> Result<StreamElem<Bytes, S::InboundTrailers>> {
        let elem = self.channel.recv().await?;
        if elem.is_terminal() {
            self.saw_end.store(true, Ordering::Release);
        }
        Ok(elem)
    }

    /// Next message without the tag, `None` at end of stream. Unlike `recv`,
    /// calling again after the end is an error.
    pub(crate) async fn recv_next(&self) -> Result<Option<Bytes>> {
        if self.saw_end.load(Ordering::Acquire) {
            return Err(CallError::HandlerTerminated);
        }
        match self.recv().await? {
            StreamElem::Message(message) => Ok(Some(message)),
            StreamElem::Final(message, _) => Ok(Some(message)),
            StreamElem::NoMore(_) => Ok(None),
        }
    }

    /// The final message and the end-of-stream metadata. Any further message
    /// is [`CallError::UnexpectedNonFinalInput`].
    pub(crate) async fn recv_final(&self) -> Result<(Bytes, S::InboundTrailers)> {
        match self.recv().await? {
            StreamElem::Final(message, trailers) => Ok((message, trailers)),
            StreamElem::NoMore(_) => Err(CallError::Protocol(
                "stream ended without a final message".into(),
            )),
            StreamElem::Message(message) => match self.recv().await? {
                StreamElem::NoMore(trailers) => Ok((message, trailers)),
                _ => Err(CallError::UnexpectedNonFinalInput),
            },
        }
    }

    pub(crate) async fn send(&self, elem: OutboundElem<S>) -> Result<()> {
        if let StreamElem::Message(message) | StreamElem::Final(message, _) = &elem {
            if message.len() > self.config.max_send_message_size {
                return Err(CallError::Grpc(GrpcStatus::resource_exhausted(format!(
                    "outbound message of {} bytes exceeds the {} byte limit",
                    message.len(),
                    self.config.max_send_message_size
                ))));
            }
        }
        self.channel.send(elem).await
    }
}

// ============================================================================
// Client call
// ============================================================================

/// An open call seen from the client: inputs flow out, outputs and trailers
/// flow back.
///
/// Dropping the call without [`close`] aborts both directions; `close` is the
/// graceful path that joins the workers.
///
/// [`close`]: ClientCall::close
pub struct ClientCall {
    core: CallCore<ClientSession>,
}

impl ClientCall {
    pub(crate) fn new(channel: Arc<Channel<ClientSession>>, config: CallConfig) -> Self {
        Self {
            core: CallCore::new(channel, config),
        }
    }

    /// The parsed response headers; suspends until the server produces them.
    pub async fn response_headers(&self) -> Result<ResponseHeaders> {
        self.core.channel.inbound_headers().await
    }

    pub async fn send_input(&self, elem: StreamElem<Bytes, NoMetadata>) -> Result<()> {
        self.core.send(elem).await
    }

    pub async fn send_next_input(&self, message: impl Into<Bytes>) -> Result<()> {
        self.core.send(StreamElem::Message(message.into())).await
    }

    /// Sends the last input and half-closes in one step.
    pub async fn send_final_input(&self, message: impl Into<Bytes>) -> Result<()> {
        self.core
            .send(StreamElem::Final(message.into(), NoMetadata))
            .await
    }

    /// Half-closes the request body without a final message.
    pub async fn half_close(&self) -> Result<()> {
        self.core.send(StreamElem::NoMore(NoMetadata)).await
    }

    pub async fn recv_output(&self) -> Result<StreamElem<Bytes, Trailers>> {
        self.core.recv().await
    }

    pub async fn recv_next_output(&self) -> Result<Option<Bytes>> {
        self.core.recv_next().await
    }

    pub async fn recv_final_output(&self) -> Result<(Bytes, Trailers)> {
        self.core.recv_final().await
    }

    /// Non-streaming shape: exactly one output message, then trailers.
    pub async fn recv_only_output(&self) -> Result<(Bytes, Trailers)> {
        self.core.recv_final().await
    }

    /// Waits for the trailers of a call that produces no further outputs.
    pub async fn recv_trailers(&self) -> Result<Trailers> {
        match self.core.recv().await? {
            StreamElem::NoMore(trailers) => Ok(trailers),
            StreamElem::Message(_) | StreamElem::Final(..) => Err(CallError::Protocol(
                "expected trailers but the server sent another message".into(),
            )),
        }
    }

    /// Gracefully shuts the call down, joining both workers.
    pub async fn close(self) {
        self.core.channel.close().await;
    }
}

impl Drop for ClientCall {
    fn drop(&mut self) {
        // No-op after close(); otherwise tears the streams down.
        self.core.channel.abort(CallError::HandlerTerminated);
    }
}

// ============================================================================
// Server call
// ============================================================================

struct ServerCallInner {
    core: CallCore<ServerSession>,
    request: RequestInfo,
    /// Response-initiation latch: `false → true` exactly once.
    initiated: AtomicBool,
    initial_metadata: parking_lot::Mutex<Vec<CustomMetadata>>,
    response_coding: Coding,
}

impl Drop for ServerCallInner {
    fn drop(&mut self) {
        self.core.channel.abort(CallError::HandlerTerminated);
    }
}

/// An open call seen from the server handler. Cheap to clone; all clones
/// refer to the same call.
#[derive(Clone)]
pub struct ServerCall {
    inner: Arc<ServerCallInner>,
}

impl ServerCall {
    pub(crate) fn new(
        channel: Arc<Channel<ServerSession>>,
        request: RequestInfo,
        config: CallConfig,
        response_coding: Coding,
    ) -> Self {
        Self {
            inner: Arc::new(ServerCallInner {
                core: CallCore::new(channel, config),
                request,
                initiated: AtomicBool::new(false),
                initial_metadata: parking_lot::Mutex::new(Vec::new()),
                response_coding,
            }),
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.inner.request
    }

    /// The custom metadata the client attached to the request.
    pub fn request_metadata(&self) -> &[CustomMetadata] {
        &self.inner.request.headers.metadata
    }

    pub async fn recv_input(&self) -> Result<StreamElem<Bytes, NoMetadata>> {
        self.inner.core.recv().await
    }

    pub async fn recv_next_input(&self) -> Result<Option<Bytes>> {
        self.inner.core.recv_next().await
    }

    pub async fn recv_final_input(&self) -> Result<Bytes> {
        let (message, NoMetadata) = self.inner.core.recv_final().await?;
        Ok(message)
    }

    /// Non-streaming shape: exactly one input message, then end of input.
    pub async fn recv_only_input(&self) -> Result<Bytes> {
        self.recv_final_input().await
    }

    pub fn response_initiated(&self) -> bool {
        self.inner.initiated.load(Ordering::Acquire)
    }

    /// Sets the custom metadata for the response headers. Must run before
    /// anything initiates the response.
    pub fn set_response_initial_metadata(&self, metadata: Vec<CustomMetadata>) -> Result<()> {
        // The latch is read under the metadata lock, which publication also
        // takes: a concurrent initiation cannot slip between the check and
        // the write and drop this metadata on the floor.
        let mut slot = self.inner.initial_metadata.lock();
        if self.response_initiated() {
            return Err(CallError::ResponseAlreadyInitiated);
        }
        *slot = metadata;
        Ok(())
    }

    /// Flips the latch and publishes the response headers. Sending any
    /// output calls this implicitly; calling it explicitly just fixes the
    /// initial metadata early. The wire flush still happens with the first
    /// element.
    pub fn initiate_response(&self) {
        if self.inner.initiated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.publish_response_headers();
    }

    /// Called exactly once, by whichever operation won the latch.
    fn publish_response_headers(&self) {
        let headers = ResponseHeaders {
            format: self.inner.request.headers.format.clone(),
            encoding: match &self.inner.response_coding {
                Coding::Identity => None,
                coding => Some(coding.clone()),
            },
            accept_encoding: Some(crate::compression::supported_codings().to_vec()),
            metadata: std::mem::take(&mut *self.inner.initial_metadata.lock()),
            unrecognized: Vec::new(),
        };
        // Published before any element can be queued behind it.
        self.inner.core.channel.set_outbound_headers(headers);
    }

    pub async fn send_output(&self, elem: StreamElem<Bytes, Trailers>) -> Result<()> {
        self.initiate_response();
        self.inner.core.send(elem).await
    }

    pub async fn send_next_output(&self, message: impl Into<Bytes>) -> Result<()> {
        self.send_output(StreamElem::Message(message.into())).await
    }

    pub async fn send_final_output(
        &self,
        message: impl Into<Bytes>,
        trailers: Trailers,
    ) -> Result<()> {
        self.send_output(StreamElem::Final(message.into(), trailers))
            .await
    }

    /// Terminates the response with trailers. With zero prior outputs the
    /// engine emits the Trailers-Only shape on the wire.
    pub async fn send_trailers(&self, trailers: Trailers) -> Result<()> {
        self.send_output(StreamElem::NoMore(trailers)).await
    }

    /// Explicit Trailers-Only: errors with
    /// [`CallError::ResponseAlreadyInitiated`] unless it is the very first
    /// thing the response does.
    pub async fn send_trailers_only(&self, trailers: Trailers) -> Result<()> {
        // One atomic flip decides the winner: two racing calls on clones of
        // the same call can never both pass.
        if self.inner.initiated.swap(true, Ordering::AcqRel) {
            return Err(CallError::ResponseAlreadyInitiated);
        }
        self.publish_response_headers();
        self.inner.core.send(StreamElem::NoMore(trailers)).await
    }

    /// Reports a typed error to the peer: Trailers-Only if the response has
    /// not been initiated, in-body trailers otherwise.
    pub async fn send_grpc_error(&self, status: GrpcStatus) -> Result<()> {
        self.send_trailers(Trailers::from_status(&status)).await
    }

    /// Whether the response already saw its terminal element.
    pub fn is_terminated(&self) -> bool {
        self.inner.core.channel().outbound_terminated()
    }

    /// Gracefully shuts the call down, joining both workers. Idempotent.
    pub async fn close(&self) {
        self.inner.core.channel.close().await;
    }
}
