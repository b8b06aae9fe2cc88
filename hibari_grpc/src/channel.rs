//! The symmetric session channel.
//!
//! A channel is one open call seen from one side: an inbound direction
//! (headers slot, bounded element queue, worker draining the transport) and
//! an outbound direction (headers slot, bounded element queue, worker feeding
//! the transport). Client and server use the same machinery with the header
//! and trailer types swapped, which is what the [`Session`] trait captures.
//!
//! Ownership: the call facade owns the channel; each worker exclusively owns
//! its side's transport handle. The queues are single-producer
//! single-consumer per direction. Cancellation is cooperative: workers check
//! the token at every suspension point, and in-flight `send`/`recv` calls
//! wake with the abort reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use h2link::{BoxChunkReader, BoxChunkWriter, ChunkReader, ChunkWriter, TransportError};

use crate::compression::{self, Coding};
use crate::error::{CallError, Result};
use crate::framing::{encode_envelope, Envelope, FrameDecoder, FrameError};
use crate::headers::{RequestHeaders, ResponseHeaders, Trailers};

// ============================================================================
// Stream elements
// ============================================================================

/// One element of a message stream: a message with more to follow, the final
/// message fused with its end-of-stream metadata, or end-of-stream metadata
/// alone.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamElem<A, B> {
    Message(A),
    Final(A, B),
    NoMore(B),
}

impl<A, B> StreamElem<A, B> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }
}

/// End-of-stream marker for directions that carry no trailing metadata (a
/// client request body half-closes without a trailers block).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoMetadata;

// ============================================================================
// Sessions
// ============================================================================

/// The capability set that lets the channel be driven from either role.
pub trait Session: Send + Sync + 'static {
    type InboundHeaders: Clone + Send + Sync + 'static;
    type InboundTrailers: Clone + Send + Sync + 'static;
    type OutboundHeaders: Clone + Send + Sync + 'static;
    type OutboundTrailers: Send + Sync + 'static;

    /// The error surfaced locally when the peer goes away mid-call.
    fn peer_disconnected() -> CallError;
}

/// The client view: outbound is the request, inbound is the response.
pub struct ClientSession;

impl Session for ClientSession {
    type InboundHeaders = ResponseHeaders;
    type InboundTrailers = Trailers;
    type OutboundHeaders = RequestHeaders;
    type OutboundTrailers = NoMetadata;

    fn peer_disconnected() -> CallError {
        CallError::ServerDisconnected
    }
}

/// The server view: inbound is the request, outbound is the response.
pub struct ServerSession;

impl Session for ServerSession {
    type InboundHeaders = RequestHeaders;
    type InboundTrailers = NoMetadata;
    type OutboundHeaders = ResponseHeaders;
    type OutboundTrailers = Trailers;

    fn peer_disconnected() -> CallError {
        CallError::ClientDisconnected
    }
}

pub type InboundElem<S> = StreamElem<Bytes, <S as Session>::InboundTrailers>;
pub type OutboundElem<S> = StreamElem<Bytes, <S as Session>::OutboundTrailers>;

// ============================================================================
// Write-once slot
// ============================================================================

/// A write-once cell whose readers suspend until a value (or failure) is
/// published.
pub(crate) struct OnceSlot<T> {
    tx: watch::Sender<Option<std::result::Result<T, CallError>>>,
}

impl<T: Clone + Send + Sync + 'static> OnceSlot<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publishes a value. Returns false when the slot was already populated.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(Ok(value));
                true
            } else {
                false
            }
        })
    }

    /// Publishes a failure that every waiter observes.
    pub fn fail(&self, err: CallError) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(Err(err));
                true
            } else {
                false
            }
        })
    }

    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.tx.subscribe();
        let guard = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| CallError::HandlerTerminated)?;
        match &*guard {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(CallError::Protocol("headers slot closed".into())),
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

enum InboundEnd<S: Session> {
    Trailers(S::InboundTrailers),
    Failed(CallError),
}

struct Inbound<S: Session> {
    headers: OnceSlot<S::InboundHeaders>,
    rx: Mutex<mpsc::Receiver<Result<InboundElem<S>>>>,
    /// Terminal state replayed to every recv after the first end.
    ended: Mutex<Option<InboundEnd<S>>>,
}

struct Outbound<S: Session> {
    headers: OnceSlot<S::OutboundHeaders>,
    tx: mpsc::Sender<OutboundElem<S>>,
    terminated: AtomicBool,
}

/// The queue ends handed to the role adapter's workers.
pub(crate) struct ChannelPlumbing<S: Session> {
    pub inbound_feed: mpsc::Sender<Result<InboundElem<S>>>,
    pub outbound_drain: mpsc::Receiver<OutboundElem<S>>,
}

pub struct Channel<S: Session> {
    inbound: Inbound<S>,
    outbound: Outbound<S>,
    cancel: CancellationToken,
    abort_reason: parking_lot::Mutex<Option<CallError>>,
    inbound_worker: Mutex<Option<JoinHandle<()>>>,
    outbound_worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Session> Channel<S> {
    pub(crate) fn new(queue_depth: usize) -> (Arc<Self>, ChannelPlumbing<S>) {
        let (inbound_feed, inbound_rx) = mpsc::channel(queue_depth);
        let (outbound_tx, outbound_drain) = mpsc::channel(queue_depth);
        let channel = Arc::new(Self {
            inbound: Inbound {
                headers: OnceSlot::new(),
                rx: Mutex::new(inbound_rx),
                ended: Mutex::new(None),
            },
            outbound: Outbound {
                headers: OnceSlot::new(),
                tx: outbound_tx,
                terminated: AtomicBool::new(false),
            },
            cancel: CancellationToken::new(),
            abort_reason: parking_lot::Mutex::new(None),
            inbound_worker: Mutex::new(None),
            outbound_worker: Mutex::new(None),
        });
        (
            channel,
            ChannelPlumbing {
                inbound_feed,
                outbound_drain,
            },
        )
    }

    pub(crate) async fn set_workers(&self, inbound: JoinHandle<()>, outbound: JoinHandle<()>) {
        *self.inbound_worker.lock().await = Some(inbound);
        *self.outbound_worker.lock().await = Some(outbound);
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn abort_error(&self) -> CallError {
        self.abort_reason
            .lock()
            .clone()
            .unwrap_or(CallError::HandlerTerminated)
    }

    /// Tears the call down with `reason`; every suspended operation wakes
    /// with it. Idempotent — the first reason wins.
    pub fn abort(&self, reason: CallError) {
        {
            let mut slot = self.abort_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    /// Enqueues an outbound element, suspending while the queue is full.
    /// Terminal elements flip the terminated flag; any element after that is
    /// a [`CallError::HandlerTerminated`].
    pub async fn send(&self, elem: OutboundElem<S>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.abort_error());
        }
        if elem.is_terminal() {
            if self.outbound.terminated.swap(true, Ordering::AcqRel) {
                return Err(CallError::HandlerTerminated);
            }
        } else if self.outbound.terminated.load(Ordering::Acquire) {
            return Err(CallError::HandlerTerminated);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.abort_error()),
            sent = self.outbound.tx.send(elem) => sent.map_err(|_| S::peer_disconnected()),
        }
    }

    /// Dequeues the next inbound element, suspending while the queue is
    /// empty. After the stream ends the terminal element is replayed
    /// indefinitely; after a failure the failure is replayed.
    pub async fn recv(&self) -> Result<InboundElem<S>> {
        if let Some(end) = &*self.inbound.ended.lock().await {
            return match end {
                InboundEnd::Trailers(trailers) => Ok(StreamElem::NoMore(trailers.clone())),
                InboundEnd::Failed(err) => Err(err.clone()),
            };
        }

        let next = {
            let mut rx = self.inbound.rx.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.abort_error()),
                next = rx.recv() => next,
            }
        };

        match next {
            Some(Ok(elem)) => {
                match &elem {
                    StreamElem::Final(_, trailers) | StreamElem::NoMore(trailers) => {
                        *self.inbound.ended.lock().await =
                            Some(InboundEnd::Trailers(trailers.clone()));
                    }
                    StreamElem::Message(_) => {}
                }
                Ok(elem)
            }
            Some(Err(err)) => {
                *self.inbound.ended.lock().await = Some(InboundEnd::Failed(err.clone()));
                Err(err)
            }
            // The worker died without an end sentinel (supervision converts
            // this to a peer loss).
            None => {
                let err = S::peer_disconnected();
                *self.inbound.ended.lock().await = Some(InboundEnd::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// The parsed inbound headers; suspends until the worker publishes them.
    pub async fn inbound_headers(&self) -> Result<S::InboundHeaders> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.abort_error()),
            headers = self.inbound.headers.wait() => headers,
        }
    }

    pub(crate) fn set_inbound_headers(&self, headers: S::InboundHeaders) -> bool {
        self.inbound.headers.set(headers)
    }

    pub(crate) fn fail_inbound_headers(&self, err: CallError) {
        self.inbound.headers.fail(err);
    }

    /// Publishes the outbound headers. Returns false if they were already
    /// set.
    pub(crate) fn set_outbound_headers(&self, headers: S::OutboundHeaders) -> bool {
        self.outbound.headers.set(headers)
    }

    pub(crate) async fn wait_outbound_headers(&self) -> Result<S::OutboundHeaders> {
        self.outbound.headers.wait().await
    }

    /// Whether a terminal element has been accepted for the outbound
    /// direction.
    pub fn outbound_terminated(&self) -> bool {
        self.outbound.terminated.load(Ordering::Acquire)
    }

    /// Shuts the call down and joins both workers. A call whose outbound
    /// direction never saw its terminal element is aborted rather than
    /// drained. Idempotent.
    pub async fn close(&self) {
        if !self.outbound.terminated.load(Ordering::Acquire) {
            self.abort(CallError::HandlerTerminated);
        }
        if let Some(handle) = self.outbound_worker.lock().await.take() {
            if let Err(err) = handle.await {
                debug!("outbound worker did not exit cleanly: {}", err);
            }
        }
        // The outbound side is flushed; stop the inbound drain if the peer
        // is still streaming.
        self.cancel.cancel();
        if let Some(handle) = self.inbound_worker.lock().await.take() {
            if let Err(err) = handle.await {
                debug!("inbound worker did not exit cleanly: {}", err);
            }
        }
    }
}

impl<S: Session> Drop for Channel<S> {
    fn drop(&mut self) {
        // Safety net for calls dropped without close(): workers notice the
        // token and abandon their streams.
        self.cancel.cancel();
    }
}

// ============================================================================
// Workers
// ============================================================================

pub(crate) fn map_transport_err(err: TransportError, disconnect: fn() -> CallError) -> CallError {
    match err {
        TransportError::Closed | TransportError::Reset(_) => disconnect(),
        TransportError::Io(err) => CallError::Transport(err.to_string()),
        TransportError::Protocol(msg) => CallError::Protocol(msg),
    }
}

/// Drains one inbound body: transport chunks through the framing decoder into
/// the element queue, then trailers. Runs until end-of-stream, error, or
/// cancellation.
pub(crate) async fn run_inbound_body<T, F>(
    cancel: CancellationToken,
    feed: mpsc::Sender<Result<StreamElem<Bytes, T>>>,
    mut reader: BoxChunkReader,
    coding: Coding,
    max_message_size: usize,
    disconnect: fn() -> CallError,
    parse_trailers: F,
) where
    T: Send + 'static,
    F: FnOnce(Option<HeaderMap>) -> Result<T> + Send,
{
    let mut decoder = FrameDecoder::new(max_message_size);
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                trace!("inbound worker cancelled");
                return;
            }
            chunk = reader.chunk() => chunk,
        };
        match chunk {
            Ok(Some(data)) => {
                decoder.push(&data);
                loop {
                    match decoder.next() {
                        Ok(Some(envelope)) => {
                            let payload = match unpack(envelope, &coding, max_message_size) {
                                Ok(payload) => payload,
                                Err(err) => {
                                    let _ = feed.send(Err(err)).await;
                                    return;
                                }
                            };
                            if feed.send(Ok(StreamElem::Message(payload))).await.is_err() {
                                trace!("inbound receiver gone, stopping drain");
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            let _ = feed.send(Err(CallError::Grpc(err.to_grpc_status()))).await;
                            return;
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = feed.send(Err(map_transport_err(err, disconnect))).await;
                return;
            }
        }
    }

    if !decoder.is_clean() {
        let _ = feed
            .send(Err(CallError::Grpc(FrameError::Truncated.to_grpc_status())))
            .await;
        return;
    }

    let raw_trailers = match reader.trailers().await {
        Ok(raw) => raw,
        Err(err) => {
            let _ = feed.send(Err(map_transport_err(err, disconnect))).await;
            return;
        }
    };
    let end = match parse_trailers(raw_trailers) {
        Ok(trailers) => Ok(StreamElem::NoMore(trailers)),
        Err(err) => Err(err),
    };
    let _ = feed.send(end).await;
    trace!("inbound worker done");
}

fn unpack(envelope: Envelope, coding: &Coding, max_message_size: usize) -> Result<Bytes> {
    if !envelope.compressed {
        return Ok(envelope.payload);
    }
    compression::decompress(coding, &envelope.payload, max_message_size)
        .map_err(|err| CallError::Grpc(err.to_grpc_status()))
}

/// Streams one outbound body: elements off the queue, each encoded as an
/// envelope, with the trailing block flushed after the terminal element.
/// `first` carries an element the adapter already dequeued (the server pulls
/// one to decide between streaming and Trailers-Only).
pub(crate) async fn run_outbound_body<T, F>(
    cancel: CancellationToken,
    mut drain: mpsc::Receiver<StreamElem<Bytes, T>>,
    mut writer: BoxChunkWriter,
    coding: Coding,
    first: Option<StreamElem<Bytes, T>>,
    serialize_trailers: F,
) where
    T: Send + 'static,
    F: Fn(T) -> Result<Option<HeaderMap>> + Send,
{
    let mut buf = BytesMut::new();
    let mut next = first;
    loop {
        let elem = match next.take() {
            Some(elem) => elem,
            // Elements already queued are flushed before cancellation is
            // honored, so an abort never drops writes the facade accepted.
            None => tokio::select! {
                biased;
                elem = drain.recv() => match elem {
                    Some(elem) => elem,
                    // Sender dropped without a terminal element.
                    None => {
                        writer.abort();
                        return;
                    }
                },
                _ = cancel.cancelled() => {
                    trace!("outbound worker cancelled");
                    writer.abort();
                    return;
                }
            },
        };
        let trailers = match elem {
            StreamElem::Message(payload) => {
                if let Err(err) = write_message(&mut writer, &mut buf, &coding, payload).await {
                    debug!("outbound write failed: {}", err);
                    // Wake queued senders with the peer-disconnected error.
                    drain.close();
                    return;
                }
                continue;
            }
            StreamElem::Final(payload, trailers) => {
                if let Err(err) = write_message(&mut writer, &mut buf, &coding, payload).await {
                    debug!("outbound write failed: {}", err);
                    drain.close();
                    return;
                }
                trailers
            }
            StreamElem::NoMore(trailers) => trailers,
        };

        let flushed = match serialize_trailers(trailers) {
            Ok(Some(map)) => writer.finish_with_trailers(map).await,
            Ok(None) => writer.finish().await,
            Err(err) => {
                warn!("failed to serialize trailers: {}", err);
                writer.abort();
                return;
            }
        };
        if let Err(err) = flushed {
            debug!("failed to flush end of stream: {}", err);
        }
        trace!("outbound worker done");
        return;
    }
}

async fn write_message(
    writer: &mut BoxChunkWriter,
    buf: &mut BytesMut,
    coding: &Coding,
    payload: Bytes,
) -> Result<()> {
    let envelope = match coding {
        Coding::Identity => Envelope::plain(payload),
        other => {
            let packed = compression::compress(other, &payload)
                .map_err(|err| CallError::Grpc(err.to_grpc_status()))?;
            Envelope::compressed(packed)
        }
    };
    encode_envelope(&envelope, buf);
    writer
        .write(buf.split().freeze())
        .await
        .map_err(|err| CallError::Transport(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_once_slot_set_then_wait() {
        let slot: OnceSlot<u32> = OnceSlot::new();
        assert!(slot.set(7));
        assert!(!slot.set(8));
        assert_eq!(slot.wait().await.unwrap(), 7);
        // Waiting again observes the same value.
        assert_eq!(slot.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_once_slot_wakes_waiter() {
        let slot: std::sync::Arc<OnceSlot<u32>> = std::sync::Arc::new(OnceSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(slot.set(42));
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_once_slot_failure_propagates() {
        let slot: OnceSlot<u32> = OnceSlot::new();
        slot.fail(CallError::ServerDisconnected);
        assert!(matches!(
            slot.wait().await,
            Err(CallError::ServerDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_send_after_terminal_is_rejected() {
        let (channel, mut plumbing) = Channel::<ServerSession>::new(4);
        channel
            .send(StreamElem::NoMore(Trailers::ok()))
            .await
            .unwrap();
        let err = channel
            .send(StreamElem::Message(Bytes::from_static(b"late")))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::HandlerTerminated));

        // The terminal element did reach the queue.
        let elem = plumbing.outbound_drain.recv().await.unwrap();
        assert!(elem.is_terminal());
    }

    #[tokio::test]
    async fn test_recv_replays_end_of_stream() {
        let (channel, plumbing) = Channel::<ServerSession>::new(4);
        plumbing
            .inbound_feed
            .send(Ok(StreamElem::Message(Bytes::from_static(b"one"))))
            .await
            .unwrap();
        plumbing
            .inbound_feed
            .send(Ok(StreamElem::NoMore(NoMetadata)))
            .await
            .unwrap();

        assert_eq!(
            channel.recv().await.unwrap(),
            StreamElem::Message(Bytes::from_static(b"one"))
        );
        assert_eq!(channel.recv().await.unwrap(), StreamElem::NoMore(NoMetadata));
        // End-of-stream is sticky.
        assert_eq!(channel.recv().await.unwrap(), StreamElem::NoMore(NoMetadata));
    }

    #[tokio::test]
    async fn test_recv_replays_failure() {
        let (channel, plumbing) = Channel::<ClientSession>::new(4);
        plumbing
            .inbound_feed
            .send(Err(CallError::ServerDisconnected))
            .await
            .unwrap();

        assert!(matches!(
            channel.recv().await,
            Err(CallError::ServerDisconnected)
        ));
        assert!(matches!(
            channel.recv().await,
            Err(CallError::ServerDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_abort_wakes_pending_recv() {
        let (channel, _plumbing) = Channel::<ClientSession>::new(4);
        let receiver = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.recv().await })
        };
        tokio::task::yield_now().await;
        channel.abort(CallError::Grpc(crate::status::GrpcStatus::deadline_exceeded(
            "deadline expired",
        )));
        let got = receiver.await.unwrap();
        assert!(matches!(got, Err(CallError::Grpc(_))));
    }

    #[tokio::test]
    async fn test_dropped_feed_reads_as_peer_loss() {
        let (channel, plumbing) = Channel::<ClientSession>::new(4);
        drop(plumbing.inbound_feed);
        assert!(matches!(
            channel.recv().await,
            Err(CallError::ServerDisconnected)
        ));
    }
}
