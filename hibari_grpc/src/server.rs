//! Server role adapter: accepts request streams, dispatches handlers, and
//! drives the response side of the session channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use h2link::{BoxResponder, H2Server, IncomingCall, Responder};

use crate::call::ServerCall;
use crate::channel::{
    run_inbound_body, run_outbound_body, Channel, NoMetadata, OutboundElem, ServerSession,
    Session, StreamElem,
};
use crate::compression::Coding;
use crate::config::CallConfig;
use crate::error::{CallError, Result, SetupFailure, SetupKind};
use crate::headers::{
    parse_request_headers, serialize_response_headers, serialize_trailers,
    serialize_trailers_only, Path, RequestHeaders, ResponseHeaders, Trailers,
};
use crate::status::GrpcStatus;

/// What the server knows about a call before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub path: Path,
    pub authority: String,
    pub headers: RequestHeaders,
}

/// Accepts one request stream: validates the head, parses the request
/// headers, and spawns the channel workers.
///
/// On a setup failure the Trailers-Only refusal has already been written to
/// the transport when this returns `Err`; the handler layer only needs to
/// log it.
pub async fn accept_call(incoming: IncomingCall, config: &CallConfig) -> Result<ServerCall> {
    let IncomingCall {
        scheme,
        head,
        body,
        mut respond,
    } = incoming;

    if head.method != http::Method::POST {
        let status = GrpcStatus::internal(format!("method {} is not POST", head.method));
        refuse(&mut respond, http::StatusCode::METHOD_NOT_ALLOWED, &status).await;
        return Err(CallError::Setup(SetupFailure::new(
            SetupKind::InvalidRequestHeaders,
            format!("method {}", head.method),
        )));
    }

    let raw_path = head.uri.path();
    if raw_path.is_empty() || raw_path == "/" {
        let err = CallError::MissingPseudoHeader(":path");
        let status = GrpcStatus::internal("request carried no rpc path");
        refuse(&mut respond, http::StatusCode::BAD_REQUEST, &status).await;
        return Err(err);
    }
    let path = match Path::parse(raw_path) {
        Some(path) => path,
        None => {
            let status = GrpcStatus::unimplemented(format!("malformed rpc path {:?}", raw_path));
            refuse(&mut respond, http::StatusCode::OK, &status).await;
            return Err(CallError::Setup(SetupFailure::new(
                SetupKind::UnknownMethod,
                raw_path.to_string(),
            )));
        }
    };
    // :scheme must name the transport the request actually arrived on.
    if let Some(request_scheme) = head.uri.scheme() {
        if *request_scheme != scheme {
            let status = GrpcStatus::internal(format!(
                "request scheme {} does not match the transport",
                request_scheme
            ));
            refuse(&mut respond, http::StatusCode::BAD_REQUEST, &status).await;
            return Err(CallError::Protocol(format!(
                "scheme {} on a {} transport",
                request_scheme, scheme
            )));
        }
    }

    // :authority (or Host, for peers that send that instead) is mandatory.
    let authority = head
        .uri
        .authority()
        .map(|authority| authority.to_string())
        .or_else(|| {
            head.headers
                .get(http::header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        });
    let authority = match authority {
        Some(authority) => authority,
        None => {
            let status = GrpcStatus::internal("request carried no authority");
            refuse(&mut respond, http::StatusCode::BAD_REQUEST, &status).await;
            return Err(CallError::MissingPseudoHeader(":authority"));
        }
    };

    let (headers, invalid) = parse_request_headers(&head.headers);
    if !invalid.is_empty() {
        // Reply from the accumulated view: its first explicit HTTP status
        // (else 400) and the mapped gRPC status, as a Trailers-Only block.
        let status = invalid.to_grpc_status();
        refuse(&mut respond, invalid.http_status(), &status).await;
        return Err(CallError::Setup(SetupFailure::new(
            SetupKind::InvalidRequestHeaders,
            status.message().unwrap_or("invalid request headers").to_string(),
        )));
    }

    trace!("accepted call for {}", path);
    let (channel, plumbing) = Channel::<ServerSession>::new(config.queue_depth);
    channel.set_inbound_headers(headers.clone());

    let inbound_coding = headers.encoding.clone().unwrap_or(Coding::Identity);
    let declared_empty = head
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "0")
        .unwrap_or(false);
    let inbound = if declared_empty {
        // The client declared an empty request body up front; skip straight
        // to end-of-input.
        let feed = plumbing.inbound_feed;
        tokio::spawn(async move {
            let _ = feed.send(Ok(StreamElem::NoMore(NoMetadata))).await;
        })
    } else {
        tokio::spawn(run_inbound_body(
            channel.cancel_token(),
            plumbing.inbound_feed,
            body,
            inbound_coding,
            config.max_recv_message_size,
            <ServerSession as Session>::peer_disconnected,
            // The request body ends without a trailing block.
            |_| Ok(NoMetadata),
        ))
    };

    let response_coding = match &config.send_encoding {
        Coding::Identity => Coding::Identity,
        coding if client_accepts(&headers, coding) => coding.clone(),
        _ => Coding::Identity,
    };
    let outbound = tokio::spawn(run_server_outbound(
        channel.clone(),
        plumbing.outbound_drain,
        respond,
        response_coding.clone(),
    ));
    channel.set_workers(inbound, outbound).await;

    let request = RequestInfo {
        path,
        authority,
        headers,
    };
    Ok(ServerCall::new(
        channel,
        request,
        config.clone(),
        response_coding,
    ))
}

fn client_accepts(headers: &RequestHeaders, coding: &Coding) -> bool {
    headers
        .accept_encoding
        .as_ref()
        .map(|accepted| accepted.contains(coding))
        .unwrap_or(false)
}

/// Writes a Trailers-Only refusal for a call that never reached a handler.
async fn refuse(respond: &mut BoxResponder, http_status: http::StatusCode, status: &GrpcStatus) {
    let trailers = Trailers::from_status(status);
    match serialize_trailers_only(&ResponseHeaders::default(), &trailers) {
        Ok(block) => {
            if let Err(err) = respond.send_response(http_status, block, true).await {
                debug!("failed to write call refusal: {}", err);
            }
        }
        Err(err) => warn!("failed to serialize call refusal: {}", err),
    }
}

/// The response side: waits for the first outbound element, initiates the
/// response in the appropriate shape, then streams the body.
async fn run_server_outbound(
    channel: Arc<Channel<ServerSession>>,
    mut drain: mpsc::Receiver<OutboundElem<ServerSession>>,
    mut respond: BoxResponder,
    coding: Coding,
) {
    let cancel = channel.cancel_token();
    // Elements already accepted take priority over cancellation so the
    // response they initiate still reaches the wire.
    let first = tokio::select! {
        biased;
        elem = drain.recv() => match elem {
            Some(elem) => elem,
            None => return,
        },
        _ = cancel.cancelled() => {
            trace!("server outbound worker cancelled before initiating the response");
            // Dropping the responder resets the stream.
            return;
        }
    };

    // The facade publishes the headers before queueing any element.
    let headers = match channel.wait_outbound_headers().await {
        Ok(headers) => headers,
        Err(_) => return,
    };

    if let StreamElem::NoMore(trailers) = first {
        // Zero output messages: elide HEADERS+DATA+TRAILERS into a single
        // HEADERS block with end-of-stream.
        match serialize_trailers_only(&headers, &trailers) {
            Ok(block) => {
                if let Err(err) = respond.send_response(http::StatusCode::OK, block, true).await {
                    debug!("failed to send trailers-only response: {}", err);
                }
            }
            Err(err) => warn!("failed to serialize trailers-only response: {}", err),
        }
        return;
    }

    let block = match serialize_response_headers(&headers) {
        Ok(block) => block,
        Err(err) => {
            warn!("failed to serialize response headers: {}", err);
            return;
        }
    };
    let writer = match respond.send_response(http::StatusCode::OK, block, false).await {
        Ok(Some(writer)) => writer,
        Ok(None) => {
            warn!("transport elided the response body unexpectedly");
            return;
        }
        Err(err) => {
            debug!("failed to initiate the response: {}", err);
            drain.close();
            return;
        }
    };
    run_outbound_body(cancel, drain, writer, coding, Some(first), |trailers| {
        serialize_trailers(&trailers).map(Some)
    })
    .await;
}

// ============================================================================
// Handler dispatch
// ============================================================================

pub type HandlerFuture = BoxFuture<'static, Result<()>>;
type Handler = Arc<dyn Fn(ServerCall) -> HandlerFuture + Send + Sync>;

/// Registered RPC handlers keyed by path. Unknown paths are answered with a
/// Trailers-Only `Unimplemented`.
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Handler>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, path: Path, handler: F) -> &mut Self
    where
        F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .insert(path.full(), Arc::new(move |call| handler(call).boxed()));
        self
    }

    fn get(&self, path: &Path) -> Option<Handler> {
        self.handlers.get(&path.full()).cloned()
    }
}

/// Serves every call arriving on one HTTP/2 connection until the peer goes
/// away. Each call runs on its own task.
pub async fn serve_connection<L>(
    mut listener: L,
    handlers: Arc<HandlerMap>,
    config: CallConfig,
) -> Result<()>
where
    L: H2Server + Send,
{
    while let Some(accepted) = listener.accept().await {
        let incoming = match accepted {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!("failed to accept a request stream: {}", err);
                continue;
            }
        };
        let handlers = handlers.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_call(incoming, handlers, config).await {
                debug!("call ended with error: {}", err);
            }
        });
    }
    Ok(())
}

async fn handle_call(
    incoming: IncomingCall,
    handlers: Arc<HandlerMap>,
    config: CallConfig,
) -> Result<()> {
    let call = accept_call(incoming, &config).await?;

    let handler = match handlers.get(&call.request().path) {
        Some(handler) => handler,
        None => {
            let status =
                GrpcStatus::unimplemented(format!("unknown method {}", call.request().path));
            call.send_grpc_error(status).await?;
            call.close().await;
            return Ok(());
        }
    };

    let deadline = call.request().headers.timeout.map(|timeout| timeout.duration());
    let completion = supervise(handler(call.clone()));
    let outcome = match deadline {
        Some(duration) => match tokio::time::timeout(duration, completion).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The handler future is gone; report the deadline on the wire
                // if the response can still carry it, then tear down. close()
                // flushes the trailers before stopping the inbound drain.
                let status = GrpcStatus::deadline_exceeded("call deadline expired");
                let _ = call.send_grpc_error(status).await;
                call.close().await;
                return Ok(());
            }
        },
        None => completion.await,
    };

    match outcome {
        Ok(()) => {
            // A handler that returns without terminating the response gets
            // successful trailers on its behalf.
            if !call.is_terminated() {
                let _ = call.send_trailers(Trailers::ok()).await;
            }
        }
        Err(err) => {
            let status = match &err {
                CallError::Grpc(status) => status.clone(),
                other => {
                    // Sanitized: the description stays in the log.
                    warn!("handler for {} failed: {}", call.request().path, other);
                    GrpcStatus::unknown("internal error")
                }
            };
            let _ = call.send_grpc_error(status).await;
        }
    }
    call.close().await;
    Ok(())
}

/// Converts handler panics into an error outcome so the call still gets a
/// status and an orderly teardown.
fn supervise(fut: HandlerFuture) -> impl Future<Output = Result<()>> {
    std::panic::AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|outcome| match outcome {
            Ok(result) => result,
            Err(_) => Err(CallError::Protocol("handler panicked".into())),
        })
}
