//! Client role adapter: opens the HTTP/2 request stream and wires the
//! session channel onto it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use h2link::{H2Conn, ResponseFuture};

use crate::call::ClientCall;
use crate::channel::{
    map_transport_err, run_inbound_body, run_outbound_body, Channel, ClientSession, InboundElem,
    Session, StreamElem,
};
use crate::compression::Coding;
use crate::config::CallConfig;
use crate::error::{CallError, Result, SetupFailure, SetupKind};
use crate::headers::{
    parse_response_headers, parse_trailers, serialize_request_headers, InvalidHeader, Path,
    RequestHeaders, ResponseHeaders,
};
use crate::status::{GrpcStatus, GRPC_STATUS_HEADER};

/// Opens a call on `conn` for `path`, carrying `headers`.
///
/// The request headers go out immediately; the request body streams through
/// the returned call's `send_*` operations while responses arrive through
/// `recv_*` — the two sides are fully concurrent. Failures that happen before
/// the server could have observed any application bytes are classified as
/// setup failures ([`CallError::is_setup_failure`]); whether to retry on them
/// is the caller's policy.
pub async fn initiate_request<C>(
    conn: &C,
    authority: &str,
    path: &Path,
    mut headers: RequestHeaders,
    config: &CallConfig,
) -> Result<ClientCall>
where
    C: H2Conn + ?Sized,
{
    if headers.user_agent.is_none() {
        headers.user_agent = config.user_agent.clone();
    }
    if headers.accept_encoding.is_none() {
        headers.accept_encoding = Some(config.accept_encodings.clone());
    }
    let send_coding = config.send_encoding.clone();
    if !matches!(send_coding, Coding::Identity) && headers.encoding.is_none() {
        headers.encoding = Some(send_coding.clone());
    }

    let head = build_request_head(&conn.scheme(), authority, path, &headers)?;
    trace!("opening request for {}", path);
    let (writer, response) = conn.open(head).await.map_err(|err| {
        CallError::Setup(SetupFailure::new(SetupKind::Connect, err.to_string()))
    })?;

    let (channel, plumbing) = Channel::<ClientSession>::new(config.queue_depth);
    let timeout = headers.timeout;
    channel.set_outbound_headers(headers);

    // The deadline the header advertises is also enforced locally: the whole
    // call is cancelled once it expires.
    if let Some(timeout) = timeout {
        let channel = channel.clone();
        let cancel = channel.cancel_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout.duration()) => {
                    channel.abort(CallError::Grpc(GrpcStatus::deadline_exceeded(
                        "call deadline expired",
                    )));
                }
            }
        });
    }

    let outbound = tokio::spawn(run_outbound_body(
        channel.cancel_token(),
        plumbing.outbound_drain,
        writer,
        send_coding,
        None,
        // The request body half-closes without a trailing block.
        |_| Ok(None),
    ));
    let inbound = tokio::spawn(run_client_inbound(
        channel.clone(),
        plumbing.inbound_feed,
        response,
        config.max_recv_message_size,
    ));
    channel.set_workers(inbound, outbound).await;

    Ok(ClientCall::new(channel, config.clone()))
}

fn build_request_head(
    scheme: &http::uri::Scheme,
    authority: &str,
    path: &Path,
    headers: &RequestHeaders,
) -> Result<http::request::Parts> {
    let uri = http::Uri::builder()
        .scheme(scheme.clone())
        .authority(authority)
        .path_and_query(path.full())
        .build()
        .map_err(|err| {
            CallError::Setup(SetupFailure::new(
                SetupKind::Connect,
                format!("invalid request target: {}", err),
            ))
        })?;
    let mut request = http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .body(())
        .map_err(|err| {
            CallError::Setup(SetupFailure::new(
                SetupKind::Connect,
                format!("invalid request head: {}", err),
            ))
        })?;
    *request.headers_mut() = serialize_request_headers(headers)?;
    let (parts, ()) = request.into_parts();
    Ok(parts)
}

/// Awaits the response head, publishes the parsed headers, then drains the
/// response body and trailers into the channel.
async fn run_client_inbound(
    channel: Arc<Channel<ClientSession>>,
    feed: mpsc::Sender<Result<InboundElem<ClientSession>>>,
    response: ResponseFuture,
    max_message_size: usize,
) {
    let cancel = channel.cancel_token();
    let head = tokio::select! {
        _ = cancel.cancelled() => {
            trace!("client inbound worker cancelled before the response head");
            return;
        }
        head = response => head,
    };
    let head = match head {
        Ok(head) => head,
        Err(err) => {
            let mapped = map_transport_err(err, <ClientSession as Session>::peer_disconnected);
            channel.fail_inbound_headers(mapped.clone());
            let _ = feed.send(Err(mapped)).await;
            return;
        }
    };

    // gRPC responses ride on HTTP 200; anything else means the server never
    // spoke gRPC to us.
    if head.status != http::StatusCode::OK {
        let failure = CallError::Setup(SetupFailure::new(
            SetupKind::InvalidResponseHeaders,
            format!("HTTP status {}", head.status),
        ));
        channel.fail_inbound_headers(failure.clone());
        let _ = feed.send(Err(failure)).await;
        return;
    }

    // A grpc-status in the headers marks the Trailers-Only shape: the block
    // is both response headers and trailers, and no body follows.
    if head.headers.contains_key(GRPC_STATUS_HEADER) {
        let (trailers, invalid) = parse_trailers(&head.headers);
        if !invalid.is_empty() {
            debug!("trailers-only response had invalid entries: {:?}", invalid);
        }
        let (parsed, _) = parse_response_headers(&head.headers);
        channel.set_inbound_headers(ResponseHeaders {
            format: parsed.format,
            encoding: parsed.encoding,
            accept_encoding: parsed.accept_encoding,
            metadata: Vec::new(),
            unrecognized: Vec::new(),
        });
        let _ = feed.send(Ok(StreamElem::NoMore(trailers))).await;
        return;
    }

    let (parsed, invalid) = parse_response_headers(&head.headers);
    if !invalid.is_empty() {
        let failure = CallError::Setup(SetupFailure::new(
            SetupKind::InvalidResponseHeaders,
            describe_invalid(&invalid.entries()[0]),
        ));
        channel.fail_inbound_headers(failure.clone());
        let _ = feed.send(Err(failure)).await;
        return;
    }

    let coding = parsed.encoding.clone().unwrap_or(Coding::Identity);
    channel.set_inbound_headers(parsed);
    run_inbound_body(
        cancel,
        feed,
        head.body,
        coding,
        max_message_size,
        <ClientSession as Session>::peer_disconnected,
        |raw| match raw {
            Some(map) => {
                let (trailers, invalid) = parse_trailers(&map);
                let missing_status = invalid.entries().iter().any(|entry| {
                    matches!(entry, InvalidHeader::Missing { name } if *name == GRPC_STATUS_HEADER)
                });
                if missing_status {
                    Err(CallError::Protocol(
                        "response trailers missing grpc-status".into(),
                    ))
                } else {
                    Ok(trailers)
                }
            }
            // A stream that ends without status trailers is a peer loss, not
            // a silent end of stream.
            None => Err(CallError::ServerDisconnected),
        },
    )
    .await;
}

fn describe_invalid(entry: &InvalidHeader) -> String {
    match entry {
        InvalidHeader::Invalid { name, reason, .. } => format!("{}: {}", name, reason),
        InvalidHeader::Missing { name } => format!("missing header {}", name),
        InvalidHeader::Unexpected { name } => format!("unexpected header {}", name),
    }
}
