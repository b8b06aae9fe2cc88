//! Smoke test over the hyper HTTP/2 binding, using an in-process duplex pipe
//! instead of a socket. Exercises the same engine paths as the in-memory
//! transport but with real HTTP/2 framing underneath.

use std::sync::Arc;

use bytes::Bytes;
use h2link::hyper_conn;
use hibari_grpc::prelude::*;

#[tokio::test]
async fn test_unary_echo_over_hyper() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let listener = hyper_conn::serve(server_io, http::uri::Scheme::HTTP);
    let mut handlers = HandlerMap::new();
    handlers.register(
        Path::new("Echo", "Once").unwrap(),
        |call: ServerCall| async move {
            let input = call.recv_only_input().await?;
            call.send_final_output(input, Trailers::ok()).await?;
            Ok(())
        },
    );
    tokio::spawn(serve_connection(
        listener,
        Arc::new(handlers),
        CallConfig::default(),
    ));

    let conn = hyper_conn::connect(client_io, http::uri::Scheme::HTTP)
        .await
        .unwrap();
    let path = Path::new("Echo", "Once").unwrap();
    let call = initiate_request(
        &conn,
        "localhost",
        &path,
        RequestHeaders::default(),
        &CallConfig::default(),
    )
    .await
    .unwrap();

    call.send_final_input("ping").await.unwrap();
    let (reply, trailers) = call.recv_only_output().await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"ping"));
    assert_eq!(trailers.status, Code::Ok);
    call.close().await;
}

#[tokio::test]
async fn test_unknown_method_over_hyper() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let listener = hyper_conn::serve(server_io, http::uri::Scheme::HTTP);
    tokio::spawn(serve_connection(
        listener,
        Arc::new(HandlerMap::new()),
        CallConfig::default(),
    ));

    let conn = hyper_conn::connect(client_io, http::uri::Scheme::HTTP)
        .await
        .unwrap();
    let path = Path::new("Echo", "Nothing").unwrap();
    let call = initiate_request(
        &conn,
        "localhost",
        &path,
        RequestHeaders::default(),
        &CallConfig::default(),
    )
    .await
    .unwrap();

    call.half_close().await.unwrap();
    let trailers = call.recv_trailers().await.unwrap();
    assert_eq!(trailers.status, Code::Unimplemented);
    call.close().await;
}
