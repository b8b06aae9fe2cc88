//! gRPC call engine over an abstract HTTP/2 stream seam.
//!
//! One call is one HTTP/2 stream, driven through a symmetric session
//! channel: headers once, a stream of length-prefixed messages, trailers
//! once — in both directions, concurrently. The engine is format-agnostic
//! (payloads are `Bytes`, the format rides in `content-type`) and transport
//! agnostic (any [`h2link::H2Conn`] / [`h2link::H2Server`] binding works).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hibari_grpc::prelude::*;
//!
//! # async fn example() -> hibari_grpc::Result<()> {
//! let (conn, listener) = h2link::mem::pair();
//!
//! let mut handlers = HandlerMap::new();
//! handlers.register(Path::new("Greeter", "SayHello")?, |call: ServerCall| async move {
//!     let name = call.recv_only_input().await?;
//!     call.send_final_output(name, Trailers::ok()).await?;
//!     Ok(())
//! });
//! tokio::spawn(serve_connection(listener, Arc::new(handlers), CallConfig::default()));
//!
//! let path = Path::new("Greeter", "SayHello")?;
//! let call = initiate_request(
//!     &conn,
//!     "localhost",
//!     &path,
//!     RequestHeaders::default(),
//!     &CallConfig::default(),
//! )
//! .await?;
//! call.send_final_input("world").await?;
//! let (reply, trailers) = call.recv_only_output().await?;
//! assert_eq!(trailers.status, Code::Ok);
//! # drop(reply);
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod channel;
pub mod client;
pub mod compression;
pub mod config;
pub mod error;
pub mod framing;
pub mod headers;
pub mod metadata;
pub mod server;
pub mod status;
pub mod timeout;

// Re-export the call surface
pub use call::{ClientCall, ServerCall};
pub use channel::{ClientSession, NoMetadata, ServerSession, Session, StreamElem};
pub use client::initiate_request;
pub use compression::Coding;
pub use config::CallConfig;
pub use error::{CallError, Result, SetupFailure, SetupKind};
pub use headers::{
    InvalidHeader, InvalidHeaders, Path, RequestHeaders, ResponseHeaders, Trailers,
};
pub use metadata::{CustomMetadata, HeaderName, InvalidMetadata};
pub use server::{accept_call, serve_connection, HandlerMap, RequestInfo};
pub use status::{Code, GrpcStatus};
pub use timeout::GrpcTimeout;

pub mod prelude {
    //! Common imports for working with the engine.

    pub use crate::call::{ClientCall, ServerCall};
    pub use crate::channel::{NoMetadata, StreamElem};
    pub use crate::client::initiate_request;
    pub use crate::config::CallConfig;
    pub use crate::error::{CallError, Result};
    pub use crate::headers::{Path, RequestHeaders, ResponseHeaders, Trailers};
    pub use crate::metadata::{CustomMetadata, HeaderName};
    pub use crate::server::{serve_connection, HandlerMap, RequestInfo};
    pub use crate::status::{Code, GrpcStatus};
}
