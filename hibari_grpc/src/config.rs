//! Per-call tunables.

use crate::compression::{supported_codings, Coding};

const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Limits and negotiation preferences applied to one call.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Largest inbound message accepted, after decompression.
    pub max_recv_message_size: usize,
    /// Largest outbound message the facade will enqueue.
    pub max_send_message_size: usize,
    /// Elements buffered per direction before `send`/the inbound worker
    /// suspend.
    pub queue_depth: usize,
    /// Coding applied to outbound messages, subject to the peer accepting it.
    pub send_encoding: Coding,
    /// Codings advertised via `grpc-accept-encoding`.
    pub accept_encodings: Vec<Coding>,
    /// `user-agent` sent on client calls when the caller didn't set one.
    pub user_agent: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_recv_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_send_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            send_encoding: Coding::Identity,
            accept_encodings: supported_codings().to_vec(),
            user_agent: Some(concat!("hibari-grpc/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl CallConfig {
    pub fn with_max_recv_message_size(mut self, bytes: usize) -> Self {
        self.max_recv_message_size = bytes;
        self
    }

    pub fn with_max_send_message_size(mut self, bytes: usize) -> Self {
        self.max_send_message_size = bytes;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn with_send_encoding(mut self, coding: Coding) -> Self {
        self.send_encoding = coding;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.max_recv_message_size, 4 * 1024 * 1024);
        assert_eq!(config.send_encoding, Coding::Identity);
        assert!(config.user_agent.unwrap().starts_with("hibari-grpc/"));
    }

    #[test]
    fn test_queue_depth_floor() {
        let config = CallConfig::default().with_queue_depth(0);
        assert_eq!(config.queue_depth, 1);
    }
}
