//! Streaming module - broadcast hub, chunked encoding and the stream endpoint

mod chunked;
mod hub;
mod server;

pub use chunked::ChunkedWriter;
pub use hub::{BroadcastHub, Frame, FrameSink, HubConfig, SubscriberId};
pub use server::StreamServer;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Host to listen on
    pub host: String,
    pub port: u16,
    pub max_clients: usize,

    /// Events buffered between detectors and the hub
    pub event_queue_capacity: usize,

    /// Frames buffered per subscriber before it is dropped as stalled
    pub subscriber_buffer: usize,

    /// Per-frame write timeout in milliseconds
    pub write_timeout_ms: u64,

    /// Time a client gets to send its request, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
            max_clients: 64,
            event_queue_capacity: 100,
            subscriber_buffer: 16,
            write_timeout_ms: 2000,
            request_timeout_ms: 5000,
        }
    }
}

impl StreamingConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_subscribers: self.max_clients,
            subscriber_buffer: self.subscriber_buffer,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
