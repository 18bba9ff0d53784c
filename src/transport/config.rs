use std::time::Duration;

/// Largest inbound message accepted by default (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Transport configuration options.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Frames a connection buffers before `exchange` callers wait for room.
    pub outbound_capacity: usize,
    /// Maximum size of an inbound WebSocket message; `None` lifts the limit.
    pub max_frame_size: Option<usize>,
    /// Bound on establishing a connection. Replies are never timed out here.
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}
