use std::time::Duration;

/// Timing and buffering knobs for connection liveness and reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Period of the `: heartbeat` comment frame on every connection.
    pub heartbeat_interval: Duration,
    /// Period of the inactive-connection sweep.
    pub cleanup_interval: Duration,
    /// Connections not written to successfully for this long are evicted.
    pub client_timeout: Duration,
    /// Reconnection delay advertised to clients in the initial `retry:` frame.
    pub retry_interval: Duration,
    /// Frames queued for a client before it counts as stalled and is closed.
    pub stream_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(300),
            retry_interval: Duration::from_millis(3000),
            stream_buffer: 32,
        }
    }
}
