//! Connection tunables.

/// Desired TCP send-buffer size used to derive the default outbound chunk
/// size (chunk size = desired TCP send buffer - 16).
pub const DESIRED_SEND_BUFFER_SIZE: usize = 16 * 1024;

/// Control-frame payload cap (also enforced by the decoder).
pub const CONTROL_PAYLOAD_CAP: usize = 125;

/// Close-reason cap, leaving room for the 2-byte code inside the 125-byte
/// control payload limit.
pub const CLOSE_REASON_CAP: usize = 123;

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Outbound chunk size used by freshly constructed `MessageWriter`s when
    /// no explicit size is given. Defaults to `DESIRED_SEND_BUFFER_SIZE - 16`.
    pub send_chunk_size: usize,
    /// Optional cap on the total bytes accumulated for one (possibly
    /// fragmented) message before the connection closes with
    /// `MESSAGE_TOO_BIG`. `None` means unbounded.
    pub max_message_size: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            send_chunk_size: DESIRED_SEND_BUFFER_SIZE - 16,
            max_message_size: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
}
