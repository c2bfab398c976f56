//! The application-level handler interface: the callbacks an embedder
//! implements to react to upgrades, incoming messages, and connection
//! close, plus a no-op default handler for connections nobody wired up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::connection::WeakConnectionHandle;
use crate::frame::CloseCode;
use crate::recv::DataPayload;

/// A monotonic id assigned when a connection is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// The three callbacks invoked on the event-loop thread. All have default
/// no-op bodies except `handle_websocket_upgrade`, so a handler only needs
/// to override what it cares about.
pub trait WebSocketHandler: Send + Sync {
    fn handle_websocket_upgrade(
        &self,
        connection_id: ConnectionId,
        connection: WeakConnectionHandle,
        headers: &HashMap<String, String>,
    );

    fn handle_websocket_data(
        &self,
        _payload: DataPayload,
        _message_starting: bool,
        _message_finished: bool,
        _connection_id: ConnectionId,
    ) {
    }

    fn handle_websocket_close(&self, _connection_id: ConnectionId) {}
}

/// Installed when no handler is configured: immediately closes new upgrades
/// with `NORMAL_CLOSE`.
pub struct DummyHandler;

impl WebSocketHandler for DummyHandler {
    fn handle_websocket_upgrade(
        &self,
        _connection_id: ConnectionId,
        connection: WeakConnectionHandle,
        _headers: &HashMap<String, String>,
    ) {
        if let Some(handle) = connection.upgrade() {
            handle.websocket_close(CloseCode::NormalClose, "No WebSocket handler available");
        }
    }
}
