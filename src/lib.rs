//! A server-side RFC 6455 WebSocket protocol engine for non-blocking,
//! readiness-driven event loops.
//!
//! This crate implements the connection-level state machine only: framing,
//! masking, fragmentation, the upgrade handshake, and the close sequence.
//! The HTTP/1.1 request parser, the TCP listener and reactor, and the
//! application handler are external collaborators the embedder supplies.

pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod nio;
pub mod recv;
pub mod send;
pub mod utf8;
pub mod waker;

pub use config::{ServerConfig, WebSocketConfig};
pub use connection::{Connection, ConnectionHandle, Readiness, WeakConnectionHandle};
pub use error::Error;
pub use frame::{CloseCode, OpCode};
pub use handler::{ConnectionId, DummyHandler, WebSocketHandler};
pub use handshake::{accept_token, build_response, validate_upgrade, Method, UpgradeRequest};
pub use message::{DataType, MessageWriter};
pub use recv::DataPayload;
pub use waker::Waker;
