use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

use crate::frame::CloseCode;

/// All failure modes the engine can report, from a protocol violation
/// detected mid-frame to an I/O failure on the underlying socket.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Utf8 {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    HttpParse {
        #[from]
        source: httparse::Error,
    },

    // Handshake errors
    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeader,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeader,

    #[error("Sec-WebSocket-Key header missing in the request")]
    NoSecWebSocketKey,

    #[error("Sec-WebSocket-Version must be an integer >= 13")]
    UnsupportedVersion,

    #[error("method must be GET for a WebSocket upgrade")]
    InvalidMethod,

    // Framing errors, always fatal to the connection (see disposition table)
    #[error("unknown opcode: {0}")]
    InvalidOpcode(u8),

    #[error("client frame was not masked")]
    UnmaskedFrame,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    #[error("control frame was fragmented (FIN=0)")]
    FragmentedControlFrame,

    #[error("RSV bits must be zero (no extensions negotiated)")]
    ReservedBitsSet,

    #[error("TEXT message payload was not valid UTF-8")]
    InvalidUtf8,

    #[error("message exceeded the configured maximum size")]
    MessageTooBig,
}

impl Error {
    /// The close code that should accompany this error, if the connection
    /// is still in a state where a close frame can usefully be sent.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidOpcode(_)
            | Error::UnmaskedFrame
            | Error::ControlFrameTooLarge
            | Error::FragmentedControlFrame
            | Error::ReservedBitsSet => CloseCode::ProtocolError,
            Error::InvalidUtf8 => CloseCode::InconsistentData,
            Error::MessageTooBig => CloseCode::MessageTooBig,
            _ => CloseCode::UnexpectedError,
        }
    }
}
