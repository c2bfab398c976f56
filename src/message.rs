//! The outbound message writer.
//!
//! Frames are produced one at a time via `next_frame` rather than built
//! eagerly, so the send scheduler can interleave a control-frame reply
//! between two frames of an in-progress message.

use crate::frame::{encode_frame, OpCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Binary,
}

impl DataType {
    fn opcode(&self) -> OpCode {
        match self {
            DataType::Text => OpCode::Text,
            DataType::Binary => OpCode::Binary,
        }
    }
}

/// Produces successive frames of a single outbound message, honoring a
/// bounded chunk size and setting FIN/opcode correctly across fragmentation.
pub struct MessageWriter {
    payload: Vec<u8>,
    cursor: usize,
    data_type: DataType,
    chunk_size: usize,
    first_frame_created: bool,
    exhausted: bool,
}

impl MessageWriter {
    pub fn new(payload: Vec<u8>, data_type: DataType, chunk_size: usize) -> Self {
        Self {
            payload,
            cursor: 0,
            data_type,
            chunk_size: chunk_size.max(1),
            first_frame_created: false,
            exhausted: false,
        }
    }

    pub fn text(payload: String, chunk_size: usize) -> Self {
        Self::new(payload.into_bytes(), DataType::Text, chunk_size)
    }

    pub fn binary(payload: Vec<u8>, chunk_size: usize) -> Self {
        Self::new(payload, DataType::Binary, chunk_size)
    }

    /// Encode and return the next frame's wire bytes, or `None` once the
    /// final frame has already been produced.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.exhausted {
            return None;
        }
        let end = (self.cursor + self.chunk_size).min(self.payload.len());
        let chunk = &self.payload[self.cursor..end];
        self.cursor = end;
        let has_more = self.cursor < self.payload.len();

        // An empty payload must still yield exactly one fin=1 empty frame,
        // so "no more bytes" on the very first call is fin, not "nothing
        // to send".
        let fin = !has_more;
        let opcode = if self.first_frame_created {
            OpCode::Continuation
        } else {
            self.data_type.opcode()
        };
        self.first_frame_created = true;
        self.exhausted = fin;

        Some(encode_frame(fin, opcode, chunk, None))
    }
}
