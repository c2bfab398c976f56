//! The resumable frame decoder.
//!
//! A byte-at-a-time state machine over the RFC 6455 frame header (FIN,
//! opcode, mask bit, payload length, masking key) and payload, resumable
//! across partial, non-blocking reads instead of needing a full
//! header/payload available in one shot.

use crate::error::Error;
use crate::frame::{OpCode, CONTROL_PAYLOAD_CAP};
use crate::nio::NonBlockingRead;

const RECV_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug)]
enum DecoderState {
    ReadB0,
    ReadB1 { fin: bool, opcode: OpCode },
    ReadExtLen { fin: bool, opcode: OpCode, need: usize, have: Vec<u8> },
    ReadMaskKey { fin: bool, opcode: OpCode, len: u64, have: Vec<u8> },
    ReadPayload { fin: bool, opcode: OpCode, len: u64, pos: u64, mask: [u8; 4], frame_starting: bool },
    Done,
}

/// One delivery out of the decoder: a contiguous slice of a frame's
/// (already unmasked) payload, with enough metadata for the receive
/// assembler to reassemble messages.
pub struct FrameChunk {
    pub data: Vec<u8>,
    pub opcode: OpCode,
    pub frame_starting: bool,
    pub frame_finished: bool,
    pub is_final_frame_of_message: bool,
}

/// Drives one frame's worth of header + payload through a sequence of
/// non-blocking reads. A fresh `FrameDecoder` is installed after each frame
/// finishes.
pub struct FrameDecoder {
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { state: DecoderState::ReadB0 }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, DecoderState::Done)
    }

    /// Advance the decoder using bytes currently available on `source`,
    /// invoking `on_chunk` for every contiguous slice of payload produced.
    /// Returns once the source reports no more bytes are available (so the
    /// event loop can go back to waiting for readability) or once the frame
    /// is fully decoded.
    pub fn step(
        &mut self,
        source: &mut impl NonBlockingRead,
        mut on_chunk: impl FnMut(FrameChunk),
    ) -> Result<(), Error> {
        loop {
            match &mut self.state {
                DecoderState::Done => return Ok(()),
                DecoderState::ReadB0 => {
                    let mut b = [0u8; 1];
                    if source.read(&mut b)? == 0 {
                        return Ok(());
                    }
                    let fin = b[0] & 0x80 != 0;
                    let rsv = b[0] & 0x70;
                    if rsv != 0 {
                        return Err(Error::ReservedBitsSet);
                    }
                    let opcode = OpCode::from_byte(b[0] & 0x0F)?;
                    self.state = DecoderState::ReadB1 { fin, opcode };
                }
                DecoderState::ReadB1 { fin, opcode } => {
                    let (fin, opcode) = (*fin, *opcode);
                    let mut b = [0u8; 1];
                    if source.read(&mut b)? == 0 {
                        return Ok(());
                    }
                    let masked = b[0] & 0x80 != 0;
                    if !masked {
                        return Err(Error::UnmaskedFrame);
                    }
                    if !fin && opcode.is_control() {
                        return Err(Error::FragmentedControlFrame);
                    }
                    let len_code = b[0] & 0x7F;
                    if opcode.is_control() && len_code as usize > CONTROL_PAYLOAD_CAP {
                        return Err(Error::ControlFrameTooLarge);
                    }
                    self.state = match len_code {
                        126 => DecoderState::ReadExtLen { fin, opcode, need: 2, have: Vec::new() },
                        127 => DecoderState::ReadExtLen { fin, opcode, need: 8, have: Vec::new() },
                        n => DecoderState::ReadMaskKey { fin, opcode, len: n as u64, have: Vec::new() },
                    };
                }
                DecoderState::ReadExtLen { fin, opcode, need, have } => {
                    let (fin, opcode, need) = (*fin, *opcode, *need);
                    let remaining = need - have.len();
                    let mut buf = vec![0u8; remaining];
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    have.extend_from_slice(&buf[..n]);
                    if have.len() < need {
                        continue;
                    }
                    let len = if need == 2 {
                        u16::from_be_bytes([have[0], have[1]]) as u64
                    } else {
                        u64::from_be_bytes(have[0..8].try_into().unwrap())
                    };
                    if opcode.is_control() && len as usize > CONTROL_PAYLOAD_CAP {
                        return Err(Error::ControlFrameTooLarge);
                    }
                    self.state = DecoderState::ReadMaskKey { fin, opcode, len, have: Vec::new() };
                }
                DecoderState::ReadMaskKey { fin, opcode, len, have } => {
                    let (fin, opcode, len) = (*fin, *opcode, *len);
                    let remaining = 4 - have.len();
                    let mut buf = vec![0u8; remaining];
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    have.extend_from_slice(&buf[..n]);
                    if have.len() < 4 {
                        continue;
                    }
                    let mask: [u8; 4] = have[0..4].try_into().unwrap();
                    if len == 0 {
                        on_chunk(FrameChunk {
                            data: Vec::new(),
                            opcode,
                            frame_starting: true,
                            frame_finished: true,
                            is_final_frame_of_message: fin,
                        });
                        self.state = DecoderState::Done;
                        return Ok(());
                    }
                    self.state = DecoderState::ReadPayload {
                        fin,
                        opcode,
                        len,
                        pos: 0,
                        mask,
                        frame_starting: true,
                    };
                }
                DecoderState::ReadPayload { fin, opcode, len, pos, mask, frame_starting } => {
                    let (fin, opcode, len, mask) = (*fin, *opcode, *len, *mask);
                    let remaining = (len - *pos) as usize;
                    let want = remaining.min(RECV_CHUNK_SIZE);
                    let mut buf = vec![0u8; want];
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    buf.truncate(n);
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte ^= mask[((*pos as usize) + i) & 3];
                    }
                    let starting = *frame_starting;
                    *pos += n as u64;
                    *frame_starting = false;
                    let finished = *pos >= len;
                    on_chunk(FrameChunk {
                        data: buf,
                        opcode,
                        frame_starting: starting,
                        frame_finished: finished,
                        is_final_frame_of_message: fin,
                    });
                    if finished {
                        self.state = DecoderState::Done;
                        return Ok(());
                    }
                }
            }
        }
    }
}
