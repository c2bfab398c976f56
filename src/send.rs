//! Outbound buffer bookkeeping for the send scheduler.
//!
//! `control_frames` (the LIFO stack) and `sendq` (the cross-thread message
//! queue) live on `ConnectionInner` in `connection.rs`; this module holds
//! the smaller pieces shared by both the producer and consumer sides.

use crate::nio::NonBlockingWrite;
use std::io;

/// A fully-encoded control frame waiting to be written, tagged with whether
/// it is the close frame (so the scheduler knows to shut the socket down
/// once it drains).
pub struct ControlFrame {
    pub bytes: Vec<u8>,
    pub is_close_frame: bool,
}

/// The buffer currently being drained to the socket. At most one is ever in
/// flight per connection.
pub struct SendBuf {
    bytes: Vec<u8>,
    pos: usize,
    pub is_close_frame: bool,
}

impl SendBuf {
    pub fn new(bytes: Vec<u8>, is_close_frame: bool) -> Self {
        Self { bytes, pos: 0, is_close_frame }
    }

    /// Issue exactly one `write` syscall of whatever remains, advancing
    /// `pos` by however much the socket accepted. Returns `true` once that
    /// single call has drained the buffer completely.
    pub fn write_to(&mut self, sock: &mut impl NonBlockingWrite) -> io::Result<bool> {
        if self.pos < self.bytes.len() {
            let n = sock.write(&self.bytes[self.pos..])?;
            self.pos += n;
        }
        Ok(self.pos >= self.bytes.len())
    }
}
