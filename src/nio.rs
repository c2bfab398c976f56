//! The non-blocking I/O seam the decoder and connection state machine are
//! written against, so the reactor and the concrete socket type stay
//! external collaborators.
//!
//! A conforming implementation behaves like a socket in non-blocking mode:
//! `read`/`write` return `Ok(0)` (rather than blocking) when no bytes are
//! currently available.

use std::io;

pub trait NonBlockingRead {
    /// Read up to `buf.len()` bytes without blocking. Returns `Ok(0)` if no
    /// data is currently available (NOT end-of-stream -- callers distinguish
    /// "nothing yet" from "peer closed" via the surrounding socket's own
    /// readiness/EOF signal; this layer never tries to tell the two apart).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub trait NonBlockingWrite {
    /// Write as many of `buf`'s bytes as the socket will currently accept
    /// without blocking, returning how many were written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl NonBlockingRead for std::io::Cursor<Vec<u8>> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        std::io::Read::read(self, buf)
    }
}

impl NonBlockingWrite for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl NonBlockingRead for mio::net::TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match std::io::Read::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl NonBlockingWrite for mio::net::TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match std::io::Write::write(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
