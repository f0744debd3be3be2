//! The blocking byte-stream abstraction the frame codec reads and writes
//! through.
//!
//! The HTTP/1.1 server that owns the raw socket, and the primitives it
//! exposes for reading/writing it (`SockInRead`, `Snd`,
//! `SockSendFlush`, ...), are external collaborators out of this crate's
//! scope. `WebSocketIo` is the minimal seam this engine needs from that
//! host: a blocking read with a caller-supplied timeout, a buffered write
//! path that coalesces small sends, and an unbuffered path for frames big
//! enough that buffering would just be a copy nobody asked for.

use crate::error::Error;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A socket capable of carrying WebSocket frames once upgraded.
///
/// `read` must not block past `timeout`; on timeout with zero bytes
/// delivered it returns `Ok(0)`, matching the "NoData" status of spec
/// §4.1 rather than an error (the caller decides whether that's fatal).
pub trait WebSocketIo: Send {
    /// Attempt to read up to `buf.len()` bytes, blocking at most
    /// `timeout`. Returns the number of bytes actually read (may be 0 on
    /// timeout, and may be less than `buf.len()` even without a timeout).
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error>;

    /// Buffered write; the implementation may coalesce several calls
    /// before an actual syscall, up to 64 KiB (spec §4.1).
    fn write_buffered(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Flush anything pending from `write_buffered`.
    fn flush(&mut self) -> Result<(), Error>;

    /// Write without going through the buffered path — used for large
    /// frames where buffering would just add a redundant copy (spec
    /// §4.1 write).
    fn write_unbuffered(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.write_buffered(buf)?;
        self.flush()
    }
}

/// Default `WebSocketIo` over a plain `std::net::TcpStream`.
pub struct TcpIo {
    stream: TcpStream,
    write_buf: Vec<u8>,
}

impl TcpIo {
    pub fn new(stream: TcpStream) -> Self {
        TcpIo {
            stream,
            write_buf: Vec::new(),
        }
    }

    const COALESCE_LIMIT: usize = 64 * 1024;
}

impl WebSocketIo for TcpIo {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        self.stream.set_read_timeout(Some(timeout))?;
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_buffered(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.write_buf.extend_from_slice(buf);
        if self.write_buf.len() >= Self::COALESCE_LIMIT {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if !self.write_buf.is_empty() {
            self.stream.write_all(&self.write_buf)?;
            self.write_buf.clear();
        }
        self.stream.flush()?;
        Ok(())
    }

    fn write_unbuffered(&mut self, buf: &[u8]) -> Result<(), Error> {
        // Flush whatever was already queued so ordering on the wire is
        // preserved, then bypass the coalescing buffer entirely.
        self.flush()?;
        self.stream.write_all(buf)?;
        Ok(())
    }
}

/// In-memory double: reads come from a fixed byte buffer, writes
/// accumulate into a `Vec<u8>` the caller can inspect. Used by this
/// crate's own unit tests, and public so downstream callers (fuzz
/// targets, doctests) can drive the frame codec without a real socket.
pub struct MemoryIo {
    pub inbound: std::collections::VecDeque<u8>,
    pub outbound: Vec<u8>,
}

impl MemoryIo {
    pub fn new(inbound: Vec<u8>) -> Self {
        MemoryIo {
            inbound: inbound.into(),
            outbound: Vec::new(),
        }
    }
}

impl WebSocketIo for MemoryIo {
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write_buffered(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.outbound.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
