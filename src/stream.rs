//! Transport abstraction shared by the main session socket and every DCC
//! socket (generalized from the teacher's `stream::Stream`).
//!
//! Keeping I/O behind this trait is the hook point the spec's non-goal on
//! SSL calls for: a TLS-wrapping `Stream` can be substituted without the
//! session or DCC engine needing to know.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

pub trait Stream: Read + Write + AsRawFd {
    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()>;
}

impl Stream for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }
}

/// Returns the raw descriptor a `Stream` wraps, for registration in a
/// readiness set.
pub fn raw_fd(stream: &dyn Stream) -> RawFd {
    stream.as_raw_fd()
}
