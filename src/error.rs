use std::io;

/// Error categories a public operation on a [`Session`](crate::session::Session)
/// or a DCC session can fail with.
///
/// Every public operation returns `Result<T, Error>`; the session additionally
/// stashes the most recent error in its last-error slot, retrieved with
/// `Session::last_error`.
#[derive(Debug)]
pub enum Error {
    /// The outbound buffer has no room left for the formatted line.
    NoMem,
    /// Socket creation, bind, or option-setting failed.
    Socket(io::Error),
    /// `connect()` failed or a pending connect resolved to failure.
    Connect(io::Error),
    /// The remote end closed the connection.
    Closed,
    /// A read on a socket or file failed.
    Read(io::Error),
    /// A write to a socket failed, or a file-transfer ACK didn't match.
    Write(io::Error),
    /// `accept()` on a DCC listening socket failed.
    Accept(io::Error),
    /// The operation isn't valid in the session's or DCC session's current state.
    State,
    /// A DCC session was idle past the configured timeout.
    Timeout,
    /// `dcc_sendfile` was asked to send something that isn't a regular,
    /// non-empty file.
    NoDccSend,
    /// Opening the local file for a DCC transfer failed.
    OpenFile(io::Error),
    /// Caller passed invalid arguments (empty nick, zero-length buffer, etc).
    Invalid,
    /// The session has been destroyed and can no longer be used.
    Terminated,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            NoMem => f.write_str("outbound buffer full"),
            Socket(e) => write!(f, "socket error: {}", e),
            Connect(e) => write!(f, "connect failed: {}", e),
            Closed => f.write_str("connection closed by peer"),
            Read(e) => write!(f, "read error: {}", e),
            Write(e) => write!(f, "write error: {}", e),
            Accept(e) => write!(f, "accept error: {}", e),
            State => f.write_str("operation not valid in current state"),
            Timeout => f.write_str("DCC session timed out"),
            NoDccSend => f.write_str("file is missing, empty, or not a regular file"),
            OpenFile(e) => write!(f, "could not open file: {}", e),
            Invalid => f.write_str("invalid argument"),
            Terminated => f.write_str("session has been terminated"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;
        match self {
            Socket(e) | Connect(e) | Read(e) | Write(e) | Accept(e) | OpenFile(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
