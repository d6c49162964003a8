//! The DCC (Direct Client-to-Client) subsystem: peer-to-peer side channels
//! negotiated over the main session's CTCP path, each carrying its own TCP
//! connection once established.

pub(crate) mod session;
mod table;

pub use session::{DccIoEvent, DccSession};
pub use table::DccTable;

/// Identifies a DCC session for the lifetime of its parent `Session`.
/// Assigned monotonically and never reused, even though the storage slot it
/// once occupied may be recycled after the session is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DccId(pub(crate) u32);

/// What a DCC session is for. `SendFile` is the local role created by
/// offering a file with `dcc_sendfile`; `RecvFile` is the local role created
/// when a `DCC SEND` offer is received from a peer. Both negotiate over the
/// identical wire grammar — only which side is pushing differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccMode {
    Chat,
    SendFile,
    RecvFile,
}

/// The DCC session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccState {
    /// Passive, awaiting the application's `dcc_accept`/`dcc_decline`.
    Init,
    /// Socket bound and listening, awaiting the remote peer's connect.
    Listening,
    /// Active connect initiated, awaiting completion.
    Connecting,
    /// Data phase.
    Connected,
    /// Awaiting the 4-byte ACK exchange for one file-transfer chunk.
    ConfirmSize,
    /// Tombstone: socket already closed, awaiting reaping by the readiness
    /// sweep. Exists so a callback that destroys its own or another DCC
    /// session mid-dispatch never invalidates the table it's being iterated
    /// from.
    Removed,
}
