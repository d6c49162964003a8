//! Wire-level byte constants for the IRC line protocol and CTCP framing.

pub const BYTE_CR: u8 = 0x0D;
pub const BYTE_LF: u8 = 0x0A;
pub const BYTE_SPACE: u8 = b' ';
pub const BYTE_COLON: u8 = b':';

/// Delimits a CTCP request/reply inside a PRIVMSG/NOTICE payload.
pub const BYTE_CTCP_DELIM: u8 = 0x01;

/// RFC 1459 hard cap on a single line, including the CR LF terminator.
pub const MAX_LINE_LEN: usize = 512;

/// Maximum number of parameters a parsed message can carry (RFC 1459 §2.3.1).
pub const MAX_PARAMS: usize = 15;
