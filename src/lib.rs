//! A client-side IRC session engine: connection lifecycle, RFC 1459 line
//! framing and dispatch, CTCP, and a DCC (Direct Client-to-Client)
//! multiplexer for peer-to-peer chat and file transfer side channels.
//!
//! The engine is a single-threaded, nonblocking reactor: [`Session::run`]
//! drives a `select(2)` loop internally, or an embedder can call
//! [`Session::add_descriptors`]/[`Session::process_descriptors`] directly
//! from its own event loop.
//!
//! Basic usage:
//! ```no_run
//! use irc_session::Session;
//!
//! let mut session = Session::new("nick", "user", "Real Name", ());
//! session.callbacks_mut().connect = Some(Box::new(|s| {
//!     let _ = s.cmd_join("#channel", None);
//! }));
//! session.connect("irc.example.org", 6667, None).unwrap();
//! session.run().unwrap();
//! ```

mod byte;
mod callbacks;
mod ctcp;
mod dcc;
mod error;
pub mod fdset;
mod format;
mod framing;
mod message;
mod negotiation;
mod net;
mod options;
mod session;
mod stream;

pub use callbacks::{
    builtin_ctcp_reply, Callbacks, ConnectFn, DccChatReqFn, DccFn, DccSendReqFn, EventFn, NumericFn,
};
pub use dcc::{DccId, DccMode, DccState};
pub use error::{Error, Result};
pub use fdset::{select, FdSet};
pub use message::{Command, Message};
pub use negotiation::DccOffer;
pub use net::{dcc_host_order_to_ip, ip_to_dcc_host_order};
pub use options::{DEBUG, STRIPNICKS};
pub use session::{ConnState, Session};
pub use stream::Stream;

/// The crate version, taken from `Cargo.toml` at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
