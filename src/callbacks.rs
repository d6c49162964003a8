//! The user-supplied callback table and the take/call/restore dispatch
//! pattern used to fire a slot without holding a borrow of `Session` across
//! the call.
//!
//! Every callback receives `&mut Session<Ctx>` so it can call back into the
//! public API (including `dcc_accept`/`destroy`) from inside its own
//! invocation. To allow that without a double-borrow, a slot is `take()`n out
//! of the table, invoked with the table temporarily missing that one
//! closure, then put back — mirroring how the DCC table tombstones an entry
//! under callback reentrancy rather than holding a live reference across it.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ctcp;
use crate::dcc::DccId;
use crate::error::Error;
use crate::message::split_nick_host;
use crate::session::Session;

pub type EventFn<Ctx> = Box<dyn FnMut(&mut Session<Ctx>, Option<&str>, &[String]) + Send>;
pub type ConnectFn<Ctx> = Box<dyn FnMut(&mut Session<Ctx>) + Send>;
pub type NumericFn<Ctx> = Box<dyn FnMut(&mut Session<Ctx>, Option<&str>, u16, &[String]) + Send>;
pub type DccChatReqFn<Ctx> = Box<dyn FnMut(&mut Session<Ctx>, DccId, Ipv4Addr, u16) + Send>;
pub type DccSendReqFn<Ctx> =
    Box<dyn FnMut(&mut Session<Ctx>, DccId, Ipv4Addr, u16, &str, u64) + Send>;

/// Fired on a DCC session's own data/control events; installed per-session
/// at `dcc_chat`/`dcc_accept`/`dcc_sendfile` time, not in this table.
pub type DccFn<Ctx> = Box<dyn FnMut(&mut Session<Ctx>, DccId, Option<&Error>, &[u8]) + Send>;

/// All recognized callback slots. Every slot is optional: a dispatch with no
/// registered handler is silently dropped.
#[derive(Default)]
pub struct Callbacks<Ctx> {
    pub connect: Option<ConnectFn<Ctx>>,
    pub nick: Option<EventFn<Ctx>>,
    pub quit: Option<EventFn<Ctx>>,
    pub join: Option<EventFn<Ctx>>,
    pub part: Option<EventFn<Ctx>>,
    pub mode: Option<EventFn<Ctx>>,
    pub umode: Option<EventFn<Ctx>>,
    pub topic: Option<EventFn<Ctx>>,
    pub kick: Option<EventFn<Ctx>>,
    pub channel: Option<EventFn<Ctx>>,
    pub privmsg: Option<EventFn<Ctx>>,
    pub notice: Option<EventFn<Ctx>>,
    pub channel_notice: Option<EventFn<Ctx>>,
    pub invite: Option<EventFn<Ctx>>,
    pub ctcp_req: Option<EventFn<Ctx>>,
    pub ctcp_rep: Option<EventFn<Ctx>>,
    pub ctcp_action: Option<EventFn<Ctx>>,
    pub unknown: Option<EventFn<Ctx>>,
    pub numeric: Option<NumericFn<Ctx>>,
    pub dcc_chat_req: Option<DccChatReqFn<Ctx>>,
    pub dcc_send_req: Option<DccSendReqFn<Ctx>>,
}

impl<Ctx> Callbacks<Ctx> {
    pub fn new() -> Self {
        Callbacks {
            connect: None,
            nick: None,
            quit: None,
            join: None,
            part: None,
            mode: None,
            umode: None,
            topic: None,
            kick: None,
            channel: None,
            privmsg: None,
            notice: None,
            channel_notice: None,
            invite: None,
            ctcp_req: None,
            ctcp_rep: None,
            ctcp_action: None,
            unknown: None,
            numeric: None,
            dcc_chat_req: None,
            dcc_send_req: None,
        }
    }
}

/// The opt-in built-in `ctcp_req` handler: assign this to
/// `callbacks_mut().ctcp_req` to have `VERSION`, `PING`, and `TIME`
/// requests answered automatically. Every other verb falls through
/// untouched, so an application can still install its own handler for
/// anything beyond these three by wrapping this one.
pub fn builtin_ctcp_reply<Ctx>() -> EventFn<Ctx> {
    Box::new(|session, origin, params| {
        let nick = match origin.map(|o| split_nick_host(o).0) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return,
        };
        let payload = params.get(1).map(String::as_str).unwrap_or("");
        let (verb, arg) = ctcp::split_verb(payload);
        let reply = match verb {
            "VERSION" => Some(format!("VERSION irc-session {}", crate::VERSION)),
            "PING" => Some(match arg {
                Some(token) => format!("PING {}", token),
                None => "PING".to_string(),
            }),
            "TIME" => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Some(format!("TIME {}", secs))
            }
            _ => None,
        };
        if let Some(reply) = reply {
            let _ = session.cmd_ctcp_reply(&nick, &reply);
        }
    })
}

/// Fires `connect`, restoring the slot afterwards so a handler that calls
/// back into the session (e.g. to join a channel immediately) observes a
/// fully intact callback table.
pub(crate) fn fire_connect<Ctx>(session: &mut Session<Ctx>) {
    if let Some(mut cb) = session.callbacks.connect.take() {
        cb(session);
        session.callbacks.connect = Some(cb);
    }
}

pub(crate) fn fire_event<Ctx>(
    session: &mut Session<Ctx>,
    slot: impl FnOnce(&mut Callbacks<Ctx>) -> &mut Option<EventFn<Ctx>>,
    origin: Option<&str>,
    params: &[String],
) {
    let taken = slot(&mut session.callbacks).take();
    if let Some(mut cb) = taken {
        cb(session, origin, params);
        *slot(&mut session.callbacks) = Some(cb);
    }
}

pub(crate) fn fire_numeric<Ctx>(
    session: &mut Session<Ctx>,
    origin: Option<&str>,
    code: u16,
    params: &[String],
) {
    if let Some(mut cb) = session.callbacks.numeric.take() {
        cb(session, origin, code, params);
        session.callbacks.numeric = Some(cb);
    }
}

pub(crate) fn fire_dcc_chat_req<Ctx>(
    session: &mut Session<Ctx>,
    id: DccId,
    addr: Ipv4Addr,
    port: u16,
) {
    if let Some(mut cb) = session.callbacks.dcc_chat_req.take() {
        cb(session, id, addr, port);
        session.callbacks.dcc_chat_req = Some(cb);
    }
}

pub(crate) fn fire_dcc_send_req<Ctx>(
    session: &mut Session<Ctx>,
    id: DccId,
    addr: Ipv4Addr,
    port: u16,
    filename: &str,
    size: u64,
) {
    if let Some(mut cb) = session.callbacks.dcc_send_req.take() {
        cb(session, id, addr, port, filename, size);
        session.callbacks.dcc_send_req = Some(cb);
    }
}

/// Fires the per-DCC callback installed on the session identified by `id`,
/// taking it out of the DCC table for the duration of the call so the
/// handler may destroy its own session.
pub(crate) fn fire_dcc<Ctx>(
    session: &mut Session<Ctx>,
    id: DccId,
    status: Option<&Error>,
    data: &[u8],
) {
    let taken = {
        let mut table = session.dcc.lock().unwrap();
        table.get_mut(id).and_then(|dcc| dcc.callback.take())
    };
    if let Some(mut cb) = taken {
        cb(session, id, status, data);
        let mut table = session.dcc.lock().unwrap();
        if let Some(dcc) = table.get_mut(id) {
            dcc.callback = Some(cb);
        }
    }
}
