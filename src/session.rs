//! The session engine: owns the server socket, drives the connect/register/
//! disconnect lifecycle, frames and dispatches the inbound line stream, and
//! hosts the DCC table every negotiated side channel lives in.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::byte::{BYTE_CR, BYTE_LF, MAX_LINE_LEN};
use crate::callbacks::{self, Callbacks, DccFn};
use crate::ctcp;
use crate::dcc::{DccId, DccMode, DccSession, DccState, DccTable};
use crate::error::{Error, Result};
use crate::fdset::FdSet;
use crate::format::{format_ctcp, format_line};
use crate::message::{split_nick_host, Command, Message};
use crate::negotiation::{self, DccOffer};
use crate::net;
use crate::options::{Options, DEBUG, STRIPNICKS};
use crate::stream::Stream;

const OUT_BUF_CAP: usize = 8 * 1024;
const DEFAULT_DCC_TIMEOUT: Duration = Duration::from_secs(180);

/// Numeric reply marking a registered connection (RFC 1459 `RPL_WELCOME`).
const RPL_WELCOME: u16 = 1;
/// Numerics marking the end of (or absence of) the MOTD. Purely
/// informational: observing one just flips a flag (§4.3).
const RPL_ENDOFMOTD: u16 = 376;
const ERR_NOMOTD: u16 = 422;

/// The session's connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Connecting,
    Connected,
    Disconnected,
}

/// State guarded by the session mutex: outbound buffer
/// mutations and connection-state transitions. Everything else a session
/// touches is either owned outright by the single I/O thread (the inbound
/// buffer) or lives behind the separate DCC-list mutex.
struct Core {
    conn: ConnState,
    out_buf: Vec<u8>,
    last_error: Option<Error>,
}

/// A single persistent connection to an IRC server, plus every DCC side
/// channel negotiated over it.
///
/// `Ctx` is the opaque user context threaded through every callback — the
/// idiomatic-Rust realization of the original C library's `void *ctx`
/// (never freed by the session; see DESIGN.md).
pub struct Session<Ctx> {
    host: String,
    port: u16,
    password: Option<String>,
    nick: String,
    username: String,
    realname: String,
    own_nick: String,

    socket: Option<Box<dyn Stream>>,
    core: Mutex<Core>,

    in_buf: Box<[u8]>,
    in_len: usize,

    registered: bool,
    motd_seen: bool,
    local_addr: Option<Ipv4Addr>,

    options: Options,
    pub(crate) dcc: Mutex<DccTable<Ctx>>,
    dcc_timeout: Duration,

    pub(crate) callbacks: Callbacks<Ctx>,
    pub ctx: Ctx,
}

impl<Ctx> Session<Ctx> {
    pub fn new(nick: impl Into<String>, username: impl Into<String>, realname: impl Into<String>, ctx: Ctx) -> Self {
        let nick = nick.into();
        Session {
            host: String::new(),
            port: 0,
            password: None,
            own_nick: nick.clone(),
            nick,
            username: username.into(),
            realname: realname.into(),
            socket: None,
            core: Mutex::new(Core {
                conn: ConnState::Init,
                out_buf: Vec::new(),
                last_error: None,
            }),
            in_buf: vec![0u8; MAX_LINE_LEN].into_boxed_slice(),
            in_len: 0,
            registered: false,
            motd_seen: false,
            local_addr: None,
            options: Options::new(),
            dcc: Mutex::new(DccTable::new()),
            dcc_timeout: DEFAULT_DCC_TIMEOUT,
            callbacks: Callbacks::new(),
            ctx,
        }
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks<Ctx> {
        &mut self.callbacks
    }

    pub fn set_dcc_timeout(&mut self, timeout: Duration) {
        self.dcc_timeout = timeout;
    }

    pub fn option_set(&mut self, flag: u32) {
        self.options.set(flag);
    }

    pub fn option_clear(&mut self, flag: u32) {
        self.options.clear(flag);
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.lock().unwrap().last_error.as_ref().map(ToString::to_string)
    }

    pub fn is_connected(&self) -> bool {
        self.core.lock().unwrap().conn == ConnState::Connected
    }

    pub fn own_nick(&self) -> &str {
        &self.own_nick
    }

    /// Whether the end (or absence) of the MOTD has been observed yet.
    /// Purely informational bookkeeping, per the registration sub-state.
    pub fn motd_received(&self) -> bool {
        self.motd_seen
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    pub fn connect(&mut self, host: impl Into<String>, port: u16, password: Option<&str>) -> Result<()> {
        {
            let core = self.core.lock().unwrap();
            if core.conn == ConnState::Connecting || core.conn == ConnState::Connected {
                return Err(Error::State);
            }
        }
        self.host = host.into();
        self.port = port;
        self.password = password.map(String::from);
        self.own_nick = self.nick.clone();
        self.registered = false;
        self.motd_seen = false;
        self.local_addr = None;
        self.in_len = 0;

        let stream = net::connect_nonblocking(&self.host, self.port)?;
        self.socket = Some(Box::new(stream));

        let mut core = self.core.lock().unwrap();
        core.conn = ConnState::Connecting;
        core.out_buf.clear();
        core.last_error = None;
        Ok(())
    }

    /// Idempotent: calling this on an already-disconnected session is a
    /// no-op.
    pub fn disconnect(&mut self) {
        let mut core = self.core.lock().unwrap();
        if core.conn == ConnState::Disconnected {
            return;
        }
        core.conn = ConnState::Disconnected;
        self.socket = None;
        log::debug!("session disconnected");
    }

    fn fail(&mut self, err: Error) {
        log::warn!("session transport fault: {}", err);
        let mut core = self.core.lock().unwrap();
        core.conn = ConnState::Disconnected;
        core.last_error = Some(err);
        drop(core);
        self.socket = None;
    }

    // ---------------------------------------------------------------
    // Outbound path
    // ---------------------------------------------------------------

    /// Formats `command params...` as a CR-LF line and enqueues it, the one
    /// primitive every command helper below is sugar over.
    pub fn send_raw(&self, command: &str, params: &[&str]) -> Result<()> {
        self.enqueue(format_line(command, params))
    }

    fn enqueue(&self, line: Vec<u8>) -> Result<()> {
        let mut core = self.core.lock().unwrap();
        if core.conn != ConnState::Connected && core.conn != ConnState::Connecting {
            return Err(Error::State);
        }
        if core.out_buf.len() + line.len() > OUT_BUF_CAP {
            return Err(Error::NoMem);
        }
        core.out_buf.extend_from_slice(&line);
        Ok(())
    }

    pub fn cmd_join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        match key {
            Some(k) => self.send_raw("JOIN", &[channel, k]),
            None => self.send_raw("JOIN", &[channel]),
        }
    }

    pub fn cmd_part(&self, channel: &str) -> Result<()> {
        self.send_raw("PART", &[channel])
    }

    pub fn cmd_msg(&self, target: &str, text: &str) -> Result<()> {
        self.send_raw("PRIVMSG", &[target, text])
    }

    pub fn cmd_notice(&self, target: &str, text: &str) -> Result<()> {
        self.send_raw("NOTICE", &[target, text])
    }

    pub fn cmd_me(&self, target: &str, action: &str) -> Result<()> {
        let payload = format!("ACTION {}", action);
        self.enqueue(format_ctcp("PRIVMSG", target, &payload))
    }

    pub fn cmd_kick(&self, channel: &str, nick: &str, reason: Option<&str>) -> Result<()> {
        match reason {
            Some(r) => self.send_raw("KICK", &[channel, nick, r]),
            None => self.send_raw("KICK", &[channel, nick]),
        }
    }

    pub fn cmd_quit(&self, message: Option<&str>) -> Result<()> {
        match message {
            Some(m) => self.send_raw("QUIT", &[m]),
            None => self.send_raw("QUIT", &[]),
        }
    }

    pub fn cmd_ctcp_request(&self, target: &str, ctcp_command: &str) -> Result<()> {
        self.enqueue(format_ctcp("PRIVMSG", target, ctcp_command))
    }

    pub fn cmd_ctcp_reply(&self, target: &str, ctcp_reply: &str) -> Result<()> {
        self.enqueue(format_ctcp("NOTICE", target, ctcp_reply))
    }

    // ---------------------------------------------------------------
    // Readiness integration
    // ---------------------------------------------------------------

    pub fn add_descriptors(&self, read_set: &mut FdSet, write_set: &mut FdSet, maxfd: &mut RawFd) {
        if let Some(sock) = &self.socket {
            let fd = sock.as_raw_fd();
            let core = self.core.lock().unwrap();
            match core.conn {
                ConnState::Connecting => {
                    read_set.set(fd);
                    write_set.set(fd);
                }
                ConnState::Connected => {
                    read_set.set(fd);
                    if !core.out_buf.is_empty() {
                        write_set.set(fd);
                    }
                }
                _ => {}
            }
            *maxfd = (*maxfd).max(fd);
        }

        let table = self.dcc.lock().unwrap();
        for dcc in table.iter() {
            let fd = dcc.raw_fd();
            if dcc.wants_read() {
                read_set.set(fd);
            }
            if dcc.wants_write() {
                write_set.set(fd);
            }
            if dcc.wants_read() || dcc.wants_write() {
                *maxfd = (*maxfd).max(fd);
            }
        }
    }

    /// One nonblocking pass over every ready descriptor: the main socket,
    /// then every DCC session, then the idle-timeout sweep and tombstone
    /// reap. Exactly one read or write per ready
    /// socket per call.
    pub fn process_descriptors(&mut self, read_set: &FdSet, write_set: &FdSet) {
        self.process_main_socket(read_set, write_set);
        self.process_dcc_sessions(read_set, write_set);
        self.sweep_dcc_timeouts();
        self.dcc.lock().unwrap().reap();
    }

    fn process_main_socket(&mut self, read_set: &FdSet, write_set: &FdSet) {
        let fd = match &self.socket {
            Some(s) => s.as_raw_fd(),
            None => return,
        };

        let conn = self.core.lock().unwrap().conn;

        if conn == ConnState::Connecting && write_set.is_set(fd) {
            match net::probe_connect_error(fd) {
                Ok(()) => self.on_connected(),
                Err(e) => self.fail(Error::Connect(e)),
            }
            return;
        }

        if read_set.is_set(fd) {
            self.on_readable();
        }

        if write_set.is_set(fd) {
            self.on_writable();
        }
    }

    fn on_connected(&mut self) {
        if let Some(sock) = &self.socket {
            if let Ok(SocketAddr::V4(addr)) = net::local_addr_of(sock.as_raw_fd()) {
                self.local_addr = Some(*addr.ip());
            }
        }
        {
            let mut core = self.core.lock().unwrap();
            core.conn = ConnState::Connected;
        }
        log::debug!("connected to {}:{}, registering as {}", self.host, self.port, self.nick);

        if let Some(pw) = self.password.clone() {
            let _ = self.send_raw("PASS", &[&pw]);
        }
        let _ = self.send_raw("NICK", &[&self.nick]);
        let username = self.username.clone();
        let realname = self.realname.clone();
        let _ = self.send_raw("USER", &[&username, "unknown", "unknown", &realname]);
    }

    fn on_readable(&mut self) {
        if self.in_len >= self.in_buf.len() {
            self.fail(Error::Read(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line exceeds buffer capacity",
            )));
            return;
        }
        let n = {
            let sock = self.socket.as_mut().unwrap();
            sock.read(&mut self.in_buf[self.in_len..])
        };
        match n {
            Ok(0) => self.fail(Error::Closed),
            Ok(n) => {
                self.in_len += n;
                self.drain_lines();
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => self.fail(Error::Read(e)),
        }
    }

    fn drain_lines(&mut self) {
        loop {
            let consumed = crate::framing::find_cr_or_lf(&self.in_buf, self.in_len);
            if consumed == 0 {
                break;
            }
            let term_idx = self.in_buf[..consumed]
                .iter()
                .position(|&b| b == BYTE_CR || b == BYTE_LF)
                .unwrap();
            let line = self.in_buf[..term_idx].to_vec();
            self.in_buf.copy_within(consumed..self.in_len, 0);
            self.in_len -= consumed;

            if self.options.contains(DEBUG) {
                log::trace!("<< {}", String::from_utf8_lossy(&line));
            }
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        if let Some(msg) = Message::parse(&text) {
            self.dispatch(msg);
        }
    }

    fn on_writable(&mut self) {
        let to_write = {
            let core = self.core.lock().unwrap();
            if core.out_buf.is_empty() {
                return;
            }
            core.out_buf.clone()
        };
        let sock = self.socket.as_mut().unwrap();
        match sock.write(&to_write) {
            Ok(0) => {}
            Ok(n) => {
                let mut core = self.core.lock().unwrap();
                core.out_buf.copy_within(n.., 0);
                let new_len = core.out_buf.len() - n;
                core.out_buf.truncate(new_len);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => self.fail(Error::Write(e)),
        }
    }

    /// The blocking form: drives `add_descriptors`/`process_descriptors`
    /// with `select(2)` until the session reaches DISCONNECTED.
    pub fn run(&mut self) -> Result<()> {
        while self.core.lock().unwrap().conn != ConnState::Disconnected {
            let mut read_set = FdSet::new();
            let mut write_set = FdSet::new();
            let mut maxfd: RawFd = -1;
            self.add_descriptors(&mut read_set, &mut write_set, &mut maxfd);

            if maxfd < 0 {
                break;
            }

            crate::fdset::select(maxfd, &mut read_set, &mut write_set, None)
                .map_err(Error::Socket)?;
            self.process_descriptors(&read_set, &write_set);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    fn display_origin(&self, origin: Option<&str>) -> Option<String> {
        origin.map(|o| {
            if self.options.contains(STRIPNICKS) {
                split_nick_host(o).0.to_string()
            } else {
                o.to_string()
            }
        })
    }

    fn dispatch(&mut self, msg: Message) {
        let origin = self.display_origin(msg.origin.as_deref());

        match msg.command {
            Command::Numeric(code) => {
                if code == RPL_WELCOME && !self.registered {
                    self.registered = true;
                    callbacks::fire_connect(self);
                }
                if code == RPL_ENDOFMOTD || code == ERR_NOMOTD {
                    self.motd_seen = true;
                }
                callbacks::fire_numeric(self, origin.as_deref(), code, &msg.params);
            }
            Command::Named(cmd) => self.dispatch_named(&cmd, msg.origin.as_deref(), origin, msg.params),
        }
    }

    fn dispatch_named(&mut self, cmd: &str, raw_origin: Option<&str>, origin: Option<String>, params: Vec<String>) {
        if cmd == "NICK" {
            if let (Some(raw), Some(new_nick)) = (raw_origin, params.first()) {
                if split_nick_host(raw).0 == self.own_nick {
                    self.own_nick = new_nick.clone();
                }
            }
        }

        match cmd {
            "NICK" => callbacks::fire_event(self, |c| &mut c.nick, origin.as_deref(), &params),
            "QUIT" => callbacks::fire_event(self, |c| &mut c.quit, origin.as_deref(), &params),
            "JOIN" => callbacks::fire_event(self, |c| &mut c.join, origin.as_deref(), &params),
            "PART" => callbacks::fire_event(self, |c| &mut c.part, origin.as_deref(), &params),
            "TOPIC" => callbacks::fire_event(self, |c| &mut c.topic, origin.as_deref(), &params),
            "KICK" => callbacks::fire_event(self, |c| &mut c.kick, origin.as_deref(), &params),
            "INVITE" => callbacks::fire_event(self, |c| &mut c.invite, origin.as_deref(), &params),
            "MODE" => {
                if params.first().map(String::as_str) == Some(self.own_nick.as_str()) {
                    callbacks::fire_event(self, |c| &mut c.umode, origin.as_deref(), &params);
                } else {
                    callbacks::fire_event(self, |c| &mut c.mode, origin.as_deref(), &params);
                }
            }
            "PRIVMSG" => self.dispatch_privmsg(origin, params),
            "NOTICE" => self.dispatch_notice(origin, params),
            _ => callbacks::fire_event(self, |c| &mut c.unknown, origin.as_deref(), &params),
        }
    }

    fn dispatch_privmsg(&mut self, origin: Option<String>, params: Vec<String>) {
        let target = params.first().cloned().unwrap_or_default();
        let text = params.get(1).cloned().unwrap_or_default();

        if let Some(payload) = ctcp::decode(&text) {
            if payload.starts_with("DCC ") {
                self.handle_dcc_offer(payload);
                return;
            }
            let (verb, _) = ctcp::split_verb(payload);
            let out = vec![target, payload.to_string()];
            if verb == "ACTION" {
                callbacks::fire_event(self, |c| &mut c.ctcp_action, origin.as_deref(), &out);
            } else {
                callbacks::fire_event(self, |c| &mut c.ctcp_req, origin.as_deref(), &out);
            }
            return;
        }

        let out = vec![target.clone(), text];
        if target == self.own_nick {
            callbacks::fire_event(self, |c| &mut c.privmsg, origin.as_deref(), &out);
        } else {
            callbacks::fire_event(self, |c| &mut c.channel, origin.as_deref(), &out);
        }
    }

    fn dispatch_notice(&mut self, origin: Option<String>, params: Vec<String>) {
        let target = params.first().cloned().unwrap_or_default();
        let text = params.get(1).cloned().unwrap_or_default();

        if let Some(payload) = ctcp::decode(&text) {
            let out = vec![target, payload.to_string()];
            callbacks::fire_event(self, |c| &mut c.ctcp_rep, origin.as_deref(), &out);
            return;
        }

        let out = vec![target.clone(), text];
        if target == self.own_nick {
            callbacks::fire_event(self, |c| &mut c.notice, origin.as_deref(), &out);
        } else {
            callbacks::fire_event(self, |c| &mut c.channel_notice, origin.as_deref(), &out);
        }
    }

    // ---------------------------------------------------------------
    // DCC negotiation
    // ---------------------------------------------------------------

    fn handle_dcc_offer(&mut self, payload: &str) {
        let offer = match negotiation::parse(payload) {
            Some(o) => o,
            None => return,
        };
        match offer {
            DccOffer::Chat { addr, port } => {
                let id = self.dcc.lock().unwrap().next_id();
                self.dcc
                    .lock()
                    .unwrap()
                    .insert(DccSession::new_init(id, DccMode::Chat, addr, port, None, None));
                log::debug!("DCC CHAT offer from {}:{} -> id {:?}", addr, port, id);
                callbacks::fire_dcc_chat_req(self, id, addr, port);
            }
            DccOffer::Send { filename, addr, port, size } => {
                let id = self.dcc.lock().unwrap().next_id();
                self.dcc.lock().unwrap().insert(DccSession::new_init(
                    id,
                    DccMode::RecvFile,
                    addr,
                    port,
                    Some(filename.clone()),
                    Some(size),
                ));
                log::debug!("DCC SEND offer '{}' ({} bytes) from {}:{} -> id {:?}", filename, size, addr, port, id);
                callbacks::fire_dcc_send_req(self, id, addr, port, &filename, size);
            }
        }
    }

    /// Accepts a pending `DCC CHAT` offer, issuing the nonblocking connect
    /// to the advertised peer.
    pub fn dcc_accept_chat(&mut self, id: DccId, callback: DccFn<Ctx>) -> Result<()> {
        self.dcc_accept(id, callback, None)
    }

    /// Accepts a pending `DCC SEND` offer, opening `dest_path` for writing
    /// the incoming file.
    pub fn dcc_accept_send(&mut self, id: DccId, dest_path: &Path, callback: DccFn<Ctx>) -> Result<()> {
        let file = std::fs::File::create(dest_path).map_err(Error::OpenFile)?;
        self.dcc_accept(id, callback, Some(file))
    }

    fn dcc_accept(&mut self, id: DccId, callback: DccFn<Ctx>, file: Option<std::fs::File>) -> Result<()> {
        let (peer_addr, peer_port) = {
            let mut table = self.dcc.lock().unwrap();
            let dcc = table.get_mut(id).ok_or(Error::Invalid)?;
            if dcc.state != DccState::Init {
                return Err(Error::State);
            }
            (dcc.peer_addr.ok_or(Error::Invalid)?, dcc.peer_port)
        };

        let addr = SocketAddr::new(std::net::IpAddr::V4(peer_addr), peer_port);
        match net::connect_nonblocking_addr(addr) {
            Ok(stream) => {
                let mut table = self.dcc.lock().unwrap();
                if let Some(dcc) = table.get_mut(id) {
                    if let Some(f) = file {
                        dcc.attach_file(f);
                    }
                    dcc.attach_connecting(Box::new(stream));
                    dcc.set_callback(callback);
                }
                Ok(())
            }
            Err(_) => {
                // A synchronous connect failure destroys the session
                // locally; no callback ever fires for it since one hasn't
                // been attached yet.
                self.dcc.lock().unwrap().destroy(id);
                Ok(())
            }
        }
    }

    pub fn dcc_decline(&mut self, id: DccId) -> Result<()> {
        let mut table = self.dcc.lock().unwrap();
        if table.get(id).is_none() {
            return Err(Error::Invalid);
        }
        table.destroy(id);
        Ok(())
    }

    /// Offers a DCC CHAT session to `peer_nick`: binds a listener on an
    /// ephemeral port and sends the CTCP offer.
    pub fn dcc_chat(&mut self, peer_nick: &str, callback: DccFn<Ctx>) -> Result<DccId> {
        let local_ip = self.local_addr.ok_or(Error::State)?;
        let listener = net::listen_on_ephemeral_port(local_ip)?;
        let port = listener.local_addr().map_err(Error::Socket)?.port();

        let id = self.dcc.lock().unwrap().next_id();
        let session = DccSession::new_listening(id, DccMode::Chat, listener, Some(callback));
        self.dcc.lock().unwrap().insert(session);

        let offer = negotiation::format_chat_offer(local_ip, port);
        self.enqueue(format_ctcp("PRIVMSG", peer_nick, &offer))?;
        Ok(id)
    }

    /// Offers `path` to `peer_nick` over DCC SEND. Rejects files that are
    /// missing, empty, or not a regular file.
    pub fn dcc_sendfile(&mut self, peer_nick: &str, path: &Path, callback: DccFn<Ctx>) -> Result<DccId> {
        let meta = std::fs::metadata(path).map_err(|_| Error::NoDccSend)?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(Error::NoDccSend);
        }
        let file = std::fs::File::open(path).map_err(Error::OpenFile)?;

        let local_ip = self.local_addr.ok_or(Error::State)?;
        let listener = net::listen_on_ephemeral_port(local_ip)?;
        let port = listener.local_addr().map_err(Error::Socket)?.port();

        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or(Error::Invalid)?
            .to_string();

        let id = self.dcc.lock().unwrap().next_id();
        let mut session = DccSession::new_listening(id, DccMode::SendFile, listener, Some(callback));
        session.expected_size = Some(meta.len());
        session.filename = Some(filename.clone());
        session.attach_file(file);
        self.dcc.lock().unwrap().insert(session);

        let offer = negotiation::format_send_offer(local_ip, port, &filename, meta.len());
        self.enqueue(format_ctcp("PRIVMSG", peer_nick, &offer))?;
        Ok(id)
    }

    pub fn dcc_msg(&mut self, id: DccId, text: &str) -> Result<()> {
        let mut table = self.dcc.lock().unwrap();
        let dcc = table.get_mut(id).ok_or(Error::Invalid)?;
        if dcc.state != DccState::Connected {
            return Err(Error::State);
        }
        let mut line = text.as_bytes().to_vec();
        line.push(BYTE_CR);
        line.push(BYTE_LF);
        dcc.enqueue(&line)
    }

    pub fn dcc_destroy(&mut self, id: DccId) -> Result<()> {
        let mut table = self.dcc.lock().unwrap();
        if table.get(id).is_none() {
            return Err(Error::Invalid);
        }
        table.destroy(id);
        Ok(())
    }

    // ---------------------------------------------------------------
    // DCC data phase
    // ---------------------------------------------------------------

    fn process_dcc_sessions(&mut self, read_set: &FdSet, write_set: &FdSet) {
        let ids: Vec<DccId> = self.dcc.lock().unwrap().iter().map(|d| d.id).collect();
        for id in ids {
            let (fd, can_read, can_write) = {
                let table = self.dcc.lock().unwrap();
                match table.get(id) {
                    Some(dcc) => (dcc.raw_fd(), dcc.wants_read(), dcc.wants_write()),
                    None => continue,
                }
            };

            if can_read && read_set.is_set(fd) {
                let event = {
                    let mut table = self.dcc.lock().unwrap();
                    table.get_mut(id).map(|d| d.do_read())
                };
                if let Some(ev) = event {
                    self.handle_dcc_event(id, ev);
                }
            }

            if can_write && write_set.is_set(fd) {
                let event = {
                    let mut table = self.dcc.lock().unwrap();
                    table.get_mut(id).map(|d| d.do_write())
                };
                if let Some(ev) = event {
                    self.handle_dcc_event(id, ev);
                }
            }

            let pump_event = {
                let mut table = self.dcc.lock().unwrap();
                table.get_mut(id).map(|d| d.pump_send_file())
            };
            if let Some(ev) = pump_event {
                self.handle_dcc_event(id, ev);
            }
        }
    }

    fn handle_dcc_event(&mut self, id: DccId, event: crate::dcc::DccIoEvent) {
        use crate::dcc::DccIoEvent;
        match event {
            DccIoEvent::None | DccIoEvent::Accepted | DccIoEvent::SendAckOk => {}
            DccIoEvent::ChatLines(lines) => {
                for line in lines {
                    callbacks::fire_dcc(self, id, None, &line);
                }
            }
            DccIoEvent::RecvChunk(data) => {
                callbacks::fire_dcc(self, id, None, &data);
            }
            DccIoEvent::TransferComplete => {
                callbacks::fire_dcc(self, id, None, &[]);
                self.dcc.lock().unwrap().destroy(id);
            }
            DccIoEvent::Eof => {
                callbacks::fire_dcc(self, id, Some(&Error::Closed), &[]);
                self.dcc.lock().unwrap().destroy(id);
            }
            DccIoEvent::Error(e) => {
                log::warn!("DCC session {:?} failed: {}", id, e);
                callbacks::fire_dcc(self, id, Some(&e), &[]);
                self.dcc.lock().unwrap().destroy(id);
            }
        }
    }

    fn sweep_dcc_timeouts(&mut self) {
        let timed_out: Vec<(DccId, bool)> = {
            let table = self.dcc.lock().unwrap();
            table
                .iter()
                .filter(|d| {
                    matches!(d.state, DccState::Listening | DccState::Init | DccState::Connected)
                        && d.last_activity.elapsed() > self.dcc_timeout
                })
                .map(|d| (d.id, d.state != DccState::Init))
                .collect()
        };
        for (id, should_fire) in timed_out {
            // INIT sessions have no callback installed yet,
            // so firing one would be a silent no-op anyway; skip for clarity.
            if should_fire {
                callbacks::fire_dcc(self, id, Some(&Error::Timeout), &[]);
            }
            self.dcc.lock().unwrap().destroy(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session<()> {
        Session::new("alice", "alice", "Alice", ())
    }

    #[test]
    fn new_session_starts_disconnected() {
        let s = session();
        assert!(!s.is_connected());
        assert_eq!(s.own_nick(), "alice");
    }

    #[test]
    fn send_raw_before_connect_is_state_error() {
        let s = session();
        assert!(matches!(s.send_raw("JOIN", &["#c"]), Err(Error::State)));
    }

    #[test]
    fn stripnicks_reduces_origin_to_nick() {
        let mut s = session();
        s.option_set(STRIPNICKS);
        assert_eq!(s.display_origin(Some("bob!~b@h")).as_deref(), Some("bob"));
        s.option_clear(STRIPNICKS);
        assert_eq!(s.display_origin(Some("bob!~b@h")).as_deref(), Some("bob!~b@h"));
    }

    #[test]
    fn welcome_numeric_fires_connect_once() {
        let mut s = session();
        s.callbacks.connect = Some(Box::new(|_s| {}));
        {
            let mut core = s.core.lock().unwrap();
            core.conn = ConnState::Connected;
        }
        assert!(!s.registered);
        s.dispatch(Message::parse(":irc.example 001 alice :Welcome").unwrap());
        assert!(s.registered);
    }

    fn connected_session() -> Session<()> {
        let s = session();
        s.core.lock().unwrap().conn = ConnState::Connected;
        s
    }

    #[test]
    fn channel_message_honors_stripnicks() {
        let mut s = connected_session();
        let seen: std::sync::Arc<std::sync::Mutex<Vec<(Option<String>, Vec<String>)>>> =
            Default::default();
        let seen2 = seen.clone();
        s.callbacks.channel = Some(Box::new(move |_s, origin, params| {
            seen2.lock().unwrap().push((origin.map(String::from), params.to_vec()));
        }));

        let msg = Message::parse(":bob!~b@h PRIVMSG #c :hi all").unwrap();
        s.dispatch(msg);
        let got = seen.lock().unwrap();
        assert_eq!(got[0].0.as_deref(), Some("bob!~b@h"));
        assert_eq!(&got[0].1[..], &["#c", "hi all"]);
        drop(got);

        s.option_set(STRIPNICKS);
        let msg = Message::parse(":bob!~b@h PRIVMSG #c :hi all").unwrap();
        s.dispatch(msg);
        assert_eq!(seen.lock().unwrap()[1].0.as_deref(), Some("bob"));
    }

    #[test]
    fn ctcp_action_is_dispatched() {
        let mut s = connected_session();
        let seen: std::sync::Arc<std::sync::Mutex<Vec<Vec<String>>>> = Default::default();
        let seen2 = seen.clone();
        s.callbacks.ctcp_action = Some(Box::new(move |_s, _origin, params| {
            seen2.lock().unwrap().push(params.to_vec());
        }));

        let msg = Message::parse(":bob!b@h PRIVMSG #c :\u{1}ACTION waves\u{1}").unwrap();
        s.dispatch(msg);
        assert_eq!(&seen.lock().unwrap()[0][..], &["#c", "ACTION waves"]);
    }

    #[test]
    fn dcc_chat_offer_creates_init_session() {
        let mut s = connected_session();
        let seen: std::sync::Arc<std::sync::Mutex<Vec<(Ipv4Addr, u16)>>> = Default::default();
        let seen2 = seen.clone();
        s.callbacks.dcc_chat_req = Some(Box::new(move |_s, _id, addr, port| {
            seen2.lock().unwrap().push((addr, port));
        }));

        let msg = Message::parse(
            ":bob!b@h PRIVMSG alice :\u{1}DCC CHAT chat 2130706433 40000\u{1}",
        )
        .unwrap();
        s.dispatch(msg);

        let got = seen.lock().unwrap();
        assert_eq!(got[0], (Ipv4Addr::new(127, 0, 0, 1), 40000));
        assert_eq!(s.dcc.lock().unwrap().len(), 1);
        let table = s.dcc.lock().unwrap();
        assert_eq!(table.iter().next().unwrap().state, DccState::Init);
    }

    #[test]
    fn partial_line_framing_across_two_reads() {
        let mut s = connected_session();
        let seen: std::sync::Arc<std::sync::Mutex<Vec<Vec<String>>>> = Default::default();
        let seen2 = seen.clone();
        s.callbacks.channel = Some(Box::new(move |_s, _origin, params| {
            seen2.lock().unwrap().push(params.to_vec());
        }));

        let first = b":x PRIVMSG #c :he";
        s.in_buf[..first.len()].copy_from_slice(first);
        s.in_len = first.len();
        s.drain_lines();
        assert!(seen.lock().unwrap().is_empty());

        let second = b"llo\r\n";
        s.in_buf[s.in_len..s.in_len + second.len()].copy_from_slice(second);
        s.in_len += second.len();
        s.drain_lines();

        let got = seen.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0][1], "hello");
    }

    #[test]
    fn builtin_ctcp_reply_answers_version() {
        let mut s = connected_session();
        s.callbacks.ctcp_req = Some(crate::callbacks::builtin_ctcp_reply());

        let msg = Message::parse(":bob!b@h PRIVMSG alice :\u{1}VERSION\u{1}").unwrap();
        s.dispatch(msg);

        let out = s.core.lock().unwrap().out_buf.clone();
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("NOTICE bob :\u{1}VERSION irc-session"));
    }
}
