//! End-to-end scenario 1 (spec §8 "Welcome"): connecting over a real loopback
//! socket drives PASS/NICK/USER registration, and the `connect` callback
//! fires only once the server's welcome numeric arrives.

mod common;

use common::pump;
use irc_session::Session;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn registers_and_fires_connect_on_welcome() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();

        let nick_line = lines.next().unwrap().unwrap();
        let user_line = lines.next().unwrap().unwrap();
        assert_eq!(nick_line, "NICK alice");
        assert_eq!(user_line, "USER alice unknown unknown :Alice Example");

        writer.write_all(b":irc.example 001 alice :Welcome to the network\r\n").unwrap();
        writer.write_all(b":irc.example 376 alice :End of MOTD\r\n").unwrap();
    });

    let connected: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let connected2 = connected.clone();

    let mut session: Session<()> = Session::new("alice", "alice", "Alice Example", ());
    session.callbacks_mut().connect = Some(Box::new(move |_s| {
        *connected2.lock().unwrap() = true;
    }));

    session
        .connect(addr.ip().to_string(), addr.port(), None)
        .unwrap();
    assert!(!session.is_connected());

    pump(&mut session, 200, Duration::from_millis(20));

    assert!(session.is_connected());
    assert!(*connected.lock().unwrap(), "connect callback should fire on 001");
    assert!(session.motd_received(), "376 should flip the MOTD-seen flag");
    assert_eq!(session.own_nick(), "alice");

    session.disconnect();
    assert!(!session.is_connected());
    server.join().unwrap();
}

#[test]
fn send_raw_before_connect_fails_without_touching_the_wire() {
    let mut session: Session<()> = Session::new("alice", "alice", "Alice", ());
    assert!(session.cmd_join("#chan", None).is_err());
    assert!(session.last_error().is_none(), "a local STATE error isn't stashed as last-error");
}

#[test]
fn password_is_sent_before_nick_when_configured() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut lines = BufReader::new(stream).lines();
        let pass_line = lines.next().unwrap().unwrap();
        let nick_line = lines.next().unwrap().unwrap();
        assert_eq!(pass_line, "PASS secret");
        assert_eq!(nick_line, "NICK alice");
    });

    let mut session: Session<()> = Session::new("alice", "alice", "Alice", ());
    session
        .connect(addr.ip().to_string(), addr.port(), Some("secret"))
        .unwrap();
    pump(&mut session, 100, Duration::from_millis(20));

    session.disconnect();
    server.join().unwrap();
}
