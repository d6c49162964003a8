//! End-to-end scenario 5 (spec §8 "DCC SEND round trip"), sender side:
//! offering a local file over DCC SEND, handing it to a raw peer, and
//! observing the cumulative-ACK flow control complete the transfer.

mod common;

use common::pump;
use irc_session::Session;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn extract_send_offer(line: &str) -> (String, u32, u16, u64) {
    let start = line.find('\u{1}').expect("line should carry a CTCP payload");
    let payload = line[start + 1..].trim_end_matches('\u{1}');
    let mut tokens = payload.split_whitespace();
    assert_eq!(tokens.next(), Some("DCC"));
    assert_eq!(tokens.next(), Some("SEND"));
    let filename = tokens.next().unwrap().to_string();
    let ip: u32 = tokens.next().unwrap().parse().unwrap();
    let port: u16 = tokens.next().unwrap().parse().unwrap();
    let size: u64 = tokens.next().unwrap().parse().unwrap();
    (filename, ip, port, size)
}

#[test]
fn dcc_sendfile_completes_after_matching_cumulative_ack() {
    let _ = env_logger::try_init();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let server_addr = server.local_addr().unwrap();
    let (line_tx, line_rx) = mpsc::channel();

    let server_thread = thread::spawn(move || {
        let (stream, _) = server.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut seen = String::new();
        while !seen.starts_with("USER") {
            seen = lines.next().unwrap().unwrap();
        }
        writer.write_all(b":irc.example 001 alice :Welcome\r\n").unwrap();
        for line in lines {
            match line {
                Ok(l) if line_tx.send(l).is_ok() => {}
                _ => break,
            }
        }
    });

    let dir = std::env::temp_dir().join(format!("irc-session-send-test-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("greeting.txt");
    let contents = b"hello!!".to_vec();
    fs::write(&path, &contents).unwrap();

    let mut session: Session<()> = Session::new("alice", "alice", "Alice", ());
    session
        .connect(server_addr.ip().to_string(), server_addr.port(), None)
        .unwrap();
    pump(&mut session, 200, Duration::from_millis(20));
    assert!(session.is_connected());

    let completions: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let completions2 = completions.clone();
    session
        .dcc_sendfile(
            "bob",
            &path,
            Box::new(move |_s, _id, status, data| {
                assert!(data.is_empty(), "SENDFILE only fires on completion");
                completions2.lock().unwrap().push(status.map(ToString::to_string));
            }),
        )
        .unwrap();

    let offer_line = line_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let (filename, ip, port, size) = extract_send_offer(&offer_line);
    assert_eq!(filename, "greeting.txt");
    assert_eq!(ip, 2_130_706_433);
    assert_eq!(size, contents.len() as u64);

    let peer_thread = thread::spawn(move || -> Vec<u8> {
        let mut peer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while (received.len() as u64) < size {
            let n = peer.read(&mut buf).unwrap();
            assert!(n > 0, "peer should observe the file bytes before EOF");
            received.extend_from_slice(&buf[..n]);
        }
        peer.write_all(&(received.len() as u32).to_be_bytes()).unwrap();
        received
    });

    pump(&mut session, 200, Duration::from_millis(20));

    let received = peer_thread.join().unwrap();
    assert_eq!(received, contents);
    assert_eq!(completions.lock().unwrap().as_slice(), &[None]);

    session.disconnect();
    server_thread.join().unwrap();
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn dcc_sendfile_rejects_missing_file() {
    let mut session: Session<()> = Session::new("alice", "alice", "Alice", ());
    let missing = std::env::temp_dir().join("irc-session-definitely-does-not-exist.bin");
    let err = session
        .dcc_sendfile("bob", &missing, Box::new(|_, _, _, _| {}))
        .unwrap_err();
    assert!(matches!(err, irc_session::Error::NoDccSend));
}

#[test]
fn dcc_sendfile_rejects_empty_file() {
    let dir = std::env::temp_dir().join(format!("irc-session-empty-test-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("empty.bin");
    fs::write(&path, b"").unwrap();

    let mut session: Session<()> = Session::new("alice", "alice", "Alice", ());
    let err = session
        .dcc_sendfile("bob", &path, Box::new(|_, _, _, _| {}))
        .unwrap_err();
    assert!(matches!(err, irc_session::Error::NoDccSend));

    let _ = fs::remove_dir_all(&dir);
}
