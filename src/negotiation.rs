//! Parses the DCC negotiation grammar carried inside a CTCP `DCC ...`
//! payload: `DCC CHAT chat <ip> <port>` and `DCC SEND <filename> <ip> <port>
//! <size>`. `<ip>` is the historical host-byte-order decimal IPv4 encoding
//! (see [`crate::net::dcc_host_order_to_ip`]), preserved here rather than
//! parsed as a dotted-quad.

use std::net::Ipv4Addr;

use crate::net::dcc_host_order_to_ip;

/// A successfully parsed `DCC ...` CTCP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DccOffer {
    Chat { addr: Ipv4Addr, port: u16 },
    Send { filename: String, addr: Ipv4Addr, port: u16, size: u64 },
}

/// Parses a CTCP payload already known to start with `DCC `. Returns `None`
/// for anything that doesn't match the two recognized sub-grammars — such a
/// message is simply not surfaced (only well-formed
/// `DCC CHAT`/`DCC SEND` offers create a session).
pub fn parse(payload: &str) -> Option<DccOffer> {
    let mut tokens = payload.split(' ').filter(|t| !t.is_empty());
    if tokens.next()? != "DCC" {
        return None;
    }
    match tokens.next()? {
        "CHAT" => {
            let _subtype = tokens.next()?; // conventionally "chat"
            let ip: u32 = tokens.next()?.parse().ok()?;
            let port: u16 = tokens.next()?.parse().ok()?;
            Some(DccOffer::Chat {
                addr: dcc_host_order_to_ip(ip),
                port,
            })
        }
        "SEND" => {
            let filename = tokens.next()?.to_string();
            let ip: u32 = tokens.next()?.parse().ok()?;
            let port: u16 = tokens.next()?.parse().ok()?;
            let size: u64 = tokens.next()?.parse().ok()?;
            Some(DccOffer::Send {
                filename,
                addr: dcc_host_order_to_ip(ip),
                port,
                size,
            })
        }
        _ => None,
    }
}

/// Formats a `DCC CHAT` offer line, ready to be CTCP-framed by the caller.
pub fn format_chat_offer(local_ip: Ipv4Addr, port: u16) -> String {
    format!(
        "DCC CHAT chat {} {}",
        crate::net::ip_to_dcc_host_order(local_ip),
        port
    )
}

/// Formats a `DCC SEND` offer line, ready to be CTCP-framed by the caller.
pub fn format_send_offer(local_ip: Ipv4Addr, port: u16, filename: &str, size: u64) -> String {
    format!(
        "DCC SEND {} {} {} {}",
        filename,
        crate::net::ip_to_dcc_host_order(local_ip),
        port,
        size
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_offer() {
        let offer = parse("DCC CHAT chat 2130706433 40000").unwrap();
        assert_eq!(
            offer,
            DccOffer::Chat {
                addr: Ipv4Addr::new(127, 0, 0, 1),
                port: 40000,
            }
        );
    }

    #[test]
    fn parses_send_offer() {
        let offer = parse("DCC SEND file.txt 2130706433 4000 7").unwrap();
        assert_eq!(
            offer,
            DccOffer::Send {
                filename: "file.txt".into(),
                addr: Ipv4Addr::new(127, 0, 0, 1),
                port: 4000,
                size: 7,
            }
        );
    }

    #[test]
    fn malformed_payload_is_not_dcc() {
        assert!(parse("DCC UNKNOWN foo").is_none());
        assert!(parse("DCC SEND file.txt notanumber 4000 7").is_none());
    }

    #[test]
    fn round_trips_chat_offer() {
        let line = format_chat_offer(Ipv4Addr::new(127, 0, 0, 1), 40000);
        assert_eq!(
            parse(&line).unwrap(),
            DccOffer::Chat {
                addr: Ipv4Addr::new(127, 0, 0, 1),
                port: 40000,
            }
        );
    }
}
