//! CTCP in-band framing: a CTCP request or reply is a PRIVMSG/NOTICE payload
//! wrapped in `\x01` bytes, e.g. `\x01ACTION waves\x01`.

use crate::byte::BYTE_CTCP_DELIM;

const DELIM: char = BYTE_CTCP_DELIM as char;

/// Wraps `payload` in CTCP delimiters. This is a sender-side contract only:
/// it does not escape any bytes inside `payload`.
pub fn encode(payload: &str) -> String {
    let mut s = String::with_capacity(payload.len() + 2);
    s.push(DELIM);
    s.push_str(payload);
    s.push(DELIM);
    s
}

/// Decodes `text` as a CTCP payload if it is exactly `\x01...\x01` framed.
/// A payload missing the closing delimiter is not CTCP and is treated as
/// normal text.
pub fn decode(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == BYTE_CTCP_DELIM
        && bytes[bytes.len() - 1] == BYTE_CTCP_DELIM
    {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

/// Splits a decoded CTCP payload into its verb and the remainder, e.g.
/// `"ACTION waves"` -> `("ACTION", Some("waves"))`.
pub fn split_verb(payload: &str) -> (&str, Option<&str>) {
    match payload.find(' ') {
        Some(idx) => (&payload[..idx], Some(&payload[idx + 1..])),
        None => (payload, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_delimiters() {
        assert_eq!(encode("ACTION waves"), "\u{1}ACTION waves\u{1}");
    }

    #[test]
    fn decodes_framed_payload() {
        assert_eq!(decode("\u{1}ACTION waves\u{1}"), Some("ACTION waves"));
    }

    #[test]
    fn missing_closing_delim_is_not_ctcp() {
        assert_eq!(decode("\u{1}ACTION waves"), None);
    }

    #[test]
    fn plain_text_is_not_ctcp() {
        assert_eq!(decode("hi all"), None);
    }

    #[test]
    fn splits_action_verb() {
        assert_eq!(split_verb("ACTION waves"), ("ACTION", Some("waves")));
        assert_eq!(split_verb("VERSION"), ("VERSION", None));
    }
}
