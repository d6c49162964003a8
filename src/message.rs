//! The IRC wire-line parser.
//!
//! Splits a line into an optional origin, a command (numeric or textual),
//! and up to [`MAX_PARAMS`](crate::byte::MAX_PARAMS) parameters, honoring the
//! RFC 1459 "trailing parameter" rule: a token starting with `:` takes the
//! rest of the line, spaces included, as one parameter.

use crate::byte::{BYTE_COLON, MAX_PARAMS};

/// A command token: either a three-digit numeric reply or a textual verb
/// such as `PRIVMSG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Numeric(u16),
    Named(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Named(s) => s.as_str(),
            Command::Numeric(_) => "",
        }
    }

    fn parse(token: &str) -> Command {
        if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
            // Unwrap is safe: exactly three ASCII digits always fits in u16.
            Command::Numeric(token.parse().unwrap())
        } else {
            Command::Named(token.to_ascii_uppercase())
        }
    }
}

/// A fully parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: Option<String>,
    pub command: Command,
    pub params: Vec<String>,
}

impl Message {
    /// Parses a single line, which must already have its CR/LF terminator
    /// stripped. Returns `None` for a line with no command token (e.g. an
    /// empty keepalive line).
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line;

        let origin = if rest.as_bytes().first() == Some(&BYTE_COLON) {
            let (tok, after) = split_first_token(&rest[1..]);
            rest = after;
            if tok.is_empty() {
                None
            } else {
                Some(tok.to_string())
            }
        } else {
            None
        };

        let (cmd_tok, mut rest) = split_first_token(rest);
        if cmd_tok.is_empty() {
            return None;
        }
        let command = Command::parse(cmd_tok);

        let mut params: Vec<String> = Vec::new();
        while !rest.is_empty() && params.len() < MAX_PARAMS {
            if rest.as_bytes()[0] == BYTE_COLON {
                params.push(rest[1..].to_string());
                rest = "";
                break;
            }

            let (tok, after) = split_first_token(rest);
            rest = after;
            if !tok.is_empty() {
                params.push(tok.to_string());
            }
        }

        Some(Message {
            origin,
            command,
            params,
        })
    }
}

/// Splits an origin of the form `nick!user@host` into `(nick, Some(host))`,
/// or `(origin, None)` if it carries no `user@host` suffix (a bare server
/// name, as seen on most numerics). Used to implement `STRIPNICKS`.
pub fn split_nick_host(origin: &str) -> (&str, Option<&str>) {
    match origin.find('!') {
        Some(idx) => (&origin[..idx], Some(&origin[idx + 1..])),
        None => (origin, None),
    }
}

/// Splits leading whitespace-delimited token off `s`, returning `(token,
/// remainder)`. The remainder never has leading spaces, so repeated calls
/// never produce empty tokens from runs of spaces.
fn split_first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(' ');
    match s.find(' ') {
        Some(idx) => (&s[..idx], s[idx..].trim_start_matches(' ')),
        None => (s, ""),
    }
}
