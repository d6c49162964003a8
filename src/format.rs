//! Outbound line formatting: turn a command + parameters into a CR-LF
//! terminated wire line. The trailing parameter is colon-prefixed
//! whenever it contains a space, is empty, or itself starts with `:`,
//! matching the RFC 1459 grammar the parser in [`crate::message`] expects.

/// Formats `command params...` into a CR-LF terminated line.
///
/// The last parameter is treated as the trailing parameter and gets a `:`
/// prefix when required for it to round-trip through the parser.
pub fn format_line(command: &str, params: &[&str]) -> Vec<u8> {
    let mut line = String::with_capacity(64);
    line.push_str(command);

    for (i, p) in params.iter().enumerate() {
        line.push(' ');
        let is_last = i == params.len() - 1;
        if is_last && needs_trailing_colon(p) {
            line.push(':');
        }
        line.push_str(p);
    }

    line.push_str("\r\n");
    line.into_bytes()
}

fn needs_trailing_colon(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

/// Wraps `payload` in CTCP delimiters and formats it as a `PRIVMSG target`
/// line. Used by `cmd_me`, DCC negotiation, and the CTCP request/reply
/// helpers.
pub fn format_ctcp(verb_command: &str, target: &str, ctcp_payload: &str) -> Vec<u8> {
    let framed = crate::ctcp::encode(ctcp_payload);
    format_line(verb_command, &[target, &framed])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_command_no_trailing_colon() {
        let line = format_line("JOIN", &["#chan"]);
        assert_eq!(line, b"JOIN #chan\r\n");
    }

    #[test]
    fn trailing_param_with_space_gets_colon() {
        let line = format_line("PRIVMSG", &["#chan", "hello there"]);
        assert_eq!(line, b"PRIVMSG #chan :hello there\r\n");
    }

    #[test]
    fn single_word_trailing_param_has_no_colon() {
        let line = format_line("PRIVMSG", &["#chan", "hi"]);
        assert_eq!(line, b"PRIVMSG #chan hi\r\n");
    }

    #[test]
    fn empty_trailing_param_gets_colon() {
        let line = format_line("PRIVMSG", &["#chan", ""]);
        assert_eq!(line, b"PRIVMSG #chan :\r\n");
    }

    #[test]
    fn ctcp_action_is_framed() {
        let line = format_ctcp("PRIVMSG", "#chan", "ACTION waves");
        assert_eq!(line, b"PRIVMSG #chan :\x01ACTION waves\x01\r\n");
    }
}
