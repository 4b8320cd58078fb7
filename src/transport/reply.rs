//! SMTP reply parsing and the reply codes the session checks for.

use super::{Result, TransportError};

/// Reply codes the session compares against.
///
/// Each step succeeds only on exact equality with its code. Other positive
/// codes are failures too.
pub mod codes {
    /// 220: `<domain> Service ready` (RFC 5321 §4.2.3), also the reply to
    /// `STARTTLS` when the server is ready to start TLS (RFC 3207 §4).
    pub const READY: u16 = 220;

    /// 221: `<domain> Service closing transmission channel` (RFC 5321 §4.2.3).
    pub const CLOSING: u16 = 221;

    /// 235: `Authentication successful` (RFC 4954 §6).
    pub const AUTH_SUCCESSFUL: u16 = 235;

    /// 250: `Requested mail action okay, completed` (RFC 5321 §4.2.3).
    pub const OK: u16 = 250;

    /// 251: `User not local; will forward` (RFC 5321 §4.2.3).
    pub const WILL_FORWARD: u16 = 251;

    /// 334: server challenge during `AUTH` (RFC 4954 §4).
    pub const AUTH_CONTINUE: u16 = 334;

    /// 354: `Start mail input; end with <CRLF>.<CRLF>` (RFC 5321 §4.2.3).
    pub const START_MAIL_INPUT: u16 = 354;
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code.
    pub code: u16,
    /// Text of every line, without code or separator.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a reply.
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Returns the reply text with lines joined by newlines.
    pub fn detail(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns true if the code is exactly `expected`.
    pub fn is(&self, expected: u16) -> bool {
        self.code == expected
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` if
    /// the buffer does not yet hold a final line.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = std::str::from_utf8(raw)
                .map_err(|e| TransportError::MalformedReply(e.to_string()))?;
            let (line_code, last, text) = parse_line(line)?;

            match code {
                None => code = Some(line_code),
                Some(first) if first != line_code => {
                    return Err(TransportError::MalformedReply(format!(
                        "code changed mid-reply: {first} then {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(text.to_string());

            if last {
                let code = code.unwrap_or(line_code);
                return Ok(Some((Self { code, lines }, consumed)));
            }
        }

        Ok(None)
    }
}

/// Splits `250-text` / `250 text` / `250` into code, last-line flag and text.
fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| TransportError::MalformedReply(format!("bad reply line: {line:?}")))?;
    let code = digits
        .parse()
        .map_err(|_| TransportError::MalformedReply(format!("bad reply code: {digits:?}")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(_) => Err(TransportError::MalformedReply(format!(
            "bad reply separator: {line:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line() {
        let (reply, consumed) = Reply::parse(b"220 smtp.example.com ESMTP ready\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.detail(), "smtp.example.com ESMTP ready");
        assert_eq!(consumed, 34);
    }

    #[test]
    fn parses_multi_line() {
        let data = b"250-smtp.example.com\r\n250-STARTTLS\r\n250 AUTH PLAIN LOGIN\r\n";
        let (reply, consumed) = Reply::parse(data).unwrap().unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(
            reply.lines,
            vec!["smtp.example.com", "STARTTLS", "AUTH PLAIN LOGIN"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn incomplete_reply_needs_more_data() {
        assert!(Reply::parse(b"250-smtp.example.com\r\n250-SIZE")
            .unwrap()
            .is_none());
        assert!(Reply::parse(b"").unwrap().is_none());
    }

    #[test]
    fn bare_code_is_accepted() {
        let (reply, _) = Reply::parse(b"354\r\n").unwrap().unwrap();
        assert_eq!(reply.code, 354);
        assert_eq!(reply.detail(), "");
    }

    #[test]
    fn leaves_trailing_bytes_unconsumed() {
        let data = b"221 bye\r\n250 extra\r\n";
        let (_, consumed) = Reply::parse(data).unwrap().unwrap();
        assert_eq!(&data[consumed..], b"250 extra\r\n");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Reply::parse(b"hello\r\n").is_err());
        assert!(Reply::parse(b"250*odd\r\n").is_err());
        assert!(Reply::parse(b"250-a\r\n251 b\r\n").is_err());
    }

    #[test]
    fn exact_code_match() {
        let reply = Reply::new(250, "ok");
        assert!(reply.is(codes::OK));
        assert!(!reply.is(codes::READY));
    }
}
