//! SMTP response parsing and representation.

use super::error::{ClientError, Result};

/// A single line in an SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The SMTP status code (e.g. 220, 250, 550).
    pub code: u16,
    /// Whether this is the last line in a multi-line response.
    pub is_last: bool,
    /// The message text following the status code.
    pub message: String,
}

/// A complete SMTP response, possibly multi-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// All message lines in the response.
    pub lines: Vec<String>,
}

impl Response {
    /// Creates a new `Response`.
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The complete message, lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns `true` for 2xx codes.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns `true` for 4xx codes.
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns `true` for 5xx codes.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Whether an EHLO response advertises the given extension keyword.
    ///
    /// Capability keywords are matched case-insensitively against the
    /// first word of each line, so `STARTTLS` matches but a hostname
    /// that merely contains the string does not.
    #[must_use]
    pub fn has_capability(&self, keyword: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses a single response line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        if line.len() < 3 {
            return Err(ClientError::Parse(format!(
                "response line too short: '{line}'"
            )));
        }

        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::Parse(format!("invalid status code in '{line}'")))?;
        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::Parse(format!("invalid status code: '{code_str}'")))?;

        // A space means last line, a dash means continuation.
        let is_last = if line.len() > 3 {
            match line.chars().nth(3) {
                Some(' ') => true,
                Some('-') => false,
                Some(c) => {
                    return Err(ClientError::Parse(format!(
                        "invalid separator character: '{c}'"
                    )));
                }
                None => true,
            }
        } else {
            true
        };

        let message = line.get(4..).unwrap_or("").to_string();

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Parses a complete multi-line SMTP response from a buffer.
    ///
    /// Returns the parsed `Response` and the number of bytes consumed, or
    /// `None` when the buffer does not yet hold a complete response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;
        let mut lines = Vec::new();
        let mut bytes_consumed = 0;
        let mut first_code = None;
        let mut complete = false;

        loop {
            let rest = &text[bytes_consumed..];
            let Some(newline) = rest.find('\n') else {
                // Incomplete line.
                break;
            };

            let line = rest[..newline].trim_end_matches('\r');
            bytes_consumed += newline + 1;

            if line.is_empty() {
                continue;
            }

            let parsed_line = Self::parse_line(line)?;

            if let Some(code) = first_code {
                if parsed_line.code != code {
                    return Err(ClientError::Parse(format!(
                        "status code mismatch in multi-line response: expected {code}, got {}",
                        parsed_line.code
                    )));
                }
            } else {
                first_code = Some(parsed_line.code);
            }

            lines.push(parsed_line.message);

            if parsed_line.is_last {
                complete = true;
                break;
            }
        }

        if complete {
            first_code.map_or(Ok(None), |code| {
                Ok(Some((Self::new(code, lines), bytes_consumed)))
            })
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let line = ResponseLine {
            code: 220,
            is_last: true,
            message: "mail.example.com ESMTP".to_string(),
        };
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            line
        );
    }

    #[test]
    fn test_parse_multi_line_indicator() {
        let line = ResponseLine {
            code: 250,
            is_last: false,
            message: "mail.example.com".to_string(),
        };
        assert_eq!(Response::parse_line("250-mail.example.com").unwrap(), line);
    }

    #[test]
    fn test_parse_complete_response() {
        let data = b"250 OK\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10000000", "HELP"]
        );
        assert_eq!(consumed, 51);
    }

    #[test]
    fn test_parse_bare_lf_line_endings() {
        let data = b"220 welcome\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 220);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_parse_incomplete_response() {
        let data = b"250-mail.example.com\r\n250-SIZE";
        assert!(Response::parse_response(data).unwrap().is_none());

        // A complete line but with a continuation marker is still
        // incomplete as a response.
        let data = b"250-mail.example.com\r\n";
        assert!(Response::parse_response(data).unwrap().is_none());
    }

    #[test]
    fn test_parse_code_mismatch() {
        let data = b"250-one\r\n354 two\r\n";
        assert!(Response::parse_response(data).is_err());
    }

    #[test]
    fn test_code_classification() {
        assert!(Response::new(250, vec![]).is_success());
        assert!(Response::new(421, vec![]).is_temporary_error());
        assert!(Response::new(550, vec![]).is_permanent_error());
        assert!(!Response::new(550, vec![]).is_success());
    }

    #[test]
    fn test_has_capability() {
        let response = Response::new(
            250,
            vec![
                "mail.example.com".to_string(),
                "SIZE 10000000".to_string(),
                "starttls".to_string(),
            ],
        );
        assert!(response.has_capability("STARTTLS"));
        assert!(response.has_capability("SIZE"));
        assert!(!response.has_capability("CHUNKING"));

        let response = Response::new(250, vec!["mail.starttls.example".to_string()]);
        assert!(!response.has_capability("STARTTLS"));
    }
}
