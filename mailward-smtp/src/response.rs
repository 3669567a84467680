//! SMTP response parsing.

/// A complete (possibly multi-line) SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx intermediate replies (`354 Start mail input`).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_temporary_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Parse a complete response from the front of `buffer`.
    ///
    /// Returns the response and the number of bytes consumed, or `None`
    /// when more data is needed. A line that does not look like SMTP at
    /// all is an error.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>, String> {
        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;
        let mut rest = buffer;

        loop {
            let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
                // Incomplete line, wait for more data.
                return Ok(None);
            };

            let line = std::str::from_utf8(&rest[..end])
                .map_err(|_| "response is not valid UTF-8".to_string())?;
            consumed += end + 2;
            rest = &rest[end + 2..];

            if line.len() < 3 {
                return Err(format!("response line too short: '{line}'"));
            }
            let line_code: u16 = line[..3]
                .parse()
                .map_err(|_| format!("invalid status code in '{line}'"))?;

            match code {
                None => code = Some(line_code),
                Some(first) if first != line_code => {
                    return Err(format!(
                        "status code changed mid-response: {first} then {line_code}"
                    ));
                }
                Some(_) => {}
            }

            let (last, text) = match line.as_bytes().get(3) {
                Some(b' ') => (true, &line[4..]),
                Some(b'-') => (false, &line[4..]),
                None => (true, ""),
                Some(other) => {
                    return Err(format!("invalid separator '{}'", *other as char));
                }
            };
            lines.push(text.to_string());

            if last {
                let code = code.unwrap_or_default();
                return Ok(Some((Self { code, lines }, consumed)));
            }
        }
    }
}
