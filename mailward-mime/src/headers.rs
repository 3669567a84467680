//! Header emission rules.
//!
//! Address-like and structural headers must stay plain ASCII: anything
//! outside `0x20..=0x7E` is stripped. Every other header is emitted as an
//! RFC 2047 encoded word when it carries non-ASCII text. Multi-valued list
//! headers (Content-Type parameters and the like) are joined with
//! `";\r\n  "`, key/value items rendering as `k=v`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Header names emitted verbatim (ASCII-stripped), never 2047-encoded.
const STRUCTURAL: &[&str] = &[
    "to",
    "from",
    "reply-to",
    "cc",
    "bcc",
    "date",
    "content-type",
    "mime-version",
    "content-transfer-encoding",
];

/// One item of a multi-valued header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub item: String,
    /// Present for `k=v` parameters, absent for bare items.
    pub value: Option<String>,
}

impl ListItem {
    pub fn bare(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            value: None,
        }
    }

    pub fn param(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            item: key.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    List(Vec<ListItem>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

impl Header {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: HeaderValue::Text(value.into()),
        }
    }

    pub fn list(name: impl Into<String>, items: Vec<ListItem>) -> Self {
        Self {
            name: name.into(),
            value: HeaderValue::List(items),
        }
    }

    fn is_structural(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        STRUCTURAL.contains(&name.as_str())
    }

    /// Emit `Name: value\r\n`.
    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(b": ");
        match &self.value {
            HeaderValue::Text(value) => {
                if self.is_structural() {
                    out.extend_from_slice(strip_non_ascii(value).as_bytes());
                } else {
                    out.extend_from_slice(encode_value(value).as_bytes());
                }
            }
            HeaderValue::List(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match &item.value {
                        Some(value) => {
                            format!("{}={}", strip_non_ascii(&item.item), strip_non_ascii(value))
                        }
                        None => strip_non_ascii(&item.item),
                    })
                    .collect();
                out.extend_from_slice(rendered.join(";\r\n  ").as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// Drop every byte outside printable ASCII.
fn strip_non_ascii(value: &str) -> String {
    value
        .chars()
        .filter(|c| ('\x20'..='\x7e').contains(c))
        .collect()
}

fn is_plain_ascii(value: &str) -> bool {
    value.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// RFC 2047 B-encoding, applied only when the value needs it.
///
/// Encoded words are capped at 75 characters, so the UTF-8 bytes are
/// chunked (on character boundaries) and the words joined with folding
/// whitespace.
fn encode_value(value: &str) -> String {
    if is_plain_ascii(value) {
        return value.to_string();
    }

    // 30 raw bytes -> 40 base64 chars -> 52 chars with the =?UTF-8?B?..?=
    // frame, leaving room for the header name on the first line.
    const CHUNK: usize = 30;

    let mut words = Vec::new();
    let mut current = String::new();
    for c in value.chars() {
        if current.len() + c.len_utf8() > CHUNK {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(current.as_bytes())));
            current.clear();
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(current.as_bytes())));
    }

    words.join("\r\n ")
}
