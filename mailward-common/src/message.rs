//! The outbound email request as accepted by `send`.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Reply-To policy carried by a request.
///
/// The wire forms map as: absent → no header, empty string → [`ReplyTo::Null`]
/// (`Reply-To: <>`), the literal `message-id` → [`ReplyTo::MessageId`], and
/// anything else → [`ReplyTo::Address`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTo {
    /// Null reply path, emitted as `Reply-To: <>`.
    Null,
    /// Use `reply+<id>@<email_domain>`.
    MessageId,
    /// A literal address; a missing domain is filled in from the site.
    Address(String),
}

impl ReplyTo {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => Self::Null,
            "message-id" => Self::MessageId,
            other => Self::Address(other.to_string()),
        }
    }
}

/// A single MIME part of a structured body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimePart {
    /// Top-level type, e.g. `text`.
    pub mime_type: String,
    /// Subtype, e.g. `plain`.
    pub subtype: String,
    /// Extra headers for this part, e.g. `Content-ID` for inline images.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Part body, normalized to CRLF at encode time.
    pub body: Vec<u8>,
}

impl MimePart {
    pub fn text(subtype: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: "text".to_string(),
            subtype: subtype.to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// A pre-built multipart body: the 5-tuple of the encoder backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartSpec {
    pub mime_type: String,
    pub subtype: String,
    /// Extra top-level headers supplied with the body.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Content-Type parameters, rendered as `k=v`.
    #[serde(default)]
    pub params: Vec<(String, String)>,
    pub parts: Vec<MimePart>,
}

/// A pre-built message body, when the caller does not want rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    /// Final wire bytes; the encoder only prepends the `X-Mailer` header.
    Raw(Vec<u8>),
    /// A structured multipart handed to the encoder backend.
    Structured(MultipartSpec),
}

/// An outbound email request.
///
/// Exactly one of the body forms is used, decided at encode time: a
/// pre-built [`Body`], pre-rendered `text`/`html`, or template identifiers
/// with a variables mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailRequest {
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    /// Sender; empty or absent means the configured site sender.
    pub from: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub text_template: Option<String>,
    pub html_template: Option<String>,
    pub vars: AHashMap<String, serde_json::Value>,
    pub reply_to: Option<ReplyTo>,
    pub body: Option<Body>,
    /// Extra top-level headers, emitted after the canonical set.
    pub headers: Vec<(String, String)>,
    /// True defers the first attempt to the next poll; false dispatches
    /// immediately.
    pub queue: bool,
}

impl EmailRequest {
    pub fn to(recipient: impl Into<String>) -> Self {
        Self {
            to: recipient.into(),
            ..Default::default()
        }
    }

    /// The request's `from`, with empty strings treated as absent.
    pub fn from_address(&self) -> Option<&str> {
        self.from.as_deref().filter(|f| !f.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_to_parse_covers_all_wire_forms() {
        assert_eq!(ReplyTo::parse(""), ReplyTo::Null);
        assert_eq!(ReplyTo::parse("message-id"), ReplyTo::MessageId);
        assert_eq!(
            ReplyTo::parse("ops@example.com"),
            ReplyTo::Address("ops@example.com".to_string())
        );
    }

    #[test]
    fn test_from_address_empty_is_absent() {
        let mut request = EmailRequest::to("a@x");
        assert_eq!(request.from_address(), None);

        request.from = Some(String::new());
        assert_eq!(request.from_address(), None);

        request.from = Some("b@y".to_string());
        assert_eq!(request.from_address(), Some("b@y"));
    }

    #[test]
    fn test_request_roundtrips_through_json() {
        let request = EmailRequest {
            to: "a@x".to_string(),
            cc: Some("c@x".to_string()),
            reply_to: Some(ReplyTo::MessageId),
            body: Some(Body::Raw(b"Subject: hi\r\n\r\nbody".to_vec())),
            ..Default::default()
        };

        let json = serde_json::to_string(&request).unwrap();
        let back: EmailRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to, "a@x");
        assert_eq!(back.reply_to, Some(ReplyTo::MessageId));
        assert_eq!(back.body, request.body);
    }
}
