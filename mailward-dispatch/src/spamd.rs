//! Post-acceptance SpamAssassin probe.
//!
//! After a successful relay acceptance the encoded message is submitted to
//! a `spamd` daemon with the SPAMC `HEADERS` command, and the returned
//! `X-Spam-Status` header is parsed into a verdict. The probe is telemetry
//! only: every failure here is absorbed by the caller and never changes
//! the delivery outcome.

use std::time::Duration;

use mailward_common::{
    config::SpamdEndpoint,
    log,
    notify::{SpamStatus, SpamVerdict},
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Overall budget for the probe. On expiry, whatever response has arrived
/// is parsed as-is.
pub const SPAMD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SpamdError {
    #[error("could not reach spamd at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("spamd i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Submit `message` and parse the daemon's verdict.
pub async fn check(endpoint: &SpamdEndpoint, message: &[u8]) -> Result<SpamVerdict, SpamdError> {
    let response = probe(endpoint, message).await?;
    Ok(parse_response(&response))
}

async fn probe(endpoint: &SpamdEndpoint, message: &[u8]) -> Result<Vec<u8>, SpamdError> {
    let address = endpoint.address();
    let mut stream = timeout(SPAMD_TIMEOUT, TcpStream::connect(&address))
        .await
        .map_err(|_| SpamdError::Connect {
            address: address.clone(),
            reason: "connect timed out".to_string(),
        })?
        .map_err(|e| SpamdError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        })?;

    // Content-length covers the message plus its trailing CRLF.
    let header = format!(
        "HEADERS SPAMC/1.2\r\nContent-length: {}\r\nUser: spamd\r\n\r\n",
        message.len() + 2
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(message).await?;
    stream.write_all(b"\r\n").await?;

    let mut response = Vec::new();
    match timeout(SPAMD_TIMEOUT, stream.read_to_end(&mut response)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            log!(
                internal,
                level = DEBUG,
                "spamd at {address} did not close within {}s, using partial response",
                SPAMD_TIMEOUT.as_secs()
            );
        }
    }

    Ok(response)
}

/// Parse a spamd response into a verdict.
///
/// The optional `SPAMD/...` status banner is stripped, the RFC-822-style
/// headers are unfolded, and the `X-Spam-Status` value is matched against
/// the `Yes, ` / `No, ` prefixes. Anything else, including a missing
/// header, is an [`SpamStatus::Unknown`] verdict with no tags.
pub fn parse_response(raw: &[u8]) -> SpamVerdict {
    let text = String::from_utf8_lossy(raw);

    let body = match text.strip_prefix("SPAMD/") {
        Some(_) => match text.split_once('\n') {
            Some((_, rest)) => rest,
            None => return SpamVerdict::unknown(),
        },
        None => &text,
    };

    for (name, value) in unfold_headers(body) {
        if name.eq_ignore_ascii_case("X-Spam-Status") {
            return parse_status(&value);
        }
    }

    SpamVerdict::unknown()
}

/// Unfold RFC-822-style headers: a line starting with whitespace continues
/// the previous value. Tabs are dropped and lone CRs count as line breaks.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in normalized.split('\n') {
        if line.is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                let continuation: String = line.chars().filter(|c| *c != '\t').collect();
                value.push(' ');
                value.push_str(continuation.trim_start());
            }
            continue;
        }

        match line.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            None => break,
        }
    }

    headers
}

fn parse_status(value: &str) -> SpamVerdict {
    let (status, rest) = if let Some(rest) = value.strip_prefix("Yes, ") {
        (SpamStatus::Spam, rest)
    } else if let Some(rest) = value.strip_prefix("No, ") {
        (SpamStatus::Ham, rest)
    } else {
        return SpamVerdict::unknown();
    };

    let mut tags = ahash::AHashMap::new();
    for token in rest.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            tags.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    SpamVerdict { status, tags }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    const RESPONSE: &[u8] = b"SPAMD/1.1 0 EX_OK\r\n\
X-Spam-Checker-Version: SpamAssassin 4.0.0\r\n\
X-Spam-Status: No, score=1.2 required=5.0 tests=HTML_MESSAGE,\r\n\
\tMIME_HTML_ONLY autolearn=no autolearn_force=no version=4.0.0\r\n\
\r\n";

    #[test]
    fn test_parse_ham_with_folded_tags() {
        let verdict = parse_response(RESPONSE);
        assert_eq!(verdict.status, SpamStatus::Ham);
        assert!(!verdict.is_spam());
        assert_eq!(verdict.tags.get("score").map(String::as_str), Some("1.2"));
        assert_eq!(
            verdict.tags.get("required").map(String::as_str),
            Some("5.0")
        );
        assert_eq!(
            verdict.tags.get("autolearn").map(String::as_str),
            Some("no")
        );
        // Bare tokens like the tests list carry no '=' once folded and are
        // not tags.
        assert!(!verdict.tags.contains_key("mime_html_only"));
    }

    #[test]
    fn test_parse_spam_verdict() {
        let verdict =
            parse_response(b"X-Spam-Status: Yes, score=9.9 required=5.0\r\n\r\n");
        assert_eq!(verdict.status, SpamStatus::Spam);
        assert!(verdict.is_spam());
        assert_eq!(verdict.tags.get("score").map(String::as_str), Some("9.9"));
    }

    #[test]
    fn test_unknown_verdict_prefix() {
        let verdict = parse_response(b"X-Spam-Status: Perhaps, score=1\r\n\r\n");
        assert_eq!(verdict.status, SpamStatus::Unknown);
        assert!(verdict.tags.is_empty());
    }

    #[test]
    fn test_missing_header_and_garbage() {
        assert_eq!(
            parse_response(b"X-Other: nothing here\r\n\r\n").status,
            SpamStatus::Unknown
        );
        assert_eq!(parse_response(b"").status, SpamStatus::Unknown);
        assert_eq!(parse_response(b"SPAMD/1.1 76 EX_NOINPUT").status, SpamStatus::Unknown);
    }

    #[test]
    fn test_cr_only_line_breaks_are_normalized() {
        let verdict = parse_response(b"X-Spam-Status: No, score=0.1\r\r");
        assert_eq!(verdict.status, SpamStatus::Ham);
        assert_eq!(verdict.tags.get("score").map(String::as_str), Some("0.1"));
    }

    #[tokio::test]
    async fn test_probe_wire_format() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                if request.ends_with(b"body\r\n\r\n") {
                    break;
                }
            }
            stream.write_all(RESPONSE).await.unwrap();
            request
        });

        let endpoint = SpamdEndpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let message = b"Subject: probe\r\n\r\nbody\r\n";
        let verdict = check(&endpoint, message).await.unwrap();
        assert_eq!(verdict.status, SpamStatus::Ham);

        let request = server.await.unwrap();
        let expected_header = format!(
            "HEADERS SPAMC/1.2\r\nContent-length: {}\r\nUser: spamd\r\n\r\n",
            message.len() + 2
        );
        assert!(request.starts_with(expected_header.as_bytes()));
        assert!(request.ends_with(b"Subject: probe\r\n\r\nbody\r\n\r\n"));
    }
}
