//! Address utilities for the dispatcher: VERP bounce/reply addresses,
//! bounce-address recognition and the small rewrites applied to recipient
//! and sender strings before a message goes out.

use mailparse::MailAddr;

/// Local-part prefix of every VERP bounce address generated here.
pub const BOUNCE_PREFIX: &str = "noreply+";

/// Build the VERP bounce address for a message id: `noreply+<id>@<domain>`.
///
/// The domain is the configured bounce domain, falling back to the site's
/// email domain (resolved by the caller via the config snapshot).
pub fn bounce_address(message_id: &str, bounce_domain: &str) -> String {
    format!("{BOUNCE_PREFIX}{message_id}@{bounce_domain}")
}

/// Build the reply address for a message id: `reply+<id>@<domain>`.
pub fn reply_address(message_id: &str, email_domain: &str) -> String {
    format!("reply+{message_id}@{email_domain}")
}

/// True iff the local-part of `addr` starts with the bounce prefix.
///
/// Detection is prefix-only: the message id is not validated here, so
/// bounces for ids this process never issued still match and are resolved
/// (and possibly discarded) by the correlator.
pub fn is_bounce_address(addr: &str) -> bool {
    addr.split('@').next().is_some_and(|local| local.starts_with(BOUNCE_PREFIX))
}

/// Append `@<domain>` iff `addr` carries no domain of its own.
pub fn ensure_domain(addr: &str, email_domain: &str) -> String {
    if addr.contains('@') {
        addr.to_string()
    } else {
        format!("{addr}@{email_domain}")
    }
}

/// Replace `@` with the literal `-at-`, for override display strings only.
pub fn escape_address(addr: &str) -> String {
    addr.replace('@', "-at-")
}

/// Collapse an address string onto a single line with single spaces.
pub fn single_line(addr: &str) -> String {
    addr.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the bare email address out of a display string such as
/// `"Alice Example <alice@example.com>"`.
///
/// Angle brackets win when present; otherwise the string is handed to
/// `mailparse` and the first single address is taken. A string that parses
/// as neither is returned trimmed, so downstream SMTP code sees whatever
/// the caller supplied.
pub fn extract_email(addr: &str) -> String {
    let addr = single_line(addr);
    if let (Some(start), Some(end)) = (addr.rfind('<'), addr.rfind('>')) {
        if start < end {
            return addr[start + 1..end].trim().to_string();
        }
    }

    match mailparse::addrparse(&addr) {
        Ok(list) => match list.first() {
            Some(MailAddr::Single(info)) => info.addr.clone(),
            _ => addr.trim().to_string(),
        },
        Err(_) => addr.trim().to_string(),
    }
}

/// Extract the display name of an address string, if it has one.
pub fn display_name(addr: &str) -> Option<String> {
    let addr = single_line(addr);
    if let Some(start) = addr.find('<') {
        let name = addr[..start].trim().trim_matches('"').trim();
        return if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
    }

    match mailparse::addrparse(&addr) {
        Ok(list) => match list.first() {
            Some(MailAddr::Single(info)) => info.display_name.clone(),
            _ => None,
        },
        Err(_) => None,
    }
}

/// Split a bare address into `(local, domain)`. A missing domain yields an
/// empty domain string.
pub fn split_address(addr: &str) -> (String, String) {
    match addr.rsplit_once('@') {
        Some((local, domain)) => (local.to_string(), domain.to_string()),
        None => (addr.to_string(), String::new()),
    }
}
