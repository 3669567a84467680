//! Per-send SMTP options, derived from the configuration snapshot.

use std::time::Duration;

use mailward_common::config::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Timeouts for the phases of an SMTP session. DATA gets a longer budget
/// than the command/response exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmtpTimeouts {
    pub connect: Duration,
    pub command: Duration,
    pub data: Duration,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            command: Duration::from_secs(30),
            data: Duration::from_secs(120),
        }
    }
}

/// Session attempts per host before the transport reports its retry
/// budget spent.
pub const DEFAULT_HOST_ATTEMPTS: u32 = 2;

/// Where and how one message is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpOptions {
    /// Next-hop host: the configured relay, or the recipient domain in
    /// direct mode.
    pub relay: String,
    pub port: u16,
    /// Attempt a STARTTLS upgrade after EHLO.
    pub ssl: bool,
    /// AUTH PLAIN, only when both username and password were configured.
    pub auth: Option<Credentials>,
    /// Treat `relay` as a literal host instead of resolving MX records.
    pub no_mx_lookups: bool,
    pub helo_name: String,
    /// Session attempts per host on temporary failures; 1 disables
    /// in-session retries.
    pub host_attempts: u32,
    pub timeouts: SmtpTimeouts,
}

impl SmtpOptions {
    /// Options for relay mode: one configured next-hop for all recipients.
    pub fn for_relay(snapshot: &Snapshot) -> Self {
        let auth = match (&snapshot.username, &snapshot.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            relay: snapshot
                .host
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
            port: snapshot.port,
            ssl: snapshot.ssl,
            auth,
            // The relay is addressed literally; MX records of its name are
            // not what the operator configured.
            no_mx_lookups: true,
            helo_name: snapshot.email_domain.clone(),
            host_attempts: DEFAULT_HOST_ATTEMPTS,
            timeouts: SmtpTimeouts::default(),
        }
    }

    /// Options for direct mode: deliver to the recipient domain itself.
    pub fn for_direct(recipient_domain: &str, snapshot: &Snapshot) -> Self {
        Self {
            relay: recipient_domain.to_string(),
            port: 25,
            ssl: snapshot.ssl,
            auth: None,
            no_mx_lookups: snapshot.no_mx_lookups,
            helo_name: snapshot.email_domain.clone(),
            host_attempts: DEFAULT_HOST_ATTEMPTS,
            timeouts: SmtpTimeouts::default(),
        }
    }

    /// Select relay or direct options per the snapshot, as the dispatch
    /// worker does for each entry.
    pub fn for_recipient(recipient_domain: &str, snapshot: &Snapshot) -> Self {
        if snapshot.relay {
            Self::for_relay(snapshot)
        } else {
            Self::for_direct(recipient_domain, snapshot)
        }
    }
}
