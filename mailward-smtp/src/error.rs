use thiserror::Error;

/// Outcome taxonomy of a send attempt.
///
/// The dispatcher's translation table keys on three groups: retriable
/// outcomes leave the queue entry untouched for the next poll,
/// [`SendError::NoMoreHosts`] and everything else remove the entry and
/// emit a failure event.
#[derive(Debug, Error)]
pub enum SendError {
    /// Every candidate host was tried and none accepted a connection.
    #[error("no more hosts for delivery: {last}")]
    NoMoreHosts { last: String },

    /// The per-host session budget was spent on temporary failures.
    /// Retriable: the next poll gets a fresh budget.
    #[error("retries exceeded for {host}")]
    RetriesExceeded { host: String },

    /// 4xx or transient session failure. Retriable.
    #[error("temporary failure from {host}: {reason}")]
    Temporary { host: String, reason: String },

    /// 5xx rejection.
    #[error("rejected by {host}: {code} {reason}")]
    Rejected {
        host: String,
        code: u16,
        reason: String,
    },

    /// Connection-level failure to one host; the transport iterates to the
    /// next candidate on this.
    #[error("could not connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS failure with {host}: {reason}")]
    Tls { host: String, reason: String },

    /// The peer spoke something that does not parse as SMTP.
    #[error("protocol error from {host}: {reason}")]
    Protocol { host: String, reason: String },

    #[error("invalid send options: {0}")]
    InvalidOptions(String),
}

impl SendError {
    /// True for outcomes the dispatcher leaves in the queue for the next
    /// poll.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Temporary { .. } | Self::RetriesExceeded { .. })
    }

    /// True for failures that only say "this host was unreachable".
    pub(crate) fn is_connect_level(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Tls { .. })
    }
}
