//! The persisted queue entry and its lifecycle predicates.

use std::time::SystemTime;

use mailward_common::message::EmailRequest;
use serde::{Deserialize, Serialize};

use crate::{
    id::MessageId,
    retry::{self, DELETE_AFTER, MAX_RETRY},
};

/// One queued outbound message.
///
/// An entry is *active* while `sent` is absent and `retry` has not passed
/// [`MAX_RETRY`]; it becomes *sent* when the SMTP server accepts it, and
/// *exhausted* when its attempts run out. Sent entries linger until the
/// age-out purge so late bounces can still be correlated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: MessageId,
    /// The single resolved recipient of this entry (cc/bcc fan out into
    /// companion entries with their own recipient).
    pub recipient: String,
    /// The original request, re-encoded on every attempt.
    pub email: EmailRequest,
    /// Opaque application snapshot taken at `send` time.
    pub pickled_context: Vec<u8>,
    pub created: SystemTime,
    /// Next eligible attempt. Monotonically non-decreasing while active.
    pub retry_on: SystemTime,
    /// Attempts consumed so far.
    pub retry: u32,
    pub sent: Option<SystemTime>,
}

impl QueueEntry {
    pub fn new(
        id: MessageId,
        recipient: impl Into<String>,
        email: EmailRequest,
        pickled_context: Vec<u8>,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            recipient: recipient.into(),
            email,
            pickled_context,
            created: now,
            retry_on: now + retry::period(0),
            retry: 0,
            sent: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.sent.is_none() && self.retry <= MAX_RETRY
    }

    pub fn is_exhausted(&self) -> bool {
        self.sent.is_none() && self.retry > MAX_RETRY
    }

    /// Active and past its `retry_on` timestamp.
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.is_active() && self.retry_on < now
    }

    /// Sent long enough ago to be purged.
    pub fn sent_expired(&self, now: SystemTime) -> bool {
        self.sent.is_some_and(|sent| {
            now.duration_since(sent)
                .map(|age| age > DELETE_AFTER)
                .unwrap_or(false)
        })
    }
}
