//! Delivery outcome events, published fire-and-forget to the application.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Spam classification for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamStatus {
    Spam,
    Ham,
    /// The daemon answered with something other than a `Yes`/`No` verdict.
    Unknown,
}

/// Parsed spamd verdict: the yes/no classification plus the `key=value`
/// tags following it (keys lowercased).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamVerdict {
    pub status: SpamStatus,
    pub tags: AHashMap<String, String>,
}

impl SpamVerdict {
    pub fn unknown() -> Self {
        Self {
            status: SpamStatus::Unknown,
            tags: AHashMap::new(),
        }
    }

    pub fn is_spam(&self) -> bool {
        self.status == SpamStatus::Spam
    }
}

/// Events emitted by the dispatcher.
///
/// `Sent` fires on the age-out purge of a successfully delivered entry (not
/// at acceptance time), so the queue retains correlation data for late
/// bounces until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Sent {
        id: String,
        recipient: String,
    },
    Failed {
        id: String,
        recipient: String,
    },
    Bounced {
        id: String,
        recipient: String,
    },
    SpamStatus {
        id: String,
        verdict: SpamVerdict,
    },
}

impl DeliveryEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Sent { id, .. }
            | Self::Failed { id, .. }
            | Self::Bounced { id, .. }
            | Self::SpamStatus { id, .. } => id,
        }
    }
}

/// The application's event bus. Implementations must not block: the
/// dispatcher calls this from its worker tasks and from the supervisor's
/// poll cycle.
pub trait Notifier<C>: Send + Sync {
    fn notify(&self, event: DeliveryEvent, ctx: &C);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl<C> Notifier<C> for NullNotifier {
    fn notify(&self, _event: DeliveryEvent, _ctx: &C) {}
}
