//! Correlation of inbound bounce notifications with queue entries.

use mailward_common::address;
use mailward_queue::{MessageId, QueueEntry, QueueError, QueueStore};

/// Recover the message id from a VERP bounce address
/// (`noreply+<id>@<domain>`). Addresses without the bounce prefix, or
/// whose remainder does not parse as an id, yield `None`.
pub fn parse_bounce_address(bounce_address: &str) -> Option<MessageId> {
    let local = bounce_address.split('@').next()?;
    let id = local.strip_prefix(address::BOUNCE_PREFIX)?;
    MessageId::parse(id).ok()
}

/// Atomically remove and return the entry a bounce refers to.
///
/// `None` means the bounce is an orphan: unparsable address, or no entry
/// under that id (custom bounce domains may deliver bounces for messages
/// this process never sent, and late bounces may arrive after the age-out
/// purge). Orphans are silently discarded by the caller.
pub async fn correlate(
    store: &dyn QueueStore,
    bounce_address: &str,
) -> Result<Option<QueueEntry>, QueueError> {
    let Some(id) = parse_bounce_address(bounce_address) else {
        return Ok(None);
    };
    store.delete(&id).await
}
