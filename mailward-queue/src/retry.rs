//! Retry schedule and state transitions driven by the poll cycle.

use std::time::{Duration, SystemTime};

use crate::{entry::QueueEntry, error::Result, id::MessageId, store::QueueStore};

/// Attempts allowed before an entry counts as exhausted. An entry is still
/// active at `retry == MAX_RETRY`; the purge takes it once `retry` passes
/// this value.
pub const MAX_RETRY: u32 = 7;

/// How long a sent entry is retained for late-bounce correlation.
pub const DELETE_AFTER: Duration = Duration::from_secs(240 * 60);

/// Backoff schedule in minutes, keyed on the attempt count before the
/// attempt being scheduled.
const RETRY_PERIODS: [u64; 7] = [10, 60, 720, 1440, 2880, 4320, 10080];

/// Delay until the next attempt after `attempt` attempts.
pub fn period(attempt: u32) -> Duration {
    let minutes = RETRY_PERIODS
        .get(attempt as usize)
        .copied()
        .unwrap_or(RETRY_PERIODS[RETRY_PERIODS.len() - 1]);
    Duration::from_secs(minutes * 60)
}

/// Consume one attempt: bump the counter and move `retry_on` forward by the
/// period keyed on the pre-increment count. The poll applies this before a
/// worker is spawned, so no second worker can pick the entry up while the
/// first is in flight.
pub fn update_retry(entry: &mut QueueEntry, now: SystemTime) {
    let delay = period(entry.retry);
    entry.retry += 1;
    entry.retry_on = now + delay;
}

/// Record server acceptance. The entry stays in the store until the
/// age-out purge.
pub async fn mark_sent(store: &dyn QueueStore, id: &MessageId, now: SystemTime) -> Result<()> {
    store
        .update(id, Box::new(move |entry| entry.sent = Some(now)))
        .await
        .map(|_| ())
}
