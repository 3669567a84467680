use mailward_common::pickle::PickleError;
use mailward_queue::QueueError;
use thiserror::Error;

/// Errors surfaced to callers of the [`Mailer`](crate::Mailer) handle.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Pickle(#[from] PickleError),

    /// The supervisor has shut down; no further requests are accepted.
    #[error("dispatch server is not running")]
    ServerStopped,
}
