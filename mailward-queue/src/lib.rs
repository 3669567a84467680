//! Durable queue for outbound messages.
//!
//! Every accepted send request becomes a [`QueueEntry`] persisted through a
//! [`QueueStore`]. The store is the only shared mutable state of the
//! dispatcher; all operations are atomic with respect to each other, and
//! the file-backed implementation survives restarts.

pub mod entry;
pub mod error;
pub mod id;
pub mod retry;
pub mod store;

pub use entry::QueueEntry;
pub use error::{QueueError, Result};
pub use id::{Companion, MessageId};
pub use store::{FileStore, MemoryStore, Mutation, QueueStore};
