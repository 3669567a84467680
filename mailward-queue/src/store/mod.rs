//! Backing stores for the queue.
//!
//! Two implementations ship: [`MemoryStore`] for tests and transient
//! deployments, and [`FileStore`] for durability across restarts. Both give
//! every operation serializable semantics with respect to concurrent calls
//! on the same store.

pub mod file;
pub mod memory;

use async_trait::async_trait;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::{entry::QueueEntry, error::Result, id::MessageId};

/// An atomic read-modify-write applied under the store's lock.
pub type Mutation = Box<dyn FnOnce(&mut QueueEntry) + Send>;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert or replace the entry under its id.
    async fn put(&self, entry: &QueueEntry) -> Result<()>;

    async fn get(&self, id: &MessageId) -> Result<Option<QueueEntry>>;

    /// Remove and return the entry, if present.
    async fn delete(&self, id: &MessageId) -> Result<Option<QueueEntry>>;

    /// Atomically mutate the entry and return its new state.
    ///
    /// # Errors
    /// [`crate::QueueError::NotFound`] when no entry exists for the id.
    async fn update(&self, id: &MessageId, apply: Mutation) -> Result<QueueEntry>;

    /// All entries matching the predicate, in unspecified order.
    async fn select(
        &self,
        predicate: &(dyn for<'a> Fn(&'a QueueEntry) -> bool + Sync),
    ) -> Result<Vec<QueueEntry>>;
}
