use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;

use crate::{
    entry::QueueEntry,
    error::{QueueError, Result},
    id::MessageId,
    store::{Mutation, QueueStore},
};

/// In-memory queue store.
///
/// A `HashMap` behind an `RwLock`; each operation holds the lock for its
/// full duration, which is what gives the trait's atomicity guarantee.
/// Poisoned locks are recovered by taking the inner value: entries are
/// plain data, so a panicking writer cannot leave one half-updated.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<MessageId, QueueEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn put(&self, entry: &QueueEntry) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, id: &MessageId) -> Result<Option<QueueEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn delete(&self, id: &MessageId) -> Result<Option<QueueEntry>> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id))
    }

    async fn update(&self, id: &MessageId, apply: Mutation) -> Result<QueueEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        apply(entry);
        Ok(entry.clone())
    }

    async fn select(
        &self,
        predicate: &(dyn for<'a> Fn(&'a QueueEntry) -> bool + Sync),
    ) -> Result<Vec<QueueEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect())
    }
}
