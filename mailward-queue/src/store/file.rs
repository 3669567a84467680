use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailward_common::log;
use tokio::{fs, sync::Mutex};

use crate::{
    entry::QueueEntry,
    error::{QueueError, Result},
    id::MessageId,
    store::{Mutation, QueueStore},
};

/// File-backed queue store: one JSON document per entry.
///
/// Writes go to a dotfile first and are renamed into place, so a crash
/// mid-write never leaves a truncated entry behind. A single mutex
/// serializes all mutating operations, which upgrades the per-file
/// atomicity of rename into the serializable semantics the store trait
/// promises.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !fs::try_exists(&path).await? {
            log!(internal, "Queue directory {:?} does not exist, creating...", path);
            fs::create_dir_all(&path).await?;
        } else if !path.is_dir() {
            return Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("expected {} to be a directory", path.display()),
            )));
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.json"))
    }

    fn temp_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!(".tmp_{id}.json"))
    }

    async fn write_entry(&self, entry: &QueueEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let temp = self.temp_path(&entry.id);
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, self.entry_path(&entry.id)).await?;
        Ok(())
    }

    async fn read_entry(path: &Path) -> Result<Option<QueueEntry>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let entry = serde_json::from_slice(&bytes)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl QueueStore for FileStore {
    async fn put(&self, entry: &QueueEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_entry(entry).await
    }

    async fn get(&self, id: &MessageId) -> Result<Option<QueueEntry>> {
        Self::read_entry(&self.entry_path(id)).await
    }

    async fn delete(&self, id: &MessageId) -> Result<Option<QueueEntry>> {
        let _guard = self.write_lock.lock().await;
        let entry = Self::read_entry(&self.entry_path(id)).await?;
        if entry.is_some() {
            fs::remove_file(self.entry_path(id)).await?;
        }
        Ok(entry)
    }

    async fn update(&self, id: &MessageId, apply: Mutation) -> Result<QueueEntry> {
        let _guard = self.write_lock.lock().await;
        let mut entry = Self::read_entry(&self.entry_path(id))
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        apply(&mut entry);
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    async fn select(
        &self,
        predicate: &(dyn for<'a> Fn(&'a QueueEntry) -> bool + Sync),
    ) -> Result<Vec<QueueEntry>> {
        let mut matches = Vec::new();
        let mut dir = fs::read_dir(&self.path).await?;

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            match Self::read_entry(&item.path()).await {
                Ok(Some(entry)) => {
                    if predicate(&entry) {
                        matches.push(entry);
                    }
                }
                // Deleted between the directory listing and the read.
                Ok(None) => {}
                Err(e) => {
                    log!(
                        internal,
                        level = WARN,
                        "Skipping unreadable queue entry {name}: {e}"
                    );
                }
            }
        }

        Ok(matches)
    }
}
