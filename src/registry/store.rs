use super::types::GroupEntry;
use crate::error::RegistryError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Durable backing for the group registry
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<GroupEntry>, RegistryError>;

    /// Replace the stored entry for `entry.spec.name`
    async fn save(&self, entry: &GroupEntry) -> Result<(), RegistryError>;

    async fn delete(&self, name: &str) -> Result<(), RegistryError>;
}

/// One JSON document per group under `<data_dir>/groups/`
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: &Path) -> Result<Self, RegistryError> {
        let dir = data_dir.join("groups");
        std::fs::create_dir_all(&dir).map_err(|e| {
            RegistryError::unavailable(format!("cannot create {:?}: {}", dir, e))
        })?;
        info!("📁 Group registry at {:?}", dir);
        Ok(Self { dir })
    }

    /// Group names are free text, so files are keyed by a digest of the name.
    fn path_for(&self, name: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..32]))
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<GroupEntry>, RegistryError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(RegistryError::unavailable)?;

        while let Some(item) = dir.next_entry().await.map_err(RegistryError::unavailable)? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path)
                .await
                .map_err(RegistryError::unavailable)?;
            match serde_json::from_slice::<GroupEntry>(&content) {
                Ok(entry) => {
                    debug!("Loaded group '{}' v{}", entry.spec.name, entry.spec.version);
                    entries.push(entry);
                }
                Err(e) => warn!("Skipping unreadable group file {:?}: {}", path, e),
            }
        }

        Ok(entries)
    }

    async fn save(&self, entry: &GroupEntry) -> Result<(), RegistryError> {
        let path = self.path_for(&entry.spec.name);
        let dir = self.dir.clone();
        let content = serde_json::to_vec_pretty(entry).map_err(RegistryError::unavailable)?;

        // Write to a temp file in the same directory, then rename over the target.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&content)?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(RegistryError::unavailable)?
        .map_err(RegistryError::unavailable)
    }

    async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RegistryError::unavailable(e)),
        }
    }
}

/// Process-local store; state is lost on restart
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, GroupEntry>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, GroupEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<GroupEntry>, RegistryError> {
        self.check()?;
        Ok(self.entries().values().cloned().collect())
    }

    async fn save(&self, entry: &GroupEntry) -> Result<(), RegistryError> {
        self.check()?;
        self.entries()
            .insert(entry.spec.name.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.check()?;
        self.entries().remove(name);
        Ok(())
    }
}
