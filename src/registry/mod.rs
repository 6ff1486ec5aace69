//! Group registry: group name → last applied spec + managed containers.
//!
//! Every mutation takes a [`GroupLock`] for the group it touches, so writes to
//! one group are linearized while different groups proceed independently.
//! Plain reads (`get`, `managed`, `groups`) never wait on a group lock.

use crate::compose::{self, GroupSpec};
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

pub mod store;
pub mod types;

pub use store::{JsonFileStore, MemoryStore, RegistryStore};
pub use types::{GroupEntry, GroupSummary, ManagedContainer};

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive right to mutate one group; released on drop
pub struct GroupLock {
    name: String,
    locks: Arc<LockMap>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map and one in our guard means nobody is waiting.
        if locks
            .get(&self.name)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 2)
        {
            locks.remove(&self.name);
        }
    }
}

impl GroupLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for GroupLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupLock").field("name", &self.name).finish()
    }
}

pub struct GroupRegistry {
    store: Arc<dyn RegistryStore>,
    entries: RwLock<HashMap<String, GroupEntry>>,
    locks: Arc<LockMap>,
}

impl GroupRegistry {
    /// Open a registry over `store`, loading every persisted group
    pub async fn open(store: Arc<dyn RegistryStore>) -> Result<Self, RegistryError> {
        let loaded = store.load_all().await?;
        info!("📚 Loaded {} groups from registry", loaded.len());

        let entries = loaded
            .into_iter()
            .map(|entry| (entry.spec.name.clone(), entry))
            .collect();

        Ok(Self {
            store,
            entries: RwLock::new(entries),
            locks: Arc::default(),
        })
    }

    /// Open the store selected in configuration
    pub async fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let store: Arc<dyn RegistryStore> = if config.ephemeral {
            warn!("Registry is ephemeral; group state will not survive a restart");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(JsonFileStore::new(&config.data_dir)?)
        };
        Self::open(store).await
    }

    /// Empty registry on a fresh in-memory store
    pub fn ephemeral() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            entries: RwLock::new(HashMap::new()),
            locks: Arc::default(),
        }
    }

    /// Wait for exclusive access to `name`.
    ///
    /// Per-group mutexes live only while someone holds or awaits them.
    pub async fn lock(&self, name: &str) -> GroupLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(name.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        debug!("Acquired lock for group '{}'", name);
        GroupLock {
            name: name.to_string(),
            locks: self.locks.clone(),
            _guard: guard,
        }
    }

    /// Parse `raw_text`, assign the next version and store it
    pub async fn upsert(&self, lock: &GroupLock, raw_text: &str) -> Result<GroupSpec, RegistryError> {
        let parsed = compose::parse(raw_text)?;
        let name = lock.name();

        let previous = self.entries.read().await.get(name).cloned();
        let version = previous.as_ref().map(|e| e.spec.version + 1).unwrap_or(1);
        let spec = GroupSpec::from_parsed(name, raw_text, parsed, version);

        let entry = GroupEntry {
            spec: spec.clone(),
            managed: previous.map(|e| e.managed).unwrap_or_default(),
        };
        self.store.save(&entry).await?;
        self.entries.write().await.insert(name.to_string(), entry);

        info!("📝 Group '{}' stored as version {}", name, version);
        Ok(spec)
    }

    /// Store the outcome of a reconciliation pass.
    ///
    /// A spec older than the stored one never replaces it; only the managed
    /// set is updated in that case.
    pub async fn commit(
        &self,
        lock: &GroupLock,
        spec: &GroupSpec,
        managed: Vec<ManagedContainer>,
    ) -> Result<(), RegistryError> {
        let name = lock.name();
        let stored_spec = self
            .entries
            .read()
            .await
            .get(name)
            .map(|e| e.spec.clone())
            .filter(|stored| stored.version > spec.version);

        let entry = GroupEntry {
            spec: stored_spec.unwrap_or_else(|| spec.clone()),
            managed,
        };
        self.store.save(&entry).await?;
        debug!(
            "Group '{}' now manages {} containers",
            name,
            entry.managed.len()
        );
        self.entries.write().await.insert(name.to_string(), entry);
        Ok(())
    }

    /// Delete the group; returns the last spec if there was one
    pub async fn remove(&self, lock: &GroupLock) -> Result<Option<GroupSpec>, RegistryError> {
        let name = lock.name();
        self.store.delete(name).await?;
        let removed = self.entries.write().await.remove(name);
        if removed.is_some() {
            info!("🗑️  Group '{}' removed from registry", name);
        }
        Ok(removed.map(|e| e.spec))
    }

    /// Current spec; may observe a version whose deploy is still running
    pub async fn get(&self, name: &str) -> Option<GroupSpec> {
        self.entries.read().await.get(name).map(|e| e.spec.clone())
    }

    pub async fn entry(&self, name: &str) -> Option<GroupEntry> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn managed(&self, name: &str) -> Vec<ManagedContainer> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.managed.clone())
            .unwrap_or_default()
    }

    /// Runtime ids believed to belong to `name`
    pub async fn list_managed(&self, name: &str) -> BTreeSet<String> {
        self.managed(name)
            .await
            .into_iter()
            .map(|m| m.runtime_id)
            .collect()
    }

    pub async fn groups(&self) -> Vec<GroupSummary> {
        let mut groups: Vec<GroupSummary> = self
            .entries
            .read()
            .await
            .values()
            .map(GroupSummary::from)
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }
}
