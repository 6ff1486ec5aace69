use crate::compose::GroupSpec;
use crate::types::{ContainerStatus, PortBinding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A container the reconciler created for one service of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub runtime_id: String,
    pub group_name: String,
    pub service_name: String,
    pub spec_hash: String,
    pub status: ContainerStatus,
    pub ports: Vec<PortBinding>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Persisted state of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub spec: GroupSpec,
    pub managed: Vec<ManagedContainer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub version: u64,
    pub services: usize,
    pub managed: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&GroupEntry> for GroupSummary {
    fn from(entry: &GroupEntry) -> Self {
        Self {
            name: entry.spec.name.clone(),
            version: entry.spec.version,
            services: entry.spec.services.len(),
            managed: entry.managed.len(),
            updated_at: entry.spec.updated_at,
        }
    }
}
