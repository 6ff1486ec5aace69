//! Container runtime adapters.
//!
//! The reconciler and the query service only talk to [`ContainerRuntime`].
//! `DockerCli` drives a local docker (or docker-compatible) binary;
//! `MemoryRuntime` keeps containers in process and supports fault injection.

use crate::compose::{ContainerSpec, PortMapping, RestartPolicy};
use crate::config::{RuntimeBackend, RuntimeConfig};
use crate::error::RuntimeError;
use crate::types::ContainerInfo;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
use mockall::automock;

pub mod docker;
pub mod memory;

pub use docker::DockerCli;
pub use memory::{MemoryRuntime, OpKind, RuntimeOp};

/// Label carrying the owning group name
pub const GROUP_LABEL: &str = "dumont.group";
/// Label carrying the service name inside the group
pub const SERVICE_LABEL: &str = "dumont.service";
/// Label carrying the spec hash the container was created from
pub const SPEC_HASH_LABEL: &str = "dumont.spec-hash";

/// Everything a runtime needs to create one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

impl CreateRequest {
    /// Build the request for one service of a group, labels included
    pub fn for_service(group: &str, spec: &ContainerSpec) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(GROUP_LABEL.to_string(), group.to_string());
        labels.insert(SERVICE_LABEL.to_string(), spec.service_name.clone());
        labels.insert(SPEC_HASH_LABEL.to_string(), spec.spec_hash());

        Self {
            name: container_name(group, &spec.service_name),
            image: spec.image.clone(),
            ports: spec.ports.clone(),
            env: spec.env.clone(),
            restart_policy: spec.restart_policy,
            labels,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.labels.get(GROUP_LABEL).map(String::as_str)
    }
}

/// `<group>_<service>_<digest>`, reduced to characters container runtimes accept.
///
/// The slugs are lossy (`Shop` and `shop` share one), so a digest of the raw
/// pair keeps names of distinct groups and services apart.
pub fn container_name(group: &str, service: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group.as_bytes());
    hasher.update([0u8]);
    hasher.update(service.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}_{}", slug(group), slug(service), &digest[..8])
}

fn slug(value: &str) -> String {
    let mut out: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    while out.starts_with(|c: char| !c.is_ascii_alphanumeric()) {
        out.remove(0);
    }
    if out.is_empty() {
        out.push_str("group");
    }
    out
}

/// Capability surface of a container runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// All containers, running or not, with their labels
    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Create (but do not start) a container; returns the runtime id
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a stopped container
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;
}

/// Build the adapter selected in configuration
pub fn from_config(config: &RuntimeConfig) -> Arc<dyn ContainerRuntime> {
    match config.backend {
        RuntimeBackend::Docker => {
            info!(
                "🐳 Using docker runtime at {} (timeout {}s)",
                config.docker_binary, config.timeout_secs
            );
            Arc::new(DockerCli::new(
                config.docker_binary.clone(),
                Duration::from_secs(config.timeout_secs),
            ))
        }
        RuntimeBackend::Memory => {
            info!("🧪 Using in-memory runtime; containers are not real");
            Arc::new(MemoryRuntime::new())
        }
    }
}
