//! Drives the runtime toward the desired state of one group.
//!
//! A pass runs entirely under the group's [`GroupLock`]:
//!
//! 1. list the runtime once and drop recorded containers that vanished
//! 2. adopt containers labelled with the group that the registry lost track of
//! 3. stop and remove containers whose service left the spec (and duplicates)
//! 4. walk the services in spec order: create, replace on hash change, or keep
//! 5. commit the resulting managed set, or delete the group once an empty
//!    spec has removed its last container
//!
//! Per-service runtime failures are collected in the [`DeployReport`]; only a
//! failed listing or an unavailable registry abort the whole pass.

use crate::compose::{ContainerSpec, GroupSpec};
use crate::error::{DeployError, RuntimeError};
use crate::registry::{GroupLock, GroupRegistry, ManagedContainer};
use crate::runtime::{ContainerRuntime, CreateRequest, GROUP_LABEL, SERVICE_LABEL, SPEC_HASH_LABEL};
use crate::types::{ContainerInfo, ContainerStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub mod report;

pub use report::{Action, DeployReport, ServiceFailure, ServiceOutcome};
use report::Bucket;

#[derive(Clone)]
pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<GroupRegistry>,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<GroupRegistry>) -> Self {
        Self { runtime, registry }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Store `raw_text` as the next version of `name` and converge to it.
    ///
    /// A spec that fails to parse is rejected before any runtime call.
    #[instrument(skip(self, raw_text), fields(group = %name))]
    pub async fn save_and_deploy(&self, name: &str, raw_text: &str) -> Result<DeployReport, DeployError> {
        let lock = self.registry.lock(name).await;
        let spec = self.registry.upsert(&lock, raw_text).await?;
        self.reconcile_locked(&lock, &spec).await
    }

    /// Converge the runtime to an already-parsed spec
    #[instrument(skip(self, spec), fields(group = %spec.name, version = spec.version))]
    pub async fn deploy(&self, spec: &GroupSpec) -> Result<DeployReport, DeployError> {
        let lock = self.registry.lock(&spec.name).await;
        self.reconcile_locked(&lock, spec).await
    }

    /// Re-apply the stored spec of `name`, healing drift
    pub async fn redeploy(&self, name: &str) -> Result<Option<DeployReport>, DeployError> {
        let lock = self.registry.lock(name).await;
        match self.registry.get(name).await {
            Some(spec) => Ok(Some(self.reconcile_locked(&lock, &spec).await?)),
            None => Ok(None),
        }
    }

    /// Stop and remove every container of `name`, then forget the group.
    ///
    /// Returns `None` when neither the registry nor the runtime know the group.
    /// If some container cannot be removed the group stays registered with the
    /// survivors so a later teardown can finish the job.
    #[instrument(skip(self), fields(group = %name))]
    pub async fn teardown(&self, name: &str) -> Result<Option<DeployReport>, DeployError> {
        let lock = self.registry.lock(name).await;
        let entry = self.registry.entry(name).await;
        let live = self.runtime.list().await.map_err(DeployError::RuntimeUnavailable)?;
        let current = self.observe(name, &live).await;

        let Some(spec) = entry.map(|e| e.spec) else {
            if current.is_empty() {
                return Ok(None);
            }
            warn!("Group '{}' is not registered; removing labelled containers", name);
            let mut report = DeployReport {
                group: name.to_string(),
                ..Default::default()
            };
            self.prune(current, &mut report).await;
            return Ok(Some(report));
        };

        let mut report = DeployReport::new(&spec);
        let survivors = self.prune(current, &mut report).await;

        if survivors.is_empty() {
            self.registry.remove(&lock).await?;
            info!("🧹 Group '{}' torn down", name);
        } else {
            warn!(
                "Group '{}' kept {} containers that could not be removed",
                name,
                survivors.len()
            );
            self.registry.commit(&lock, &spec, survivors).await?;
        }
        Ok(Some(report))
    }

    async fn reconcile_locked(&self, lock: &GroupLock, spec: &GroupSpec) -> Result<DeployReport, DeployError> {
        info!(
            "🚀 Deploying group '{}' v{} ({} services)",
            spec.name,
            spec.version,
            spec.services.len()
        );

        let live = self.runtime.list().await.map_err(|e| {
            error!("Cannot list containers for group '{}': {}", spec.name, e);
            DeployError::RuntimeUnavailable(e)
        })?;
        let current = self.observe(&spec.name, &live).await;

        // First container per service wins; the rest are pruned with the stale ones.
        let mut by_service: BTreeMap<String, ManagedContainer> = BTreeMap::new();
        let mut stale = Vec::new();
        for container in current {
            let wanted = spec.service(&container.service_name).is_some();
            if wanted && !by_service.contains_key(&container.service_name) {
                by_service.insert(container.service_name.clone(), container);
            } else {
                stale.push(container);
            }
        }

        let mut report = DeployReport::new(spec);
        let mut next = self.prune(stale, &mut report).await;

        for service in &spec.services {
            let hash = service.spec_hash();
            match by_service.remove(&service.service_name) {
                None => match self.launch(&spec.name, service, &hash).await {
                    Ok(created) => {
                        report.record(Bucket::Created, &service.service_name, &created.runtime_id, None);
                        next.push(created);
                    }
                    Err(e) => {
                        warn!("Service '{}' could not be created: {}", service.service_name, e);
                        report.fail(&service.service_name, Action::Create, e);
                    }
                },
                Some(existing) if existing.spec_hash == hash => {
                    debug!("Service '{}' unchanged", service.service_name);
                    report.record(Bucket::Unchanged, &service.service_name, &existing.runtime_id, None);
                    next.push(existing);
                }
                Some(existing) => {
                    if let Err(e) = self.retire(&existing).await {
                        warn!(
                            "Service '{}' could not release {}: {}",
                            service.service_name, existing.runtime_id, e
                        );
                        report.fail(&service.service_name, Action::Replace, e);
                        next.push(existing);
                        continue;
                    }
                    match self.launch(&spec.name, service, &hash).await {
                        Ok(created) => {
                            info!(
                                "🔁 Service '{}' replaced {} -> {}",
                                service.service_name, existing.runtime_id, created.runtime_id
                            );
                            report.record(
                                Bucket::Replaced,
                                &service.service_name,
                                &created.runtime_id,
                                Some(&existing.runtime_id),
                            );
                            next.push(created);
                        }
                        Err(e) => {
                            warn!("Service '{}' could not be recreated: {}", service.service_name, e);
                            report.fail(&service.service_name, Action::Replace, e);
                        }
                    }
                }
            }
        }

        if spec.services.is_empty() && next.is_empty() && report.is_success() {
            // Nothing wanted and nothing left: the group goes away with its containers.
            self.registry.remove(lock).await.map_err(|e| {
                error!("Group '{}' emptied but registry removal failed: {}", spec.name, e);
                DeployError::from(e)
            })?;
            info!("🧹 Group '{}' has no containers left; removed from registry", spec.name);
        } else {
            self.registry.commit(lock, spec, next).await.map_err(|e| {
                error!("Group '{}' deployed but registry commit failed: {}", spec.name, e);
                DeployError::from(e)
            })?;
        }

        if report.is_success() {
            info!("✅ {}", report);
        } else {
            warn!("⚠️  {}", report);
        }
        Ok(report)
    }

    /// Recorded containers still present in the runtime, plus labelled strays
    async fn observe(&self, group: &str, live: &[ContainerInfo]) -> Vec<ManagedContainer> {
        let by_id: HashMap<&str, &ContainerInfo> = live.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut current = Vec::new();
        for recorded in self.registry.managed(group).await {
            match by_id.get(recorded.runtime_id.as_str()) {
                Some(info) => current.push(ManagedContainer {
                    status: info.status,
                    ports: info.ports.clone(),
                    started_at: info.started_at.or(recorded.started_at),
                    ..recorded
                }),
                None => warn!(
                    "Container {} of '{}/{}' disappeared from the runtime",
                    recorded.runtime_id, group, recorded.service_name
                ),
            }
        }

        for info in live.iter().filter(|c| c.label(GROUP_LABEL) == Some(group)) {
            if current.iter().any(|m| m.runtime_id == info.id) {
                continue;
            }
            let Some(service) = info.label(SERVICE_LABEL) else {
                continue;
            };
            info!("🧲 Adopting container {} for '{}/{}'", info.id, group, service);
            current.push(ManagedContainer {
                runtime_id: info.id.clone(),
                group_name: group.to_string(),
                service_name: service.to_string(),
                spec_hash: info.label(SPEC_HASH_LABEL).unwrap_or_default().to_string(),
                status: info.status,
                ports: info.ports.clone(),
                started_at: info.started_at,
            });
        }

        current
    }

    /// Remove `containers`; returns the ones that are still there
    async fn prune(&self, containers: Vec<ManagedContainer>, report: &mut DeployReport) -> Vec<ManagedContainer> {
        let mut survivors = Vec::new();
        for container in containers {
            match self.retire(&container).await {
                Ok(()) => {
                    info!(
                        "🗑️  Removed {} ('{}/{}')",
                        container.runtime_id, container.group_name, container.service_name
                    );
                    report.record(Bucket::Removed, &container.service_name, &container.runtime_id, None);
                }
                Err(e) => {
                    warn!("Could not remove {}: {}", container.runtime_id, e);
                    report.fail(&container.service_name, Action::Remove, e);
                    survivors.push(container);
                }
            }
        }
        survivors
    }

    /// Stop then remove; a container that is already gone counts as removed
    async fn retire(&self, container: &ManagedContainer) -> Result<(), RuntimeError> {
        match self.runtime.stop(&container.runtime_id).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }
        match self.runtime.remove(&container.runtime_id).await {
            Ok(()) | Err(RuntimeError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create and start one service; a container that fails to start is removed
    async fn launch(&self, group: &str, service: &ContainerSpec, hash: &str) -> Result<ManagedContainer, RuntimeError> {
        let request = CreateRequest::for_service(group, service);
        let id = self.runtime.create(&request).await?;
        debug!("Created {} for '{}/{}'", id, group, service.service_name);

        if let Err(e) = self.runtime.start(&id).await {
            if let Err(cleanup) = self.runtime.remove(&id).await {
                warn!("Could not clean up unstarted container {}: {}", id, cleanup);
            }
            return Err(e);
        }

        let (status, ports, started_at) = match self.runtime.inspect(&id).await {
            Ok(info) => (info.status, info.ports, info.started_at),
            Err(e) => {
                debug!("Inspect of {} failed after start: {}", id, e);
                (
                    ContainerStatus::Running,
                    service.ports.iter().map(|p| p.to_binding()).collect(),
                    None,
                )
            }
        };

        Ok(ManagedContainer {
            runtime_id: id,
            group_name: group.to_string(),
            service_name: service.service_name.clone(),
            spec_hash: hash.to_string(),
            status,
            ports,
            started_at,
        })
    }
}
