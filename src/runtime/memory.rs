use super::{ContainerRuntime, CreateRequest, GROUP_LABEL};
use crate::error::RuntimeError;
use crate::types::{ContainerInfo, ContainerStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Start,
    Stop,
    Remove,
    Rename,
}

/// One mutating call observed by the in-memory runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOp {
    pub kind: OpKind,
    pub id: String,
    pub group: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    containers: BTreeMap<String, ContainerInfo>,
    next_id: u64,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_remove: HashSet<String>,
    list_error: Option<RuntimeError>,
    ops: Vec<RuntimeOp>,
    in_flight: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    in_flight_total: usize,
    peak_total: usize,
}

/// In-process runtime with fault injection and concurrency accounting.
///
/// Ids are allocated sequentially so listings come back in creation order.
/// Every mutating call sleeps for the configured latency while counted as
/// in flight, which lets tests observe whether calls for one group overlap.
#[derive(Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `create` fail for every request using `image`
    pub fn fail_create(&self, image: &str) {
        self.state().fail_create.insert(image.to_string());
    }

    /// Make `start` fail for every container running `image`
    pub fn fail_start(&self, image: &str) {
        self.state().fail_start.insert(image.to_string());
    }

    /// Make `stop` fail for every container running `image`
    pub fn fail_stop(&self, image: &str) {
        self.state().fail_stop.insert(image.to_string());
    }

    /// Make `remove` fail for every container running `image`
    pub fn fail_remove(&self, image: &str) {
        self.state().fail_remove.insert(image.to_string());
    }

    /// Make `list` fail until cleared with `None`
    pub fn fail_list(&self, error: Option<RuntimeError>) {
        self.state().list_error = error;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.fail_create.clear();
        state.fail_start.clear();
        state.fail_stop.clear();
        state.fail_remove.clear();
        state.list_error = None;
    }

    pub fn operations(&self) -> Vec<RuntimeOp> {
        self.state().ops.clone()
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.state().containers.get(id).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Highest number of simultaneous mutating calls seen for one group
    pub fn peak_concurrency(&self, group: &str) -> usize {
        self.state().peak.get(group).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous mutating calls seen overall
    pub fn peak_total_concurrency(&self) -> usize {
        self.state().peak_total
    }

    fn group_of(&self, id: &str) -> Option<String> {
        self.state()
            .containers
            .get(id)
            .and_then(|c| c.label(GROUP_LABEL).map(str::to_string))
    }

    async fn track<T>(
        &self,
        kind: OpKind,
        group: Option<String>,
        apply: impl FnOnce(&mut MemoryState) -> Result<(String, T), RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let key = group.clone().unwrap_or_default();
        {
            let mut state = self.state();
            let in_flight = state.in_flight.entry(key.clone()).or_insert(0);
            *in_flight += 1;
            let current = *in_flight;
            let peak = state.peak.entry(key.clone()).or_insert(0);
            *peak = (*peak).max(current);
            state.in_flight_total += 1;
            state.peak_total = state.peak_total.max(state.in_flight_total);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        } else {
            tokio::task::yield_now().await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.in_flight.get_mut(&key) {
            *in_flight -= 1;
        }
        state.in_flight_total -= 1;

        let (id, value) = apply(&mut *state)?;
        debug!("memory runtime {:?} {}", kind, id);
        state.ops.push(RuntimeOp { kind, id, group });
        Ok(value)
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let state = self.state();
        if let Some(error) = &state.list_error {
            return Err(error.clone());
        }
        Ok(state.containers.values().cloned().collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        self.container(id)
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let request = request.clone();
        self.track(OpKind::Create, request.group().map(str::to_string), move |state| {
            if state.fail_create.contains(&request.image) {
                return Err(RuntimeError::failed(
                    "create",
                    format!("unable to find image '{}'", request.image),
                ));
            }
            if state.containers.values().any(|c| c.name == request.name) {
                return Err(RuntimeError::failed(
                    "create",
                    format!("container name \"{}\" is already in use", request.name),
                ));
            }

            state.next_id += 1;
            let id = format!("mem-{:06}", state.next_id);
            state.containers.insert(
                id.clone(),
                ContainerInfo {
                    id: id.clone(),
                    name: request.name.clone(),
                    image: request.image.clone(),
                    status: ContainerStatus::Stopped,
                    ports: request.ports.iter().map(|p| p.to_binding()).collect(),
                    labels: request.labels.clone(),
                    started_at: None,
                },
            );
            Ok((id.clone(), id))
        })
        .await
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let id = id.to_string();
        self.track(OpKind::Start, self.group_of(&id), move |state| {
            let failing = match state.containers.get(&id) {
                Some(container) => state.fail_start.contains(&container.image),
                None => return Err(RuntimeError::NotFound { id }),
            };
            if failing {
                return Err(RuntimeError::failed("start", "container exited immediately"));
            }
            if let Some(container) = state.containers.get_mut(&id) {
                container.status = ContainerStatus::Running;
                container.started_at = Some(Utc::now());
            }
            Ok((id, ()))
        })
        .await
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let id = id.to_string();
        self.track(OpKind::Stop, self.group_of(&id), move |state| {
            let container = state
                .containers
                .get_mut(&id)
                .ok_or_else(|| RuntimeError::NotFound { id: id.clone() })?;
            if state.fail_stop.contains(&container.image) {
                return Err(RuntimeError::failed(
                    "stop",
                    "tried to kill container, but did not receive an exit event",
                ));
            }
            if container.status == ContainerStatus::Running {
                container.status = ContainerStatus::Exited;
            }
            Ok((id, ()))
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let id = id.to_string();
        self.track(OpKind::Remove, self.group_of(&id), move |state| {
            match state.containers.get(&id) {
                None => return Err(RuntimeError::NotFound { id }),
                Some(c) if state.fail_remove.contains(&c.image) => {
                    return Err(RuntimeError::failed("remove", "device or resource busy"));
                }
                Some(c) if c.status == ContainerStatus::Running => {
                    return Err(RuntimeError::failed(
                        "remove",
                        "cannot remove a running container, stop it first",
                    ));
                }
                Some(_) => {}
            }
            state.containers.remove(&id);
            Ok((id, ()))
        })
        .await
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let id = id.to_string();
        let new_name = new_name.to_string();
        self.track(OpKind::Rename, self.group_of(&id), move |state| {
            if !state.containers.contains_key(&id) {
                return Err(RuntimeError::NotFound { id });
            }
            if state
                .containers
                .values()
                .any(|c| c.name == new_name && c.id != id)
            {
                return Err(RuntimeError::failed(
                    "rename",
                    format!("container name \"{}\" is already in use", new_name),
                ));
            }
            if let Some(container) = state.containers.get_mut(&id) {
                container.name = new_name;
            }
            Ok((id, ()))
        })
        .await
    }
}
