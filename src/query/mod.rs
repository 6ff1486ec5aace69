//! Read path over live runtime state, plus single-container mutations.
//!
//! Nothing here touches the group registry. A container stopped, removed or
//! renamed through this service is reconciled back on its group's next deploy.

use crate::error::{DumontError, Result, RuntimeError};
use crate::runtime::{ContainerRuntime, GROUP_LABEL, SERVICE_LABEL};
use crate::types::{ContainerInfo, ContainerStatus, ContainerView};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

impl From<ContainerInfo> for ContainerView {
    fn from(info: ContainerInfo) -> Self {
        Self {
            group: info.label(GROUP_LABEL).map(str::to_string),
            service: info.label(SERVICE_LABEL).map(str::to_string),
            ports: info.ports.iter().map(|p| p.display()).collect(),
            id: info.id,
            name: info.name,
            image: info.image,
            status: info.status,
            started_at: info.started_at,
        }
    }
}

/// Names docker accepts for containers
static CONTAINER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("Invalid container name regex"));

/// Check a user-supplied container name against docker's naming rules
pub fn validate_container_name(name: &str) -> Result<()> {
    if CONTAINER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DumontError::InvalidRequest {
            reason: format!("invalid container name '{}'", name),
        })
    }
}

#[derive(Clone)]
pub struct ContainerQueryService {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerQueryService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Every container the runtime knows about, fetched fresh on each call
    pub async fn list(&self) -> Result<Vec<ContainerView>> {
        let containers = self.runtime.list().await?;
        debug!("Listed {} containers via {}", containers.len(), self.runtime.name());
        Ok(containers.into_iter().map(ContainerView::from).collect())
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.runtime.stop(id).await?;
        info!("⏹️  Stopped container {}", id);
        Ok(())
    }

    /// Stop the container if it is running, then remove it
    pub async fn delete(&self, id: &str) -> Result<()> {
        let info = self.runtime.inspect(id).await?;
        if info.status == ContainerStatus::Running {
            self.runtime.stop(id).await?;
        }
        match self.runtime.remove(id).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound { .. }) if info.status == ContainerStatus::Running => {
                debug!("Container {} vanished after stop", id);
            }
            Err(e) => return Err(e.into()),
        }
        info!("🗑️  Deleted container {}", id);
        Ok(())
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        validate_container_name(new_name)?;
        self.runtime.rename(id, new_name).await?;
        info!("✏️  Renamed container {} to {}", id, new_name);
        Ok(())
    }
}
