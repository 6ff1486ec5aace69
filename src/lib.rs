//! Dumont - group deploy engine for a lightweight container management UI
//!
//! Takes a compose-style YAML document for a named group, diffs it against the
//! containers the runtime reports, and converges the runtime to it. Groups are
//! reconciled under per-group locks, so concurrent deploys of one group are
//! serialized while different groups proceed in parallel.

pub mod auth;
pub mod compose;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod query;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod types;

pub use config::DumontConfig;
pub use error::{DumontError, Result};
pub use types::{ContainerInfo, ContainerStatus, ContainerView};

use auth::SessionStore;
use query::ContainerQueryService;
use reconciler::{DeployReport, Reconciler};
use registry::{GroupEntry, GroupRegistry, GroupSummary};
use runtime::ContainerRuntime;
use server::{ApiServer, AppState};
use std::sync::Arc;

/// Re-exports for easier API usage
pub mod api {
    pub use crate::compose::{ContainerSpec, GroupSpec, PortMapping, RestartPolicy};
    pub use crate::reconciler::{Action, DeployReport, Reconciler, ServiceFailure};
    pub use crate::registry::{GroupEntry, GroupRegistry, GroupSummary, ManagedContainer};
    pub use crate::runtime::{ContainerRuntime, DockerCli, MemoryRuntime};
    pub use crate::{ContainerView, Dumont, DumontConfig};
}

/// Wired-up engine: runtime adapter, registry, reconciler and read path
#[derive(Clone)]
pub struct Dumont {
    config: DumontConfig,
    reconciler: Reconciler,
    query: ContainerQueryService,
    sessions: Arc<SessionStore>,
}

impl Dumont {
    /// Build the runtime and open the registry selected in `config`
    pub async fn from_config(config: DumontConfig) -> Result<Self> {
        let runtime = runtime::from_config(&config.runtime);
        let registry = Arc::new(GroupRegistry::from_config(&config.registry).await?);
        Ok(Self::with_parts(config, runtime, registry))
    }

    pub fn with_parts(
        config: DumontConfig,
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<GroupRegistry>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(&config.auth));
        Self {
            reconciler: Reconciler::new(runtime.clone(), registry),
            query: ContainerQueryService::new(runtime),
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &DumontConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn query(&self) -> &ContainerQueryService {
        &self.query
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Store `raw_text` as the next version of group `name` and deploy it
    pub async fn save_and_deploy(&self, name: &str, raw_text: &str) -> Result<DeployReport> {
        Ok(self.reconciler.save_and_deploy(name, raw_text).await?)
    }

    /// Remove every container of the group and forget it
    pub async fn teardown(&self, name: &str) -> Result<DeployReport> {
        self.reconciler
            .teardown(name)
            .await?
            .ok_or_else(|| DumontError::GroupNotFound {
                name: name.to_string(),
            })
    }

    pub async fn containers(&self) -> Result<Vec<ContainerView>> {
        self.query.list().await
    }

    pub async fn groups(&self) -> Vec<GroupSummary> {
        self.reconciler.registry().groups().await
    }

    pub async fn group(&self, name: &str) -> Result<GroupEntry> {
        self.reconciler
            .registry()
            .entry(name)
            .await
            .ok_or_else(|| DumontError::GroupNotFound {
                name: name.to_string(),
            })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            reconciler: self.reconciler.clone(),
            query: self.query.clone(),
            sessions: self.sessions.clone(),
        }
    }

    /// Serve the HTTP API until the process is stopped
    pub async fn serve(self) -> Result<()> {
        ApiServer::new(self.app_state(), &self.config.server).run().await
    }
}
