use crate::compose::GroupSpec;
use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Replace,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Replace => "replace",
            Action::Remove => "remove",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub runtime_id: String,
    /// Container that was replaced, for `replaced` entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    pub service: String,
    pub action: Action,
    pub error: RuntimeError,
}

/// Per-service result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DeployReport {
    pub group: String,
    pub version: u64,
    pub created: Vec<ServiceOutcome>,
    pub replaced: Vec<ServiceOutcome>,
    pub removed: Vec<ServiceOutcome>,
    pub unchanged: Vec<ServiceOutcome>,
    pub failed: Vec<ServiceFailure>,
}

impl DeployReport {
    pub fn new(spec: &GroupSpec) -> Self {
        Self {
            group: spec.name.clone(),
            version: spec.version,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, bucket: Bucket, service: &str, runtime_id: &str, previous: Option<&str>) {
        let outcome = ServiceOutcome {
            service: service.to_string(),
            runtime_id: runtime_id.to_string(),
            previous_id: previous.map(str::to_string),
        };
        match bucket {
            Bucket::Created => self.created.push(outcome),
            Bucket::Replaced => self.replaced.push(outcome),
            Bucket::Removed => self.removed.push(outcome),
            Bucket::Unchanged => self.unchanged.push(outcome),
        }
    }

    pub(crate) fn fail(&mut self, service: &str, action: Action, error: RuntimeError) {
        self.failed.push(ServiceFailure {
            service: service.to_string(),
            action,
            error,
        });
    }

    pub fn services(bucket: &[ServiceOutcome]) -> Vec<&str> {
        bucket.iter().map(|o| o.service.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Bucket {
    Created,
    Replaced,
    Removed,
    Unchanged,
}

impl fmt::Display for DeployReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group '{}' v{}: {} created, {} replaced, {} removed, {} unchanged, {} failed",
            self.group,
            self.version,
            self.created.len(),
            self.replaced.len(),
            self.removed.len(),
            self.unchanged.len(),
            self.failed.len()
        )
    }
}
