use crate::types::{PortBinding, Protocol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "no" | "" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "on-failure" => Some(RestartPolicy::OnFailure),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            _ => None,
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[IP:]HOST:CONTAINER[/PROTO]` from a service's `ports` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Argument form accepted by `docker create -p`
    pub fn publish_arg(&self) -> String {
        let mut arg = match &self.host_ip {
            Some(ip) if ip.contains(':') => format!("[{}]:{}:{}", ip, self.host_port, self.container_port),
            Some(ip) => format!("{}:{}:{}", ip, self.host_port, self.container_port),
            None => format!("{}:{}", self.host_port, self.container_port),
        };
        if self.protocol != Protocol::Tcp {
            arg.push('/');
            arg.push_str(self.protocol.as_str());
        }
        arg
    }

    pub fn to_binding(&self) -> PortBinding {
        PortBinding {
            host_ip: self
                .host_ip
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            host_port: self.host_port,
            container_port: self.container_port,
            protocol: self.protocol,
        }
    }
}

/// Desired state of one service in a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub service_name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub restart_policy: RestartPolicy,
    pub env: BTreeMap<String, String>,
}

/// Fields that participate in the spec hash; the service name does not.
#[derive(Serialize)]
struct HashInput<'a> {
    image: &'a str,
    ports: &'a [PortMapping],
    restart: RestartPolicy,
    env: &'a BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Content fingerprint over image, ports, restart policy and env.
    pub fn spec_hash(&self) -> String {
        let input = HashInput {
            image: &self.image,
            ports: &self.ports,
            restart: self.restart_policy,
            env: &self.env,
        };
        // Serializing plain structs and BTreeMaps cannot fail.
        let canonical = serde_json::to_vec(&input).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn env_args(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Output of the parser, before a name and version are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGroup {
    pub compose_version: Option<String>,
    pub services: Vec<ContainerSpec>,
}

/// A named, versioned group spec as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub raw_text: String,
    pub compose_version: Option<String>,
    pub services: Vec<ContainerSpec>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl GroupSpec {
    pub fn from_parsed(name: &str, raw_text: &str, parsed: ParsedGroup, version: u64) -> Self {
        Self {
            name: name.to_string(),
            raw_text: raw_text.to_string(),
            compose_version: parsed.compose_version,
            services: parsed.services,
            version,
            updated_at: Utc::now(),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ContainerSpec> {
        self.services.iter().find(|s| s.service_name == name)
    }
}
