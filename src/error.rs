use serde::Serialize;
use thiserror::Error;

/// Top-level error for Dumont operations
#[derive(Error, Debug)]
pub enum DumontError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Spec parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Group not found: {name}")]
    GroupNotFound { name: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DumontError {
    /// Stable, machine-readable name of the failure
    pub fn kind(&self) -> &'static str {
        match self {
            DumontError::Config(_) => "ConfigError",
            DumontError::Parse(e) => e.kind(),
            DumontError::Deploy(e) => e.kind(),
            DumontError::Runtime(e) => e.kind(),
            DumontError::Registry(e) => e.kind(),
            DumontError::Unauthorized => "Unauthorized",
            DumontError::GroupNotFound { .. } => "GroupNotFound",
            DumontError::InvalidRequest { .. } => "InvalidRequest",
            DumontError::Io(_) => "Io",
            DumontError::Json(_) => "Json",
            DumontError::Task(_) => "TaskFailed",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Rejections produced while turning group YAML into container specs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed YAML: {reason}")]
    MalformedYaml { reason: String },

    #[error("Service '{service}' does not specify an image")]
    MissingImage { service: String },

    #[error("Service '{service}' has invalid port '{port}': {reason}")]
    InvalidPortSyntax {
        service: String,
        port: String,
        reason: String,
    },

    #[error("Service '{service}' has unsupported restart policy '{policy}'")]
    InvalidRestartPolicy { service: String, policy: String },
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MalformedYaml { .. } => "MalformedYAML",
            ParseError::MissingImage { .. } => "MissingImage",
            ParseError::InvalidPortSyntax { .. } => "InvalidPortSyntax",
            ParseError::InvalidRestartPolicy { .. } => "InvalidRestartPolicy",
        }
    }
}

/// Failures reported by a container runtime adapter
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum RuntimeError {
    #[error("Container not found: {id}")]
    NotFound { id: String },

    #[error("Runtime {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Runtime {operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
}

impl RuntimeError {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::NotFound { .. } => "NotFound",
            RuntimeError::OperationFailed { .. } => "OperationFailed",
            RuntimeError::Timeout { .. } => "Timeout",
        }
    }

    pub fn failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        RuntimeError::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Registry store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Parse(e) => e.kind(),
            RegistryError::Unavailable { .. } => "RegistryUnavailable",
        }
    }

    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        RegistryError::Unavailable {
            reason: reason.to_string(),
        }
    }
}

/// Whole-call deploy failures; per-service failures live in the report
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid group spec: {0}")]
    InvalidSpec(#[from] ParseError),

    #[error("Group registry unavailable: {reason}")]
    RegistryUnavailable { reason: String },

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(RuntimeError),
}

impl DeployError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::InvalidSpec(e) => e.kind(),
            DeployError::RegistryUnavailable { .. } => "RegistryUnavailable",
            DeployError::RuntimeUnavailable(_) => "RuntimeUnavailable",
        }
    }
}

impl From<RegistryError> for DeployError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Parse(e) => DeployError::InvalidSpec(e),
            RegistryError::Unavailable { reason } => DeployError::RegistryUnavailable { reason },
        }
    }
}

/// Convenience type alias for Dumont results
pub type Result<T, E = DumontError> = std::result::Result<T, E>;
