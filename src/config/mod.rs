use crate::error::ConfigError;
use crate::monitoring::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level configuration, read from `config.toml`
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DumontConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub registry: RegistryConfig,
    pub auth: AuthConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Directory with the built management UI, served at `/`
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3322,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    #[default]
    Docker,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backend: RuntimeBackend,
    pub docker_binary: String,
    /// Upper bound for a single runtime call
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::Docker,
            docker_binary: "docker".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub data_dir: PathBuf,
    /// Keep group state in memory only
    pub ephemeral: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dumont");
        Self {
            data_dir,
            ephemeral: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<UserConfig>,
    /// Long-lived bearer tokens for scripts and CI
    pub api_tokens: Vec<String>,
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            api_tokens: Vec::new(),
            session_ttl_secs: 12 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    /// Hex-encoded SHA-256 of the password
    pub password_sha256: String,
}

impl DumontConfig {
    /// Default config file location (`~/.config/dumont/config.toml` on Linux)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dumont")
            .join("config.toml")
    }

    /// Load from `path`, or from the default location when it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    debug!("No config at {:?}, using defaults", default);
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("📄 Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DumontConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be between 1 and 65535"));
        }
        if self.runtime.timeout_secs == 0 {
            return Err(invalid("runtime.timeout_secs", "must be greater than zero"));
        }
        if self.runtime.docker_binary.trim().is_empty() {
            return Err(invalid("runtime.docker_binary", "must not be empty"));
        }
        if self.auth.session_ttl_secs == 0 {
            return Err(invalid("auth.session_ttl_secs", "must be greater than zero"));
        }

        for user in &self.auth.users {
            if user.username.trim().is_empty() {
                return Err(invalid("auth.users.username", "must not be empty"));
            }
            let digest = &user.password_sha256;
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid(
                    "auth.users.password_sha256",
                    &format!("user '{}' needs a 64 character hex digest", user.username),
                ));
            }
        }

        if self.auth.api_tokens.iter().any(|t| t.trim().len() < 16) {
            return Err(invalid("auth.api_tokens", "tokens must be at least 16 characters"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
