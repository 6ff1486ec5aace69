//! Bearer-token authentication for the HTTP boundary.
//!
//! `/login` exchanges a configured username and password for an opaque
//! session token. Static API tokens from configuration are accepted as well.

use crate::config::AuthConfig;
use crate::error::{DumontError, Result};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Who a token belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(String),
    ApiToken,
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User(name) => write!(f, "user '{}'", name),
            Principal::ApiToken => f.write_str("api token"),
        }
    }
}

pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<Principal>;
}

/// Hex-encoded SHA-256, the format of `auth.users.password_sha256`
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Ten years; keeps expiry arithmetic in range
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

struct Session {
    username: String,
    expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    users: HashMap<String, String>,
    api_tokens: HashSet<String>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(config: &AuthConfig) -> Self {
        if config.users.is_empty() && config.api_tokens.is_empty() {
            warn!("No users or API tokens configured; every request will be rejected");
        }
        Self {
            users: config
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password_sha256.to_ascii_lowercase()))
                .collect(),
            api_tokens: config.api_tokens.iter().cloned().collect(),
            ttl: Duration::seconds(config.session_ttl_secs.min(MAX_TTL_SECS) as i64),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check credentials and issue a session token
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let expected = self.users.get(username).ok_or(DumontError::Unauthorized)?;
        if !constant_time_eq(expected.as_bytes(), hash_password(password).as_bytes()) {
            warn!("Failed login for '{}'", username);
            return Err(DumontError::Unauthorized);
        }

        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let mut sessions = self.sessions();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                expires_at: now + self.ttl,
            },
        );
        info!("🔑 '{}' logged in ({} active sessions)", username, sessions.len());
        Ok(token)
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions().remove(token).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        let now = Utc::now();
        self.sessions().values().filter(|s| s.expires_at > now).count()
    }

    #[cfg(test)]
    fn expire_all(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for session in self.sessions().values_mut() {
            session.expires_at = past;
        }
    }
}

impl TokenValidator for SessionStore {
    fn validate(&self, token: &str) -> Option<Principal> {
        if self
            .api_tokens
            .iter()
            .any(|t| constant_time_eq(t.as_bytes(), token.as_bytes()))
        {
            return Some(Principal::ApiToken);
        }

        let mut sessions = self.sessions();
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Some(Principal::User(session.username.clone())),
            Some(_) => {
                debug!("Session token expired");
                sessions.remove(token);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn store() -> SessionStore {
        SessionStore::new(&AuthConfig {
            users: vec![UserConfig {
                username: "admin".to_string(),
                password_sha256: hash_password("admin"),
            }],
            api_tokens: vec!["ci-token-0123456789".to_string()],
            session_ttl_secs: 60,
        })
    }

    #[test]
    fn test_hash_password() {
        assert_eq!(
            hash_password("admin"),
            "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
        );
    }

    #[test]
    fn test_login_issues_valid_token() {
        let store = store();
        let token = store.login("admin", "admin").unwrap();
        assert_eq!(store.validate(&token), Some(Principal::User("admin".to_string())));
        assert_eq!(store.active_sessions(), 1);
    }

    #[test]
    fn test_bad_credentials() {
        let store = store();
        assert!(matches!(store.login("admin", "wrong"), Err(DumontError::Unauthorized)));
        assert!(matches!(store.login("root", "admin"), Err(DumontError::Unauthorized)));
    }

    #[test]
    fn test_unknown_and_expired_tokens() {
        let store = store();
        assert_eq!(store.validate("nope"), None);

        let token = store.login("admin", "admin").unwrap();
        store.expire_all();
        assert_eq!(store.validate(&token), None);
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn test_api_token_and_logout() {
        let store = store();
        assert_eq!(store.validate("ci-token-0123456789"), Some(Principal::ApiToken));

        let token = store.login("admin", "admin").unwrap();
        assert!(store.logout(&token));
        assert_eq!(store.validate(&token), None);
    }
}
