//! HTTP boundary consumed by the management UI.

use crate::auth::{Principal, SessionStore, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{DumontError, Result};
use crate::query::ContainerQueryService;
use crate::reconciler::Reconciler;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use warp::{Filter, Rejection, Reply};

pub mod handlers;

pub use handlers::{ErrorBody, status_for};

/// Largest accepted request body; group YAML is the biggest payload
const MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub query: ContainerQueryService,
    pub sessions: Arc<SessionStore>,
}

pub(crate) fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Resolve the bearer token to a principal or reject with `Unauthorized`
fn authorized(validator: Arc<dyn TokenValidator>) -> impl Filter<Extract = (Principal,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let validator = validator.clone();
        async move {
            header
                .as_deref()
                .and_then(bearer_token)
                .and_then(|token| validator.validate(token))
                .ok_or_else(|| warp::reject::custom(DumontError::Unauthorized))
        }
    })
}

/// Every API route, with rejections already turned into JSON error bodies
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let validator: Arc<dyn TokenValidator> = state.sessions.clone();
    let auth = authorized(validator);

    let login = warp::path!("login")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::login);

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state(state.clone()))
        .and_then(handlers::logout);

    let save_and_deploy = warp::path!("saveAndDeployGroup")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::save_and_deploy);

    let container_list = warp::path!("getContainerList")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::container_list);

    let stop_container = warp::path!("stopContainer")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::stop_container);

    let delete_container = warp::path!("deleteContainer")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::delete_container);

    let edit_container = warp::path!("editContainer")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::edit_container);

    let group_list = warp::path!("getGroupList")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::group_list);

    let group_detail = warp::path!("getGroup")
        .and(warp::get())
        .and(auth.clone())
        .and(warp::query::<handlers::GroupQuery>())
        .and(with_state(state.clone()))
        .and_then(handlers::group_detail);

    let delete_group = warp::path!("deleteGroup")
        .and(warp::post())
        .and(auth)
        .and(json_body())
        .and(with_state(state))
        .and_then(handlers::delete_group);

    login
        .or(logout)
        .or(save_and_deploy)
        .or(container_list)
        .or(stop_container)
        .or(delete_container)
        .or(edit_container)
        .or(group_list)
        .or(group_detail)
        .or(delete_group)
        .recover(handlers::handle_rejection)
}

pub struct ApiServer {
    state: AppState,
    bind_address: String,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    pub fn new(state: AppState, config: &ServerConfig) -> Self {
        Self {
            state,
            bind_address: config.bind_address.clone(),
            port: config.port,
            static_dir: config.static_dir.clone(),
        }
    }

    pub fn address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| DumontError::InvalidRequest {
            reason: format!("invalid bind address '{}': {}", self.bind_address, e),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let cors = warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["authorization", "content-type"])
            .allow_methods(vec!["GET", "POST"]);
        let api = routes(self.state);

        info!("🌐 Dumont API listening on http://{}", addr);
        match self.static_dir {
            Some(dir) => {
                info!("📂 Serving UI assets from {:?}", dir);
                let site = warp::get().and(warp::fs::dir(dir)).or(api);
                warp::serve(site.with(cors).with(warp::log("dumont::http")))
                    .run(addr)
                    .await;
            }
            None => {
                warp::serve(api.with(cors).with(warp::log("dumont::http")))
                    .run(addr)
                    .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn test_address() {
        let state = crate::Dumont::with_parts(
            crate::DumontConfig::default(),
            Arc::new(crate::runtime::MemoryRuntime::new()),
            Arc::new(crate::registry::GroupRegistry::ephemeral()),
        )
        .app_state();
        let config = ServerConfig {
            bind_address: "::1".to_string(),
            port: 3322,
            static_dir: None,
        };
        let server = ApiServer::new(state.clone(), &config);
        assert_eq!(server.address().unwrap().to_string(), "[::1]:3322");

        let config = ServerConfig {
            bind_address: "localhost".to_string(),
            ..config
        };
        assert!(ApiServer::new(state, &config).address().is_err());
    }
}
