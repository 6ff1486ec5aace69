use super::AppState;
use crate::auth::Principal;
use crate::error::{DeployError, DumontError, RegistryError, Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

impl warp::reject::Reject for DumontError {}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveGroupRequest {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ContainerRequest {
    pub container_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub container_id: String,
    pub new_container_name: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
struct ContainerAck<'a> {
    container_id: &'a str,
    action: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// HTTP status for an error surfaced at the boundary
pub fn status_for(err: &DumontError) -> StatusCode {
    match err {
        DumontError::Parse(_)
        | DumontError::InvalidRequest { .. }
        | DumontError::Registry(RegistryError::Parse(_))
        | DumontError::Deploy(DeployError::InvalidSpec(_)) => StatusCode::BAD_REQUEST,
        DumontError::Unauthorized => StatusCode::UNAUTHORIZED,
        DumontError::GroupNotFound { .. } => StatusCode::NOT_FOUND,
        DumontError::Deploy(DeployError::RuntimeUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        DumontError::Runtime(RuntimeError::NotFound { .. }) => StatusCode::NOT_FOUND,
        DumontError::Runtime(RuntimeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_reply(err: &DumontError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    let body = ErrorBody {
        kind: err.kind().to_string(),
        message: err.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(value) => warp::reply::json(&value).into_response(),
        Err(e) => error_reply(&e),
    }
}

pub async fn login(body: LoginRequest, state: AppState) -> std::result::Result<Response, Rejection> {
    Ok(match state.sessions.login(&body.username, &body.password) {
        Ok(token) => warp::reply::with_status(token, StatusCode::OK).into_response(),
        Err(e) => error_reply(&e),
    })
}

pub async fn logout(token: Option<String>, state: AppState) -> std::result::Result<Response, Rejection> {
    if let Some(token) = token.as_deref().and_then(super::bearer_token) {
        state.sessions.logout(token);
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn save_and_deploy(
    principal: Principal,
    body: SaveGroupRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Ok(error_reply(&DumontError::InvalidRequest {
            reason: "group name must not be empty".to_string(),
        }));
    }
    info!("📦 {} saving group '{}'", principal, name);

    // Runs to completion even if the client disconnects.
    let reconciler = state.reconciler.clone();
    let task = tokio::spawn(async move { reconciler.save_and_deploy(&name, &body.text).await });
    let result = match task.await {
        Ok(outcome) => outcome.map_err(DumontError::from),
        Err(e) => Err(DumontError::from(e)),
    };
    Ok(respond(result))
}

pub async fn container_list(_principal: Principal, state: AppState) -> std::result::Result<Response, Rejection> {
    Ok(respond(state.query.list().await))
}

pub async fn stop_container(
    principal: Principal,
    body: ContainerRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    info!("{} stopping container {}", principal, body.container_id);
    let result = state.query.stop(&body.container_id).await.map(|()| ContainerAck {
        container_id: &body.container_id,
        action: "stopped",
    });
    Ok(respond(result))
}

pub async fn delete_container(
    principal: Principal,
    body: ContainerRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    info!("{} deleting container {}", principal, body.container_id);
    let result = state.query.delete(&body.container_id).await.map(|()| ContainerAck {
        container_id: &body.container_id,
        action: "deleted",
    });
    Ok(respond(result))
}

pub async fn edit_container(
    principal: Principal,
    body: RenameRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    info!(
        "{} renaming container {} to {}",
        principal, body.container_id, body.new_container_name
    );
    let result = state
        .query
        .rename(&body.container_id, &body.new_container_name)
        .await
        .map(|()| ContainerAck {
            container_id: &body.container_id,
            action: "renamed",
        });
    Ok(respond(result))
}

pub async fn group_list(_principal: Principal, state: AppState) -> std::result::Result<Response, Rejection> {
    let groups = state.reconciler.registry().groups().await;
    Ok(warp::reply::json(&groups).into_response())
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub name: String,
}

pub async fn group_detail(
    _principal: Principal,
    query: GroupQuery,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let entry = state.reconciler.registry().entry(&query.name).await;
    Ok(respond(entry.ok_or(DumontError::GroupNotFound { name: query.name })))
}

pub async fn delete_group(
    principal: Principal,
    body: GroupRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    info!("🧹 {} deleting group '{}'", principal, body.name);
    let reconciler = state.reconciler.clone();
    let name = body.name.clone();
    let task = tokio::spawn(async move { reconciler.teardown(&name).await });
    let result = match task.await {
        Ok(Ok(Some(report))) => Ok(report),
        Ok(Ok(None)) => Err(DumontError::GroupNotFound { name: body.name }),
        Ok(Err(e)) => Err(DumontError::from(e)),
        Err(e) => Err(DumontError::from(e)),
    };
    Ok(respond(result))
}

/// Turn rejections that escaped the handlers into the JSON error body
pub async fn handle_rejection(rejection: Rejection) -> std::result::Result<Response, Infallible> {
    if let Some(err) = rejection.find::<DumontError>() {
        return Ok(error_reply(err));
    }

    let (status, kind, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "RouteNotFound", "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "InvalidRequest", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "InvalidRequest", e.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "InvalidRequest", "request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal", format!("{:?}", rejection))
    };

    let body = ErrorBody {
        kind: kind.to_string(),
        message,
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}
