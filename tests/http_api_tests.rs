use dumont::auth::hash_password;
use dumont::config::{AuthConfig, UserConfig};
use dumont::error::RuntimeError;
use dumont::registry::{GroupRegistry, MemoryStore};
use dumont::runtime::MemoryRuntime;
use dumont::server::{ErrorBody, routes};
use dumont::{Dumont, DumontConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;

const API_TOKEN: &str = "test-api-token-0123456789";
const SHOP: &str = "services:\n  web:\n    image: nginx:latest\n    ports:\n      - \"3223:80\"\n";

fn app() -> (Arc<MemoryRuntime>, Dumont) {
    let runtime = Arc::new(MemoryRuntime::new());
    let dumont = Dumont::with_parts(config(), runtime.clone(), Arc::new(GroupRegistry::ephemeral()));
    (runtime, dumont)
}

async fn app_with_store() -> (Arc<MemoryRuntime>, Arc<MemoryStore>, Dumont) {
    let store = Arc::new(MemoryStore::new());
    let registry = GroupRegistry::open(store.clone()).await.unwrap();
    let runtime = Arc::new(MemoryRuntime::new());
    let dumont = Dumont::with_parts(config(), runtime.clone(), Arc::new(registry));
    (runtime, store, dumont)
}

fn config() -> DumontConfig {
    let mut config = DumontConfig::default();
    config.auth = AuthConfig {
        users: vec![UserConfig {
            username: "admin".to_string(),
            password_sha256: hash_password("admin"),
        }],
        api_tokens: vec![API_TOKEN.to_string()],
        session_ttl_secs: 3600,
    };
    config
}

fn bearer() -> String {
    format!("Bearer {}", API_TOKEN)
}

fn error_kind(body: &Bytes) -> String {
    serde_json::from_slice::<ErrorBody>(body).unwrap().kind
}

#[tokio::test]
async fn test_login_flow() {
    let (_, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request()
        .method("POST")
        .path("/login")
        .json(&json!({"username": "admin", "password": "admin"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = String::from_utf8(resp.body().to_vec()).unwrap();
    assert!(!token.is_empty());

    let resp = warp::test::request()
        .path("/getContainerList")
        .header("authorization", format!("Bearer {}", token))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = warp::test::request()
        .method("POST")
        .path("/logout")
        .header("authorization", format!("Bearer {}", token))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = warp::test::request()
        .path("/getContainerList")
        .header("authorization", format!("Bearer {}", token))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_credentials_and_missing_token() {
    let (_, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request()
        .method("POST")
        .path("/login")
        .json(&json!({"username": "admin", "password": "nope"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(resp.body()), "Unauthorized");

    let resp = warp::test::request().path("/getContainerList").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", "Bearer forged")
        .json(&json!({"name": "shop", "text": SHOP}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_save_and_deploy_then_list() {
    let (_, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "New Container Group", "text": SHOP}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(report["group"], "New Container Group");
    assert_eq!(report["version"], 1);
    assert_eq!(report["created"][0]["service"], "web");

    let resp = warp::test::request()
        .path("/getContainerList")
        .header("authorization", bearer())
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let views: Value = serde_json::from_slice(resp.body()).unwrap();
    assert!(views[0]["name"].as_str().unwrap().starts_with("new-container-group_web_"));
    assert_eq!(views[0]["status"], "running");
    assert_eq!(views[0]["ports"][0], "0.0.0.0:3223->80/tcp");
    assert_eq!(views[0]["group"], "New Container Group");

    let resp = warp::test::request()
        .path("/getGroup?name=New%20Container%20Group")
        .header("authorization", bearer())
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let entry: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(entry["spec"]["version"], 1);
    assert_eq!(entry["managed"].as_array().map(Vec::len), Some(1));

    let resp = warp::test::request()
        .path("/getGroupList")
        .header("authorization", bearer())
        .reply(&api)
        .await;
    let groups: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(groups[0]["name"], "New Container Group");
}

#[tokio::test]
async fn test_save_and_deploy_rejections() {
    let (runtime, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop", "text": "services:\n  web:\n    ports: [\"80:80\"]\n"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(resp.body()), "MissingImage");

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "  ", "text": SHOP}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(resp.body()), "InvalidRequest");

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    runtime.fail_list(Some(RuntimeError::failed("ps", "Cannot connect to the Docker daemon")));
    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop", "text": SHOP}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_kind(resp.body()), "RuntimeUnavailable");
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_partial_failure_is_still_ok() {
    let (runtime, dumont) = app();
    let api = routes(dumont.app_state());
    runtime.fail_create("ghost:latest");

    let text = format!("{}  ghost:\n    image: ghost:latest\n", SHOP);
    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop", "text": text}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(report["failed"][0]["service"], "ghost");
    assert_eq!(report["failed"][0]["action"], "create");
    assert_eq!(report["failed"][0]["error"]["kind"], "OperationFailed");
}

#[tokio::test]
async fn test_container_operations() {
    let (runtime, dumont) = app();
    let api = routes(dumont.app_state());
    let report = dumont.save_and_deploy("shop", SHOP).await.unwrap();
    let id = report.created[0].runtime_id.clone();

    let resp = warp::test::request()
        .method("POST")
        .path("/editContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": id, "new_container_name": "not valid!"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request()
        .method("POST")
        .path("/editContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": id, "new_container_name": "storefront"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(runtime.container(&id).unwrap().name, "storefront");

    let resp = warp::test::request()
        .method("POST")
        .path("/stopContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": "does-not-exist"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_kind(resp.body()), "NotFound");

    let resp = warp::test::request()
        .method("POST")
        .path("/deleteContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": id}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(runtime.container(&id).is_none());
}

#[tokio::test]
async fn test_group_lookup_and_delete() {
    let (runtime, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request()
        .path("/getGroup?name=shop")
        .header("authorization", bearer())
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_kind(resp.body()), "GroupNotFound");

    dumont.save_and_deploy("shop", SHOP).await.unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/deleteGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(runtime.container_count(), 0);

    let resp = warp::test::request()
        .method("POST")
        .path("/deleteGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route() {
    let (_, dumont) = app();
    let api = routes(dumont.app_state());

    let resp = warp::test::request().path("/cloneRepo").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_kind(resp.body()), "RouteNotFound");
}

#[tokio::test]
async fn test_registry_outage_is_a_server_error() {
    let (runtime, store, dumont) = app_with_store().await;
    let api = routes(dumont.app_state());
    store.set_unavailable(true);

    let resp = warp::test::request()
        .method("POST")
        .path("/saveAndDeployGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop", "text": SHOP}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_kind(resp.body()), "RegistryUnavailable");
    assert_eq!(runtime.container_count(), 0);

    // Teardown removes the containers but cannot forget the group.
    store.set_unavailable(false);
    dumont.save_and_deploy("shop", SHOP).await.unwrap();
    store.set_unavailable(true);
    let resp = warp::test::request()
        .method("POST")
        .path("/deleteGroup")
        .header("authorization", bearer())
        .json(&json!({"name": "shop"}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_kind(resp.body()), "RegistryUnavailable");
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_runtime_failures_on_container_operations() {
    let (runtime, dumont) = app();
    let api = routes(dumont.app_state());
    let report = dumont.save_and_deploy("shop", SHOP).await.unwrap();
    let id = report.created[0].runtime_id.clone();

    runtime.fail_stop("nginx:latest");
    let resp = warp::test::request()
        .method("POST")
        .path("/stopContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": id}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_kind(resp.body()), "OperationFailed");

    runtime.clear_faults();
    runtime.fail_remove("nginx:latest");
    let resp = warp::test::request()
        .method("POST")
        .path("/deleteContainer")
        .header("authorization", bearer())
        .json(&json!({"container_id": id}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_kind(resp.body()), "OperationFailed");
    assert!(runtime.container(&id).is_some());
}
