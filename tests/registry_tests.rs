use dumont::reconciler::Reconciler;
use dumont::registry::{GroupRegistry, JsonFileStore, RegistryStore};
use dumont::runtime::MemoryRuntime;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const SHOP: &str = "services:\n  web:\n    image: nginx:latest\n    ports: [\"3223:80\"]\n  db:\n    image: postgres:16\n    environment:\n      POSTGRES_PASSWORD: secret\n";

async fn open(dir: &TempDir) -> Arc<GroupRegistry> {
    let store: Arc<dyn RegistryStore> = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    Arc::new(GroupRegistry::open(store).await.unwrap())
}

#[tokio::test]
async fn test_registry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(MemoryRuntime::new());

    let report = {
        let registry = open(&dir).await;
        let reconciler = Reconciler::new(runtime.clone(), registry);
        reconciler.save_and_deploy("New Container Group", SHOP).await.unwrap();
        reconciler.save_and_deploy("New Container Group", SHOP).await.unwrap()
    };
    assert_eq!(report.version, 2);

    let reopened = open(&dir).await;
    let entry = reopened.entry("New Container Group").await.unwrap();
    assert_eq!(entry.spec.version, 2);
    assert_eq!(entry.spec.raw_text, SHOP);
    assert_eq!(entry.spec.services.len(), 2);
    assert_eq!(entry.managed.len(), 2);

    // A deploy after restart sees the same containers and does nothing.
    let reconciler = Reconciler::new(runtime.clone(), reopened.clone());
    let report = reconciler.save_and_deploy("New Container Group", SHOP).await.unwrap();
    assert_eq!(report.version, 3);
    assert_eq!(report.unchanged.len(), 2);
    assert_eq!(runtime.container_count(), 2);
}

#[tokio::test]
async fn test_group_files_are_written_atomically() {
    let dir = TempDir::new().unwrap();
    let registry = open(&dir).await;
    {
        let lock = registry.lock("shop").await;
        registry.upsert(&lock, SHOP).await.unwrap();
    }
    {
        let lock = registry.lock("blog").await;
        registry.upsert(&lock, "services: {}").await.unwrap();
    }

    let files: Vec<String> = std::fs::read_dir(dir.path().join("groups"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files.len(), 2, "no temp files left behind: {:?}", files);
    assert!(files.iter().all(|f| f.ends_with(".json")));
}

#[tokio::test]
async fn test_teardown_deletes_group_file() {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(MemoryRuntime::new());
    let reconciler = Reconciler::new(runtime, open(&dir).await);

    reconciler.save_and_deploy("shop", SHOP).await.unwrap();
    reconciler.teardown("shop").await.unwrap().unwrap();

    let reopened = open(&dir).await;
    assert!(reopened.groups().await.is_empty());
}

#[tokio::test]
async fn test_corrupt_group_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    {
        let registry = open(&dir).await;
        let lock = registry.lock("shop").await;
        registry.upsert(&lock, SHOP).await.unwrap();
    }
    std::fs::write(dir.path().join("groups").join("garbage.json"), b"{not json").unwrap();

    let reopened = open(&dir).await;
    let groups = reopened.groups().await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "shop");
    assert_eq!(groups[0].services, 2);
}
