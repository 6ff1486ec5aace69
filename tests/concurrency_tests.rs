use dumont::reconciler::Reconciler;
use dumont::registry::GroupRegistry;
use dumont::runtime::{ContainerRuntime, GROUP_LABEL, MemoryRuntime, SERVICE_LABEL};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn spec(image_tag: usize) -> String {
    format!(
        "services:\n  web:\n    image: nginx:1.{}\n    ports: [\"8080:80\"]\n  worker:\n    image: shop/worker:{}\n",
        image_tag, image_tag
    )
}

fn setup(latency_ms: u64) -> (Arc<MemoryRuntime>, Reconciler) {
    let runtime = Arc::new(MemoryRuntime::with_latency(Duration::from_millis(latency_ms)));
    let registry = Arc::new(GroupRegistry::ephemeral());
    (runtime.clone(), Reconciler::new(runtime, registry))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_group_deploys_are_serialized() {
    let (runtime, reconciler) = setup(10);

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.save_and_deploy("shop", &spec(i)).await })
        })
        .collect();

    for result in join_all(tasks).await {
        let report = result.unwrap().unwrap();
        assert!(report.is_success(), "deploy failed: {:?}", report.failed);
    }

    assert_eq!(runtime.peak_concurrency("shop"), 1, "runtime calls for one group overlapped");

    // Exactly one live container per service, matching the last stored version.
    let stored = reconciler.registry().get("shop").await.unwrap();
    assert_eq!(stored.version, 6);

    let live = runtime.list().await.unwrap();
    let mut per_service: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for container in &live {
        if container.label(GROUP_LABEL) == Some("shop") {
            per_service
                .entry(container.label(SERVICE_LABEL).unwrap_or_default().to_string())
                .or_default()
                .push(container.image.clone());
        }
    }
    assert_eq!(per_service.len(), 2);
    for service in &stored.services {
        assert_eq!(per_service[&service.service_name], vec![service.image.clone()]);
    }
    assert_eq!(reconciler.registry().list_managed("shop").await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_groups_deploy_in_parallel() {
    let (runtime, reconciler) = setup(50);

    let tasks: Vec<_> = ["shop", "blog", "wiki"]
        .into_iter()
        .map(|group| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.save_and_deploy(group, &spec(1)).await })
        })
        .collect();

    for result in join_all(tasks).await {
        assert!(result.unwrap().unwrap().is_success());
    }

    for group in ["shop", "blog", "wiki"] {
        assert_eq!(runtime.peak_concurrency(group), 1);
    }
    assert!(
        runtime.peak_total_concurrency() >= 2,
        "deploys of different groups never overlapped"
    );
}

#[tokio::test]
async fn test_reads_do_not_wait_for_a_running_deploy() {
    let (_, reconciler) = setup(100);
    reconciler.save_and_deploy("shop", &spec(1)).await.unwrap();

    let background = reconciler.clone();
    let deploy = tokio::spawn(async move { background.save_and_deploy("shop", &spec(2)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let read = tokio::time::timeout(Duration::from_millis(50), reconciler.registry().get("shop"))
        .await
        .expect("registry read blocked behind the group lock");
    assert!(read.is_some());

    assert!(deploy.await.unwrap().unwrap().is_success());
}
