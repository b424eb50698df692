//! End-to-end descheduling cycle tests over the in-memory cluster client

use descheduler_lib::health::HealthRegistry;
use descheduler_lib::pod::{PHASE_FAILED, PHASE_RUNNING};
use descheduler_lib::test_util::{MockClusterClient, NodeBuilder, PodBuilder};
use descheduler_lib::{Descheduler, DeschedulerConfig};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn config(yaml: &str) -> Arc<DeschedulerConfig> {
    Arc::new(DeschedulerConfig::from_yaml(yaml).unwrap())
}

fn worker(name: &str, node: &str, cpu: &str, memory: &str) -> Pod {
    PodBuilder::new("default", name)
        .node(node)
        .owner("ReplicaSet", "web")
        .image("web:1")
        .phase(PHASE_RUNNING)
        .requests(cpu, memory)
        .build()
}

#[tokio::test]
async fn test_single_failed_pod_dry_run() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let client = Arc::new(
        MockClusterClient::default().nodes(nodes).pods_on(
            "node-a",
            vec![PodBuilder::new("default", "web-1")
                .node("node-a")
                .owner("ReplicaSet", "web")
                .phase(PHASE_FAILED)
                .age_seconds(600)
                .build()],
        ),
    );
    let config = config(
        r#"
interval: 0
dryRun: true
strategies:
  removeFailedPods:
    enabled: true
    minLifetimeSeconds: 300
"#,
    );

    let descheduler = Descheduler::new(client.clone(), config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 1);
    assert_eq!(
        stats
            .evicted_by_reason
            .get("Failed pod cleanup - Phase: Failed"),
        Some(&1)
    );
    // dry run: no eviction reached the API
    assert!(client.evictions().is_empty());
}

#[tokio::test]
async fn test_system_namespace_and_daemonset_respected() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let client = Arc::new(
        MockClusterClient::default().nodes(nodes).pods_on(
            "node-a",
            vec![PodBuilder::new("kube-system", "agent-x")
                .node("node-a")
                .owner("DaemonSet", "agent")
                .phase(PHASE_FAILED)
                .age_seconds(600)
                .build()],
        ),
    );
    let config = config(
        r#"
interval: 0
dryRun: true
strategies:
  removeFailedPods:
    enabled: true
"#,
    );

    let descheduler = Descheduler::new(client, config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(descheduler.stats().await.total_evicted, 0);
}

#[tokio::test]
async fn test_utilization_balance_evicts_exactly_cap() {
    // node-a: CPU 90%, MEM 50%, PODS 40%; node-b nearly idle.
    // CPU excess over the 80% target is 10, so the cap is one eviction.
    let nodes = vec![
        NodeBuilder::new("node-a").allocatable("1", "4Gi", "5").build(),
        NodeBuilder::new("node-b").allocatable("1", "4Gi", "20").build(),
    ];
    let client = Arc::new(
        MockClusterClient::default()
            .nodes(nodes)
            .pods_on(
                "node-a",
                vec![
                    worker("heavy-1", "node-a", "450m", "1Gi"),
                    worker("heavy-2", "node-a", "450m", "1Gi"),
                ],
            )
            .pods_on(
                "node-b",
                vec![worker("light-1", "node-b", "50m", "200Mi")],
            ),
    );
    let config = config(
        r#"
interval: 0
strategies:
  lowNodeUtilization:
    enabled: true
    thresholds:
      cpu: 20
      memory: 20
      pods: 20
    targetThresholds:
      cpu: 80
      memory: 80
      pods: 80
    numberOfNodes: 1
"#,
    );

    let descheduler = Descheduler::new(client.clone(), config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 1);
    assert_eq!(stats.evicted_by_node.get("node-a"), Some(&1));
    assert!(stats.evicted_by_node.get("node-b").is_none());
    assert_eq!(client.evictions(), vec!["default/heavy-1".to_string()]);
}

#[tokio::test]
async fn test_duplicate_spread_keeps_oldest() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let replica = |name: &str, node: &str, age: i64| {
        PodBuilder::new("default", name)
            .node(node)
            .owner("ReplicaSet", "r")
            .image("app:1")
            .phase(PHASE_RUNNING)
            .age_seconds(age)
            .build()
    };
    let client = Arc::new(
        MockClusterClient::default()
            .nodes(nodes)
            .pods_on("node-a", vec![replica("r-old", "node-a", 100)])
            .pods_on("node-b", vec![replica("r-new", "node-b", 90)]),
    );
    let config = config(
        r#"
interval: 0
strategies:
  removeDuplicates:
    enabled: true
"#,
    );

    let descheduler = Descheduler::new(client.clone(), config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 1);
    assert!(stats
        .evicted_by_reason
        .keys()
        .all(|reason| reason.starts_with("Duplicate pod removal")));
    assert_eq!(client.evictions(), vec!["default/r-new".to_string()]);
}

#[tokio::test]
async fn test_quota_saturation_per_node() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let failed: Vec<Pod> = (0..10)
        .map(|i| {
            PodBuilder::new("default", &format!("web-{i}"))
                .node("node-a")
                .owner("ReplicaSet", "web")
                .phase(PHASE_FAILED)
                .age_seconds(600)
                .build()
        })
        .collect();
    let client = Arc::new(MockClusterClient::default().nodes(nodes).pods_on("node-a", failed));
    let config = config(
        r#"
interval: 0
dryRun: true
limits:
  maxPerNode: 3
  maxPerNamespace: 100
  maxTotal: 100
strategies:
  removeFailedPods:
    enabled: true
"#,
    );

    let descheduler = Descheduler::new(client, config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 3);
    assert_eq!(stats.evicted_by_node.get("node-a"), Some(&3));
    // budget invariants hold
    assert!(stats.total_evicted <= 100);
    assert!(stats.evicted_by_node.values().all(|count| *count <= 3));
    assert!(stats.evicted_by_namespace.values().all(|count| *count <= 100));
}

#[tokio::test]
async fn test_strategies_share_budget_in_fixed_order() {
    // One failed pod, an over-utilized node and a duplicate pair, all in a
    // single cycle: evictions arrive in strategy order because the
    // strategies run sequentially over the shared gatekeeper.
    let nodes = vec![
        NodeBuilder::new("node-a").allocatable("1", "4Gi", "5").build(),
        NodeBuilder::new("node-b").allocatable("1", "4Gi", "20").build(),
    ];
    let heavy = |name: &str, age: i64| {
        PodBuilder::new("default", name)
            .node("node-a")
            .owner("ReplicaSet", "web")
            .image("web:1")
            .phase(PHASE_RUNNING)
            .requests("450m", "1Gi")
            .age_seconds(age)
            .build()
    };
    let client = Arc::new(
        MockClusterClient::default()
            .nodes(nodes)
            .pods_on(
                "node-a",
                vec![
                    PodBuilder::new("default", "crashed")
                        .node("node-a")
                        .owner("ReplicaSet", "web")
                        .phase(PHASE_FAILED)
                        .age_seconds(600)
                        .build(),
                    heavy("heavy-1", 200),
                    heavy("heavy-2", 100),
                ],
            )
            .pods_on(
                "node-b",
                vec![PodBuilder::new("default", "light")
                    .node("node-b")
                    .owner("ReplicaSet", "api")
                    .image("api:1")
                    .phase(PHASE_RUNNING)
                    .requests("50m", "200Mi")
                    .build()],
            ),
    );
    let config = config(
        r#"
interval: 0
strategies:
  removeFailedPods:
    enabled: true
  lowNodeUtilization:
    enabled: true
    thresholds:
      cpu: 20
      memory: 20
      pods: 20
    targetThresholds:
      cpu: 80
      memory: 80
      pods: 80
    numberOfNodes: 1
  removeDuplicates:
    enabled: true
"#,
    );

    let descheduler = Descheduler::new(client.clone(), config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    // failed cleanup first, then the utilization victim (oldest heavy pod is
    // first in encounter order), then the newer duplicate
    assert_eq!(
        client.evictions(),
        vec![
            "default/crashed".to_string(),
            "default/heavy-1".to_string(),
            "default/heavy-2".to_string(),
        ]
    );

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 3);
    assert_eq!(stats.evicted_by_node.get("node-a"), Some(&3));
}

#[tokio::test]
async fn test_max_total_boundary() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let failed: Vec<Pod> = (0..5)
        .map(|i| {
            PodBuilder::new(&format!("ns-{i}"), "web")
                .node("node-a")
                .owner("ReplicaSet", "web")
                .phase(PHASE_FAILED)
                .age_seconds(600)
                .build()
        })
        .collect();
    let client = Arc::new(MockClusterClient::default().nodes(nodes).pods_on("node-a", failed));
    let config = config(
        r#"
interval: 0
dryRun: true
limits:
  maxPerNode: 100
  maxPerNamespace: 100
  maxTotal: 3
strategies:
  removeFailedPods:
    enabled: true
"#,
    );

    let descheduler = Descheduler::new(client, config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(descheduler.stats().await.total_evicted, 3);
}

#[tokio::test]
async fn test_all_strategies_disabled_leaves_stats_zero() {
    let nodes = vec![
        NodeBuilder::new("node-a").build(),
        NodeBuilder::new("node-b").build(),
    ];
    let client = Arc::new(
        MockClusterClient::default().nodes(nodes).pods_on(
            "node-a",
            vec![PodBuilder::new("default", "web-1")
                .node("node-a")
                .owner("ReplicaSet", "web")
                .phase(PHASE_FAILED)
                .age_seconds(600)
                .build()],
        ),
    );
    let config = config("interval: 0\ndryRun: true");

    let descheduler = Descheduler::new(client.clone(), config, HealthRegistry::new());
    descheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let stats = descheduler.stats().await;
    assert_eq!(stats.total_evicted, 0);
    assert_eq!(stats.failed_evictions, 0);
    assert!(stats.evicted_by_reason.is_empty());
    assert!(client.evictions().is_empty());
}
