//! Duplicate-pod spreading strategy
//!
//! Groups running pods by signature (namespace, owners, images) and evicts
//! the extras so the scheduler can spread duplicates across nodes, keeping
//! the oldest pod of each group. Disabled by default in typical
//! configurations.

use crate::client::ClusterClient;
use crate::config::RemoveDuplicatesConfig;
use crate::eviction::PodEvictor;
use crate::node;
use crate::pod;
use crate::strategies::{namespace_allowed, Strategy};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// pods of one signature, grouped by the node hosting them
type NodePods = BTreeMap<String, Vec<Pod>>;

pub struct RemoveDuplicatesStrategy {
    config: Option<RemoveDuplicatesConfig>,
    client: Arc<dyn ClusterClient>,
    evictor: Arc<PodEvictor>,
}

impl RemoveDuplicatesStrategy {
    pub fn new(
        config: Option<RemoveDuplicatesConfig>,
        client: Arc<dyn ClusterClient>,
        evictor: Arc<PodEvictor>,
    ) -> Self {
        Self {
            config,
            client,
            evictor,
        }
    }

    /// Build the two-level signature -> node -> pods index over pods that
    /// are Running, pass the namespace filter, and have a non-excluded owner.
    async fn group_by_signature(
        &self,
        config: &RemoveDuplicatesConfig,
        cancel: &CancellationToken,
        nodes: &[Node],
    ) -> BTreeMap<String, NodePods> {
        let mut groups: BTreeMap<String, NodePods> = BTreeMap::new();

        for node in nodes {
            if cancel.is_cancelled() {
                break;
            }

            let node_name = node::node_name(node);
            let pods = match self.client.list_pods_on_node(node_name).await {
                Ok(pods) => pods,
                Err(err) => {
                    error!("Failed to list pods on node {}: {:#}", node_name, err);
                    continue;
                }
            };

            for pod in pods {
                if pod::phase(&pod) != pod::PHASE_RUNNING {
                    continue;
                }
                if !namespace_allowed(
                    &config.included_namespaces,
                    &config.excluded_namespaces,
                    pod::namespace(&pod),
                ) {
                    continue;
                }
                if pod::owner_references(&pod).is_empty() {
                    continue;
                }
                if pod::has_excluded_owner_kind(&pod, &config.exclude_owner_kinds) {
                    continue;
                }

                groups
                    .entry(pod::signature(&pod))
                    .or_default()
                    .entry(node_name.to_string())
                    .or_default()
                    .push(pod);
            }
        }

        groups
    }

    /// Duplicate sets of one signature group: every node holding more than
    /// one pod, with that node's pods. When no node holds more than one but
    /// the signature spans several nodes, the whole group is folded onto the
    /// node with the largest list (first in name order on ties).
    fn duplicate_sets(by_node: &NodePods) -> Vec<(&str, Vec<&Pod>)> {
        let mut sets: Vec<(&str, Vec<&Pod>)> = by_node
            .iter()
            .filter(|(_, pods)| pods.len() > 1)
            .map(|(node, pods)| (node.as_str(), pods.iter().collect()))
            .collect();

        if sets.is_empty() && by_node.len() > 1 {
            let mut largest: Option<(&str, usize)> = None;
            for (node, pods) in by_node {
                if largest.map_or(true, |(_, len)| pods.len() > len) {
                    largest = Some((node.as_str(), pods.len()));
                }
            }
            if let Some((node, _)) = largest {
                sets.push((node, by_node.values().flatten().collect()));
            }
        }

        sets
    }
}

#[async_trait]
impl Strategy for RemoveDuplicatesStrategy {
    fn name(&self) -> &'static str {
        "RemoveDuplicates"
    }

    fn is_enabled(&self) -> bool {
        self.config.as_ref().map(|c| c.enabled).unwrap_or(false)
    }

    async fn execute(&self, cancel: &CancellationToken, nodes: &[Node]) -> Result<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let mut evicted = 0usize;
        let mut skipped = 0usize;

        let groups = self.group_by_signature(config, cancel, nodes).await;
        debug!("Found {} unique pod signatures", groups.len());

        for (signature, by_node) in &groups {
            let duplicate_sets = Self::duplicate_sets(by_node);
            if duplicate_sets.is_empty() {
                continue;
            }

            debug!(
                "Found duplicates for signature {} on nodes: {:?}",
                signature,
                duplicate_sets.iter().map(|(n, _)| *n).collect::<Vec<_>>()
            );

            for (node_name, pods) in duplicate_sets {
                let mut sorted = pods;
                sorted.sort_by_key(|p| pod::creation_timestamp(p));

                // the oldest pod survives
                let reason =
                    format!("Duplicate pod removal - keeping oldest pod on node {node_name}");
                for pod in &sorted[1..] {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }

                    if let Err(block) = PodEvictor::can_evict(pod) {
                        debug!(
                            "Skipping duplicate pod {}: {}",
                            pod::pod_key(pod),
                            block
                        );
                        skipped += 1;
                        continue;
                    }

                    match self.evictor.evict(pod, &reason).await {
                        Ok(()) => {
                            evicted += 1;
                            debug!(
                                "Successfully evicted duplicate pod {} from node {}",
                                pod::pod_key(pod),
                                node_name
                            );
                        }
                        Err(err) => {
                            error!(
                                "Failed to evict duplicate pod {}: {:#}",
                                pod::pod_key(pod),
                                err
                            );
                        }
                    }
                }
            }
        }

        info!(
            "RemoveDuplicates strategy completed. Evicted: {}, Skipped: {}",
            evicted, skipped
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionLimits;
    use crate::test_util::{MockClusterClient, NodeBuilder, PodBuilder};
    use chrono::{Duration, Utc};

    fn enabled_config() -> RemoveDuplicatesConfig {
        RemoveDuplicatesConfig {
            enabled: true,
            exclude_owner_kinds: vec![],
            included_namespaces: vec![],
            excluded_namespaces: vec![],
        }
    }

    fn no_limits() -> EvictionLimits {
        EvictionLimits {
            max_per_node: 0,
            max_per_namespace: 0,
            max_total: 0,
        }
    }

    fn strategy(
        config: RemoveDuplicatesConfig,
        client: Arc<MockClusterClient>,
    ) -> (RemoveDuplicatesStrategy, Arc<PodEvictor>) {
        // real (mock) evictions so tests can observe which pod went
        let evictor = Arc::new(PodEvictor::new(client.clone(), false, no_limits()));
        (
            RemoveDuplicatesStrategy::new(Some(config), client, evictor.clone()),
            evictor,
        )
    }

    fn replica(name: &str, node: &str, age_seconds: i64) -> Pod {
        PodBuilder::new("default", name)
            .node(node)
            .owner("ReplicaSet", "r")
            .image("nginx:1.25")
            .phase(pod::PHASE_RUNNING)
            .created_at(Utc::now() - Duration::seconds(age_seconds))
            .build()
    }

    fn two_nodes() -> Vec<Node> {
        vec![
            NodeBuilder::new("node-a").build(),
            NodeBuilder::new("node-b").build(),
        ]
    }

    #[tokio::test]
    async fn test_spread_duplicates_keep_oldest() {
        // one replica per node; the newer one goes
        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![replica("r-old", "node-a", 100)])
                .pods_on("node-b", vec![replica("r-new", "node-b", 90)]),
        );
        let (strategy, evictor) = strategy(enabled_config(), client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert_eq!(client.evictions(), vec!["default/r-new".to_string()]);
        let stats = evictor.stats().await;
        assert_eq!(stats.total_evicted, 1);
        assert!(stats
            .evicted_by_reason
            .keys()
            .all(|reason| reason.starts_with("Duplicate pod removal")));
    }

    #[tokio::test]
    async fn test_duplicates_on_single_node() {
        let client = Arc::new(MockClusterClient::default().pods_on(
            "node-a",
            vec![
                replica("r-1", "node-a", 300),
                replica("r-2", "node-a", 200),
                replica("r-3", "node-a", 100),
            ],
        ));
        let (strategy, evictor) = strategy(enabled_config(), client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        // the oldest survives, both newer duplicates go
        assert_eq!(
            client.evictions(),
            vec!["default/r-2".to_string(), "default/r-3".to_string()]
        );
        assert_eq!(evictor.stats().await.total_evicted, 2);
    }

    #[tokio::test]
    async fn test_distinct_signatures_left_alone() {
        let other = PodBuilder::new("default", "api-1")
            .node("node-a")
            .owner("ReplicaSet", "api")
            .image("api:2.0")
            .phase(pod::PHASE_RUNNING)
            .build();
        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![replica("r-1", "node-a", 100), other])
                .pods_on("node-b", vec![]),
        );
        let (strategy, evictor) = strategy(enabled_config(), client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert!(client.evictions().is_empty());
        assert_eq!(evictor.stats().await.total_evicted, 0);
    }

    #[tokio::test]
    async fn test_ignores_pods_without_owner_or_not_running() {
        let ownerless = PodBuilder::new("default", "solo-1")
            .node("node-a")
            .image("nginx:1.25")
            .phase(pod::PHASE_RUNNING)
            .build();
        let ownerless_twin = PodBuilder::new("default", "solo-2")
            .node("node-a")
            .image("nginx:1.25")
            .phase(pod::PHASE_RUNNING)
            .build();
        let mut pending = replica("r-pending", "node-a", 100);
        pending.status.as_mut().unwrap().phase = Some(pod::PHASE_PENDING.to_string());

        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![ownerless, ownerless_twin, pending])
                .pods_on("node-b", vec![replica("r-1", "node-b", 100)]),
        );
        let (strategy, evictor) = strategy(enabled_config(), client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert!(client.evictions().is_empty());
        assert_eq!(evictor.stats().await.total_evicted, 0);
    }

    #[tokio::test]
    async fn test_excluded_owner_kinds_ignored() {
        let job = |name: &str, node: &str| {
            PodBuilder::new("default", name)
                .node(node)
                .owner("Job", "batch")
                .image("batch:1")
                .phase(pod::PHASE_RUNNING)
                .build()
        };
        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![job("j-1", "node-a"), job("j-2", "node-a")])
                .pods_on("node-b", vec![]),
        );
        let mut config = enabled_config();
        config.exclude_owner_kinds = vec!["Job".to_string()];
        let (strategy, evictor) = strategy(config, client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert!(client.evictions().is_empty());
        assert_eq!(evictor.stats().await.total_evicted, 0);
    }

    #[tokio::test]
    async fn test_namespace_exclusion() {
        let monitored = |name: &str| {
            PodBuilder::new("monitoring", name)
                .node("node-a")
                .owner("ReplicaSet", "prom")
                .image("prom:2")
                .phase(pod::PHASE_RUNNING)
                .build()
        };
        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![monitored("p-1"), monitored("p-2")])
                .pods_on("node-b", vec![]),
        );
        let mut config = enabled_config();
        config.excluded_namespaces = vec!["monitoring".to_string()];
        let (strategy, evictor) = strategy(config, client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert_eq!(evictor.stats().await.total_evicted, 0);
    }

    #[tokio::test]
    async fn test_safety_rejection_counts_as_skip() {
        // the newer duplicate is already terminating, so it is skipped
        let old = replica("r-old", "node-a", 200);
        let newer = PodBuilder::new("default", "r-new")
            .node("node-a")
            .owner("ReplicaSet", "r")
            .image("nginx:1.25")
            .phase(pod::PHASE_RUNNING)
            .created_at(Utc::now() - Duration::seconds(100))
            .terminating()
            .build();

        let client = Arc::new(
            MockClusterClient::default()
                .pods_on("node-a", vec![old, newer])
                .pods_on("node-b", vec![]),
        );
        let (strategy, evictor) = strategy(enabled_config(), client.clone());

        strategy
            .execute(&CancellationToken::new(), &two_nodes())
            .await
            .unwrap();

        assert!(client.evictions().is_empty());
        assert_eq!(evictor.stats().await.total_evicted, 0);
    }

    #[test]
    fn test_duplicate_sets_prefer_nodes_with_extras() {
        let mut by_node = NodePods::new();
        by_node.insert("node-a".to_string(), vec![replica("r-1", "node-a", 100)]);
        by_node.insert(
            "node-b".to_string(),
            vec![
                replica("r-2", "node-b", 90),
                replica("r-3", "node-b", 80),
            ],
        );

        let sets = RemoveDuplicatesStrategy::duplicate_sets(&by_node);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].0, "node-b");
        assert_eq!(sets[0].1.len(), 2);
    }

    #[test]
    fn test_duplicate_sets_fold_spread_group_onto_first_largest() {
        let mut by_node = NodePods::new();
        by_node.insert("node-b".to_string(), vec![replica("r-1", "node-b", 100)]);
        by_node.insert("node-a".to_string(), vec![replica("r-2", "node-a", 90)]);

        let sets = RemoveDuplicatesStrategy::duplicate_sets(&by_node);
        assert_eq!(sets.len(), 1);
        // ties resolve to the first node in name order
        assert_eq!(sets[0].0, "node-a");
        // the whole group is considered so the oldest can be preserved
        assert_eq!(sets[0].1.len(), 2);
    }

    #[test]
    fn test_single_node_single_pod_is_not_a_duplicate() {
        let mut by_node = NodePods::new();
        by_node.insert("node-a".to_string(), vec![replica("r-1", "node-a", 100)]);

        assert!(RemoveDuplicatesStrategy::duplicate_sets(&by_node).is_empty());
    }
}
