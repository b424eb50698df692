//! Node utilization balancing strategy
//!
//! Classifies nodes by request-based utilization and evicts a bounded number
//! of pods from over-utilized nodes so the scheduler can re-place them. The
//! under-utilized set is only a precondition for acting; replacement nodes
//! are chosen by the platform scheduler, not here.

use crate::client::ClusterClient;
use crate::config::{LowNodeUtilizationConfig, ResourceThresholds};
use crate::eviction::PodEvictor;
use crate::node::{self, NodeUtilization};
use crate::pod;
use crate::strategies::Strategy;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Bounds on per-node evictions per cycle
const MIN_EVICTIONS_PER_NODE: usize = 1;
const MAX_EVICTIONS_PER_NODE: usize = 5;

pub struct LowNodeUtilizationStrategy {
    config: Option<LowNodeUtilizationConfig>,
    client: Arc<dyn ClusterClient>,
    evictor: Arc<PodEvictor>,
}

impl LowNodeUtilizationStrategy {
    pub fn new(
        config: Option<LowNodeUtilizationConfig>,
        client: Arc<dyn ClusterClient>,
        evictor: Arc<PodEvictor>,
    ) -> Self {
        Self {
            config,
            client,
            evictor,
        }
    }

    /// Candidates on an over-utilized node: non-terminal, safe to evict,
    /// low-priority pods first (preserving encounter order within each half).
    fn candidates<'a>(pods: &'a [Pod], skipped: &mut usize) -> Vec<&'a Pod> {
        let mut low_priority = Vec::new();
        let mut normal = Vec::new();

        for pod in pods {
            let phase = pod::phase(pod);
            if phase == pod::PHASE_SUCCEEDED || phase == pod::PHASE_FAILED {
                continue;
            }
            if let Err(reason) = PodEvictor::can_evict(pod) {
                debug!("Skipping pod {}: {}", pod::pod_key(pod), reason);
                *skipped += 1;
                continue;
            }
            if pod::is_low_priority(pod) {
                low_priority.push(pod);
            } else {
                normal.push(pod);
            }
        }

        low_priority.extend(normal);
        low_priority
    }

    /// How many evictions the node's excess justifies: one tenth of the
    /// largest percentage excess over the target thresholds, at least 1 and
    /// at most 5.
    fn max_evictions(utilization: &NodeUtilization, targets: &ResourceThresholds) -> usize {
        let cpu_excess = (utilization.cpu_percent - targets.cpu).max(0);
        let memory_excess = (utilization.memory_percent - targets.memory).max(0);
        let pods_excess = (utilization.pods_percent - targets.pods).max(0);

        let max_excess = cpu_excess.max(memory_excess).max(pods_excess);
        ((max_excess / 10) as usize).clamp(MIN_EVICTIONS_PER_NODE, MAX_EVICTIONS_PER_NODE)
    }
}

#[async_trait]
impl Strategy for LowNodeUtilizationStrategy {
    fn name(&self) -> &'static str {
        "LowNodeUtilization"
    }

    fn is_enabled(&self) -> bool {
        self.config.as_ref().map(|c| c.enabled).unwrap_or(false)
    }

    async fn execute(&self, cancel: &CancellationToken, nodes: &[Node]) -> Result<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let ready: Vec<&Node> = nodes
            .iter()
            .filter(|n| node::is_ready(n) && node::is_schedulable(n))
            .collect();
        if ready.len() < 2 {
            info!(
                "Need at least 2 ready nodes, found {}. Skipping strategy.",
                ready.len()
            );
            return Ok(());
        }

        let mut utilizations = Vec::new();
        for node in &ready {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let node_name = node::node_name(node);
            match self.client.list_pods_on_node(node_name).await {
                Ok(pods) => {
                    let utilization = node::compute_utilization(node, &pods);
                    debug!(
                        "Node {} utilization: CPU={}%, Memory={}%, Pods={}%",
                        node_name,
                        utilization.cpu_percent,
                        utilization.memory_percent,
                        utilization.pods_percent
                    );
                    utilizations.push(utilization);
                }
                Err(err) => {
                    error!("Failed to list pods on node {}: {:#}", node_name, err);
                }
            }
        }

        let mut under = Vec::new();
        let mut over = Vec::new();
        for utilization in &utilizations {
            if node::is_under_utilized(utilization, &config.thresholds) {
                debug!("Node {} is under-utilized", utilization.node_name);
                under.push(utilization);
            } else if node::is_over_utilized(utilization, &config.target_thresholds) {
                debug!("Node {} is over-utilized", utilization.node_name);
                over.push(utilization);
            }
        }

        info!(
            "Found {} low utilization nodes and {} over utilization nodes",
            under.len(),
            over.len()
        );

        if under.len() < config.number_of_nodes {
            info!(
                "Low utilization nodes ({}) below threshold ({}). Skipping strategy.",
                under.len(),
                config.number_of_nodes
            );
            return Ok(());
        }
        if over.is_empty() {
            info!("No over utilization nodes found. Skipping strategy.");
            return Ok(());
        }

        let mut evicted_total = 0usize;
        let mut skipped = 0usize;

        for utilization in over {
            if cancel.is_cancelled() {
                break;
            }

            debug!(
                "Processing over-utilized node: {} (CPU={}%, Memory={}%, Pods={}%)",
                utilization.node_name,
                utilization.cpu_percent,
                utilization.memory_percent,
                utilization.pods_percent
            );

            let pods = match self.client.list_pods_on_node(&utilization.node_name).await {
                Ok(pods) => pods,
                Err(err) => {
                    error!(
                        "Failed to list pods on node {}: {:#}",
                        utilization.node_name, err
                    );
                    continue;
                }
            };

            let candidates = Self::candidates(&pods, &mut skipped);
            let cap = Self::max_evictions(utilization, &config.target_thresholds);
            let reason = format!(
                "Node over-utilization balancing - CPU={}%, Memory={}%, Pods={}%",
                utilization.cpu_percent, utilization.memory_percent, utilization.pods_percent
            );

            // The cap bounds attempts: a budget rejection consumes a slot
            // just like a successful eviction.
            let mut attempts = 0usize;
            let mut evicted = 0usize;
            for pod in candidates {
                if attempts >= cap || cancel.is_cancelled() {
                    break;
                }
                attempts += 1;

                match self.evictor.evict(pod, &reason).await {
                    Ok(()) => {
                        evicted += 1;
                        evicted_total += 1;
                        debug!(
                            "Successfully evicted pod {} from over-utilized node {}",
                            pod::pod_key(pod),
                            utilization.node_name
                        );
                    }
                    Err(err) => {
                        error!("Failed to evict pod {}: {:#}", pod::pod_key(pod), err);
                    }
                }
            }

            debug!(
                "Evicted {} pods from node {}",
                evicted, utilization.node_name
            );
        }

        info!(
            "LowNodeUtilization strategy completed. Evicted: {}, Skipped: {}",
            evicted_total, skipped
        );
        Ok(())
    }
}
