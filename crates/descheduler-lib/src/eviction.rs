//! Eviction gatekeeper
//!
//! Every candidate eviction passes through the `PodEvictor`: safety checks
//! decide whether a pod may be disturbed at all, per-cycle budgets bound how
//! many evictions each cycle may perform, and the per-cycle statistics are
//! maintained here. All mutation happens under one lock, held across the
//! budget check, the API call and the stats update.

use crate::client::{ClusterClient, DEFAULT_GRACE_PERIOD_SECONDS};
use crate::config::EvictionLimits;
use crate::pod;
use anyhow::{bail, Result};
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Namespaces whose pods are never evicted
const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Priority classes reserved for system workloads
const SYSTEM_PRIORITY_CLASSES: &[&str] = &["system-cluster-critical", "system-node-critical"];

/// Annotation marking a static (file-sourced) pod
const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";

/// Per-cycle eviction statistics
#[derive(Debug, Clone, Default)]
pub struct EvictionStats {
    pub total_evicted: usize,
    pub failed_evictions: usize,
    pub evicted_by_node: HashMap<String, usize>,
    pub evicted_by_namespace: HashMap<String, usize>,
    pub evicted_by_reason: HashMap<String, usize>,
}

/// Gatekeeper combining safety checks, per-cycle budgets and execution
pub struct PodEvictor {
    client: Arc<dyn ClusterClient>,
    dry_run: bool,
    limits: EvictionLimits,
    grace_period_seconds: u32,
    stats: RwLock<EvictionStats>,
}

impl PodEvictor {
    pub fn new(client: Arc<dyn ClusterClient>, dry_run: bool, limits: EvictionLimits) -> Self {
        Self {
            client,
            dry_run,
            limits,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            stats: RwLock::new(EvictionStats::default()),
        }
    }

    /// Safety check: may this pod be disturbed at all? Pure function of the
    /// pod value; budgets are not consulted. The first failing check wins.
    pub fn can_evict(pod: &Pod) -> Result<(), &'static str> {
        if is_system_critical(pod) {
            return Err("system critical pod");
        }
        if is_daemon_set_pod(pod) {
            return Err("daemonset pod");
        }
        if is_static_pod(pod) {
            return Err("static pod");
        }
        if is_standalone(pod) && pod::phase(pod) != pod::PHASE_FAILED {
            return Err("standalone pod (not failed)");
        }
        if pod::is_terminating(pod) {
            return Err("pod is being deleted");
        }
        if has_local_storage(pod) {
            return Err("pod has local storage");
        }
        Ok(())
    }

    /// Evict the pod (or log it in dry-run mode) after consulting the
    /// per-cycle budgets. Budget rejections leave the counters untouched.
    pub async fn evict(&self, pod: &Pod, reason: &str) -> Result<()> {
        let mut stats = self.stats.write().await;

        self.check_limits(&stats, pod)?;

        let namespace = pod::namespace(pod);
        let name = pod::name(pod);
        let node = pod::node_name(pod);

        if self.dry_run {
            info!(
                "[DryRun] Would evict pod {}/{} on node {}, reason: {}",
                namespace, name, node, reason
            );
            update_stats(&mut stats, pod, reason);
            return Ok(());
        }

        match self
            .client
            .evict_pod(namespace, name, self.grace_period_seconds)
            .await
        {
            Ok(()) => {
                info!(
                    "Successfully evicted pod {}/{} on node {}, reason: {}",
                    namespace, name, node, reason
                );
                update_stats(&mut stats, pod, reason);
                Ok(())
            }
            Err(err) => {
                stats.failed_evictions += 1;
                error!("Failed to evict pod {}/{}: {:#}", namespace, name, err);
                Err(err)
            }
        }
    }

    /// Deep copy of the current statistics
    pub async fn stats(&self) -> EvictionStats {
        self.stats.read().await.clone()
    }

    /// Zero all counters, called at the start of every cycle
    pub async fn reset(&self) {
        *self.stats.write().await = EvictionStats::default();
    }

    fn check_limits(&self, stats: &EvictionStats, pod: &Pod) -> Result<()> {
        if self.limits.max_total > 0 && stats.total_evicted >= self.limits.max_total {
            bail!("reached total eviction limit: {}", self.limits.max_total);
        }

        let node = pod::node_name(pod);
        if self.limits.max_per_node > 0 && !node.is_empty() {
            let evicted = stats.evicted_by_node.get(node).copied().unwrap_or(0);
            if evicted >= self.limits.max_per_node {
                bail!(
                    "reached node {} eviction limit: {}",
                    node,
                    self.limits.max_per_node
                );
            }
        }

        if self.limits.max_per_namespace > 0 {
            let namespace = pod::namespace(pod);
            let evicted = stats
                .evicted_by_namespace
                .get(namespace)
                .copied()
                .unwrap_or(0);
            if evicted >= self.limits.max_per_namespace {
                bail!(
                    "reached namespace {} eviction limit: {}",
                    namespace,
                    self.limits.max_per_namespace
                );
            }
        }

        Ok(())
    }
}

fn update_stats(stats: &mut EvictionStats, pod: &Pod, reason: &str) {
    stats.total_evicted += 1;

    let node = pod::node_name(pod);
    if !node.is_empty() {
        *stats.evicted_by_node.entry(node.to_string()).or_default() += 1;
    }

    *stats
        .evicted_by_namespace
        .entry(pod::namespace(pod).to_string())
        .or_default() += 1;
    *stats
        .evicted_by_reason
        .entry(reason.to_string())
        .or_default() += 1;
}

fn is_system_critical(pod: &Pod) -> bool {
    if SYSTEM_PRIORITY_CLASSES.contains(&pod::priority_class_name(pod)) {
        return true;
    }
    SYSTEM_NAMESPACES.contains(&pod::namespace(pod))
}

fn is_daemon_set_pod(pod: &Pod) -> bool {
    pod::owner_references(pod)
        .iter()
        .any(|owner| owner.kind == "DaemonSet")
}

fn is_static_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(CONFIG_SOURCE_ANNOTATION))
        .map(|source| source == "file")
        .unwrap_or(false)
}

fn is_standalone(pod: &Pod) -> bool {
    pod::owner_references(pod).is_empty()
}

fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .any(|volume| volume.host_path.is_some() || volume.empty_dir.is_some())
        })
        .unwrap_or(false)
}
