//! Failed-pod cleanup strategy
//!
//! Evicts pods stuck in the Failed phase once they are older than the
//! configured minimum lifetime, subject to namespace and owner-kind filters.

use crate::client::ClusterClient;
use crate::config::RemoveFailedPodsConfig;
use crate::eviction::PodEvictor;
use crate::node;
use crate::pod;
use crate::strategies::{namespace_allowed, Strategy};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct RemoveFailedPodsStrategy {
    config: Option<RemoveFailedPodsConfig>,
    client: Arc<dyn ClusterClient>,
    evictor: Arc<PodEvictor>,
}

impl RemoveFailedPodsStrategy {
    pub fn new(
        config: Option<RemoveFailedPodsConfig>,
        client: Arc<dyn ClusterClient>,
        evictor: Arc<PodEvictor>,
    ) -> Self {
        Self {
            config,
            client,
            evictor,
        }
    }

    fn should_evict(&self, config: &RemoveFailedPodsConfig, pod: &Pod, now: DateTime<Utc>) -> bool {
        if !namespace_allowed(
            &config.included_namespaces,
            &config.excluded_namespaces,
            pod::namespace(pod),
        ) {
            return false;
        }

        if config.min_lifetime_seconds > 0 {
            let age = pod::creation_timestamp(pod)
                .map(|created| (now - created).num_seconds())
                .unwrap_or(i64::MAX);
            if age < config.min_lifetime_seconds {
                debug!(
                    "Pod {} is too young (age: {}s, min: {}s)",
                    pod::pod_key(pod),
                    age,
                    config.min_lifetime_seconds
                );
                return false;
            }
        }

        if pod::has_excluded_owner_kind(pod, &config.exclude_owner_kinds) {
            debug!("Pod {} owner kind is excluded", pod::pod_key(pod));
            return false;
        }

        true
    }
}

#[async_trait]
impl Strategy for RemoveFailedPodsStrategy {
    fn name(&self) -> &'static str {
        "RemoveFailedPods"
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
        let now = Utc::now();

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

            let failed: Vec<&Pod> = pods
                .iter()
                .filter(|p| pod::phase(p) == pod::PHASE_FAILED)
                .collect();
            debug!("Found {} failed pods on node {}", failed.len(), node_name);

            for pod in failed {
                if let Err(reason) = PodEvictor::can_evict(pod) {
                    debug!("Skipping pod {}: {}", pod::pod_key(pod), reason);
                    skipped += 1;
                    continue;
                }

                if !self.should_evict(config, pod, now) {
                    skipped += 1;
                    continue;
                }

                let mut reason = format!("Failed pod cleanup - Phase: {}", pod::phase(pod));
                let status_reason = pod::status_reason(pod);
                if !status_reason.is_empty() {
                    reason.push_str(&format!(", Reason: {status_reason}"));
                }

                if let Err(err) = self.evictor.evict(pod, &reason).await {
                    error!("Failed to evict pod {}: {:#}", pod::pod_key(pod), err);
                    continue;
                }

                evicted += 1;
                debug!(
                    "Successfully evicted failed pod {} on node {}",
                    pod::pod_key(pod),
                    node_name
                );
            }
        }

        info!(
            "RemoveFailedPods strategy completed. Evicted: {}, Skipped: {}",
            evicted, skipped
        );
        Ok(())
    }
}
