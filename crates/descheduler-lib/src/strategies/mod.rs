//! Descheduling strategies
//!
//! Each strategy selects eviction candidates from the filtered node set and
//! routes them through the gatekeeper. The factory builds all strategies in
//! the fixed execution order; cleanup of known-bad state runs before any
//! optional rebalancing so the per-cycle budgets are spent on it first.

mod low_node_utilization;
mod remove_duplicates;
mod remove_failed_pods;

pub use low_node_utilization::LowNodeUtilizationStrategy;
pub use remove_duplicates::RemoveDuplicatesStrategy;
pub use remove_failed_pods::RemoveFailedPodsStrategy;

use crate::client::ClusterClient;
use crate::config::DeschedulerConfig;
use crate::eviction::PodEvictor;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A descheduling policy executed once per cycle
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Run the strategy over the filtered node set. Cancellation is honored
    /// at node and candidate boundaries; in-flight evictions complete.
    async fn execute(&self, cancel: &CancellationToken, nodes: &[Node]) -> Result<()>;
}

/// Build the strategy set in execution order:
/// RemoveFailedPods, LowNodeUtilization, RemoveDuplicates.
pub fn build_strategies(
    config: &DeschedulerConfig,
    client: Arc<dyn ClusterClient>,
    evictor: Arc<PodEvictor>,
) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(RemoveFailedPodsStrategy::new(
            config.strategies.remove_failed_pods.clone(),
            client.clone(),
            evictor.clone(),
        )),
        Box::new(LowNodeUtilizationStrategy::new(
            config.strategies.low_node_utilization.clone(),
            client.clone(),
            evictor.clone(),
        )),
        Box::new(RemoveDuplicatesStrategy::new(
            config.strategies.remove_duplicates.clone(),
            client,
            evictor,
        )),
    ]
}

/// Namespace filter shared by the strategies: an include list wins over an
/// exclude list; both empty means every namespace is processed.
pub(crate) fn namespace_allowed(included: &[String], excluded: &[String], namespace: &str) -> bool {
    if !included.is_empty() {
        return included.iter().any(|ns| ns == namespace);
    }
    if !excluded.is_empty() {
        return !excluded.iter().any(|ns| ns == namespace);
    }
    true
}
