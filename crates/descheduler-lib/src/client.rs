//! Cluster API access
//!
//! The controller and strategies only see the `ClusterClient` trait; the
//! production implementation talks to the Kubernetes API server through
//! `kube`. Tests substitute the in-memory client from `test_util`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::time::Duration;
use tracing::info;

/// Grace period handed to the eviction subresource
pub const DEFAULT_GRACE_PERIOD_SECONDS: u32 = 30;

/// Deadline for the startup connectivity probe
const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only cluster view plus the eviction primitive
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List all pods bound to the given node
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Request graceful eviction of a pod. Disruption-budget rejections and
    /// transport failures both surface as errors.
    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<()>;
}

/// `ClusterClient` backed by the Kubernetes API server
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    /// Connect using an explicit kubeconfig file if given, otherwise the
    /// in-cluster service account with a fallback to `~/.kube/config`.
    pub async fn connect(kubeconfig: Option<&str>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                info!(path = %path, "Using explicit kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("failed to read kubeconfig {path}"))?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .context("failed to build client config from kubeconfig")?;
                kube::Client::try_from(config)?
            }
            None => kube::Client::try_default()
                .await
                .context("failed to build kubernetes client")?,
        };

        Ok(Self { client })
    }

    /// Verify the API server answers a node listing before the loop starts
    pub async fn check_connectivity(&self) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let params = ListParams::default().limit(1);

        tokio::time::timeout(STARTUP_PROBE_TIMEOUT, nodes.list(&params))
            .await
            .context("cluster connectivity probe timed out")?
            .context("failed to connect to the cluster")?;

        Ok(())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .context("failed to list nodes")?;
        Ok(list.items)
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let list = pods
            .list(&params)
            .await
            .with_context(|| format!("failed to list pods on node {node_name}"))?;
        Ok(list.items)
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(grace_period_seconds),
                ..DeleteParams::default()
            }),
            ..EvictParams::default()
        };

        pods.evict(name, &params)
            .await
            .with_context(|| format!("failed to evict pod {namespace}/{name}"))?;
        Ok(())
    }
}
