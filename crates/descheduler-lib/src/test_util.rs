//! Test fixtures: builders for API objects and an in-memory cluster client.

use crate::client::ClusterClient;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, HostPathVolumeSource, Node, NodeCondition, NodeSpec,
    NodeStatus, Pod, PodSpec, PodStatus, ResourceRequirements, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Builder for pod fixtures. Defaults to a Running pod created "now".
pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.name = Some(name.to_string());
        pod.metadata.creation_timestamp = Some(Time(Utc::now()));
        pod.spec = Some(PodSpec::default());
        pod.status = Some(PodStatus {
            phase: Some(crate::pod::PHASE_RUNNING.to_string()),
            ..PodStatus::default()
        });
        Self { pod }
    }

    pub fn node(mut self, node_name: &str) -> Self {
        self.spec().node_name = Some(node_name.to_string());
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.status().phase = Some(phase.to_string());
        self
    }

    pub fn status_reason(mut self, reason: &str) -> Self {
        self.status().reason = Some(reason.to_string());
        self
    }

    pub fn owner(mut self, kind: &str, name: &str) -> Self {
        self.pod
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                uid: format!("uid-{kind}-{name}"),
                ..OwnerReference::default()
            });
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        let index = self.spec().containers.len();
        self.spec().containers.push(Container {
            name: format!("c{index}"),
            image: Some(image.to_string()),
            ..Container::default()
        });
        self
    }

    /// Add a container with the given CPU and memory requests
    pub fn requests(mut self, cpu: &str, memory: &str) -> Self {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        requests.insert("memory".to_string(), Quantity(memory.to_string()));

        let index = self.spec().containers.len();
        self.spec().containers.push(Container {
            name: format!("c{index}"),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..ResourceRequirements::default()
            }),
            ..Container::default()
        });
        self
    }

    pub fn priority(mut self, class_name: &str, value: Option<i32>) -> Self {
        self.spec().priority_class_name = Some(class_name.to_string());
        self.spec().priority = value;
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn terminating(mut self) -> Self {
        self.pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        self
    }

    pub fn host_path_volume(mut self) -> Self {
        self.spec().volumes.get_or_insert_with(Vec::new).push(Volume {
            name: "host".to_string(),
            host_path: Some(HostPathVolumeSource::default()),
            ..Volume::default()
        });
        self
    }

    pub fn empty_dir_volume(mut self) -> Self {
        self.spec().volumes.get_or_insert_with(Vec::new).push(Volume {
            name: "scratch".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        });
        self
    }

    pub fn age_seconds(mut self, seconds: i64) -> Self {
        self.pod.metadata.creation_timestamp = Some(Time(Utc::now() - Duration::seconds(seconds)));
        self
    }

    pub fn created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.pod.metadata.creation_timestamp = Some(Time(timestamp));
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }

    fn spec(&mut self) -> &mut PodSpec {
        self.pod.spec.get_or_insert_with(PodSpec::default)
    }

    fn status(&mut self) -> &mut PodStatus {
        self.pod.status.get_or_insert_with(PodStatus::default)
    }
}

/// Builder for node fixtures. Defaults to a ready, schedulable node.
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.status = Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..NodeCondition::default()
            }]),
            ..NodeStatus::default()
        });
        Self { node }
    }

    pub fn ready(mut self, ready: bool) -> Self {
        let status = if ready { "True" } else { "False" };
        self.node.status = Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: status.to_string(),
                ..NodeCondition::default()
            }]),
            ..self.node.status.unwrap_or_default()
        });
        self
    }

    pub fn unschedulable(mut self) -> Self {
        self.node.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..self.node.spec.unwrap_or_default()
        });
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.node
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn allocatable(mut self, cpu: &str, memory: &str, pods: &str) -> Self {
        let mut allocatable = BTreeMap::new();
        allocatable.insert("cpu".to_string(), Quantity(cpu.to_string()));
        allocatable.insert("memory".to_string(), Quantity(memory.to_string()));
        allocatable.insert("pods".to_string(), Quantity(pods.to_string()));

        let mut status = self.node.status.unwrap_or_default();
        status.allocatable = Some(allocatable);
        self.node.status = Some(status);
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

/// In-memory `ClusterClient` recording evictions instead of performing them
#[derive(Default)]
pub struct MockClusterClient {
    nodes: Vec<Node>,
    pods_by_node: HashMap<String, Vec<Pod>>,
    failing_nodes: Vec<String>,
    should_fail_evictions: bool,
    evictions: Mutex<Vec<String>>,
}

impl MockClusterClient {
    pub fn nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn pods_on(mut self, node_name: &str, pods: Vec<Pod>) -> Self {
        self.pods_by_node.insert(node_name.to_string(), pods);
        self
    }

    /// Listing pods on this node will fail
    pub fn failing_node(mut self, node_name: &str) -> Self {
        self.failing_nodes.push(node_name.to_string());
        self
    }

    /// All eviction calls will fail
    pub fn fail_evictions(mut self) -> Self {
        self.should_fail_evictions = true;
        self
    }

    /// Pod keys evicted so far, in call order
    pub fn evictions(&self) -> Vec<String> {
        self.evictions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        if self.failing_nodes.iter().any(|n| n == node_name) {
            bail!("listing pods on node {node_name} failed");
        }
        Ok(self.pods_by_node.get(node_name).cloned().unwrap_or_default())
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: u32,
    ) -> Result<()> {
        if self.should_fail_evictions {
            bail!("eviction of {namespace}/{name} failed");
        }
        self.evictions
            .lock()
            .unwrap()
            .push(format!("{namespace}/{name}"));
        Ok(())
    }
}
