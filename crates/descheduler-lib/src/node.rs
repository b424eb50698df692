//! Node view helpers
//!
//! Readiness and schedulability checks, label-selector matching, and the
//! request-based utilization arithmetic used by the balancing strategy.
//! Utilization is approximated from declared container requests; terminal
//! pods (Succeeded/Failed) are excluded.

use crate::config::ResourceThresholds;
use crate::pod;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// A node is ready when it carries a `Ready` condition with status `True`
pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub fn is_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// A node matches when it carries every selector label with the exact value.
/// An empty selector matches all nodes.
pub fn matches_selector(node: &Node, selector: &BTreeMap<String, String>) -> bool {
    let labels = node.metadata.labels.as_ref();
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .map(|node_value| node_value == value)
            .unwrap_or(false)
    })
}

/// Per-node resource utilization derived from declared requests
#[derive(Debug, Clone)]
pub struct NodeUtilization {
    pub node_name: String,
    /// Sum of container CPU requests in millicores
    pub cpu_request_millis: i64,
    /// Sum of container memory requests in bytes
    pub memory_request_bytes: i64,
    /// Count of non-terminal pods
    pub pods_count: i64,
    pub cpu_percent: i64,
    pub memory_percent: i64,
    pub pods_percent: i64,
}

/// Compute utilization of a node from the pods bound to it. Pods in phase
/// Succeeded or Failed do not contribute.
pub fn compute_utilization(node: &Node, pods: &[Pod]) -> NodeUtilization {
    let allocatable = node
        .status
        .as_ref()
        .and_then(|status| status.allocatable.as_ref());
    let allocatable_cpu = allocatable
        .and_then(|m| m.get("cpu"))
        .map(parse_cpu_millis)
        .unwrap_or(0);
    let allocatable_memory = allocatable
        .and_then(|m| m.get("memory"))
        .map(parse_memory_bytes)
        .unwrap_or(0);
    let allocatable_pods = allocatable
        .and_then(|m| m.get("pods"))
        .map(parse_count)
        .unwrap_or(0);

    let mut cpu_request_millis = 0;
    let mut memory_request_bytes = 0;
    let mut pods_count = 0;

    for pod in pods {
        let phase = pod::phase(pod);
        if phase == pod::PHASE_SUCCEEDED || phase == pod::PHASE_FAILED {
            continue;
        }
        pods_count += 1;

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();
        for container in containers {
            let requests = container
                .resources
                .as_ref()
                .and_then(|resources| resources.requests.as_ref());
            if let Some(requests) = requests {
                if let Some(cpu) = requests.get("cpu") {
                    cpu_request_millis += parse_cpu_millis(cpu);
                }
                if let Some(memory) = requests.get("memory") {
                    memory_request_bytes += parse_memory_bytes(memory);
                }
            }
        }
    }

    NodeUtilization {
        node_name: node_name(node).to_string(),
        cpu_request_millis,
        memory_request_bytes,
        pods_count,
        cpu_percent: percent(cpu_request_millis, allocatable_cpu),
        memory_percent: percent(memory_request_bytes, allocatable_memory),
        pods_percent: percent(pods_count, allocatable_pods),
    }
}

/// Under-utilized: strictly below every threshold
pub fn is_under_utilized(utilization: &NodeUtilization, thresholds: &ResourceThresholds) -> bool {
    utilization.cpu_percent < thresholds.cpu
        && utilization.memory_percent < thresholds.memory
        && utilization.pods_percent < thresholds.pods
}

/// Over-utilized: strictly above any threshold
pub fn is_over_utilized(utilization: &NodeUtilization, thresholds: &ResourceThresholds) -> bool {
    utilization.cpu_percent > thresholds.cpu
        || utilization.memory_percent > thresholds.memory
        || utilization.pods_percent > thresholds.pods
}

fn percent(used: i64, allocatable: i64) -> i64 {
    if allocatable == 0 {
        return 0;
    }
    used * 100 / allocatable
}

/// Parse a CPU quantity into millicores: "100m" is 100, "2" is 2000.
pub fn parse_cpu_millis(quantity: &Quantity) -> i64 {
    let value = quantity.0.trim();
    if value.is_empty() {
        return 0;
    }

    if let Some(millis) = value.strip_suffix('m') {
        millis.parse::<i64>().unwrap_or(0)
    } else {
        value
            .parse::<f64>()
            .map(|cores| (cores * 1000.0).round() as i64)
            .unwrap_or(0)
    }
}

/// Parse a memory quantity into bytes, accepting binary (Ki..Ei) and
/// decimal (k..E) suffixes as well as plain byte counts.
pub fn parse_memory_bytes(quantity: &Quantity) -> i64 {
    const SUFFIXES: &[(&str, i64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let value = quantity.0.trim();
    if value.is_empty() {
        return 0;
    }

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return number
                .parse::<f64>()
                .map(|n| (n * *multiplier as f64) as i64)
                .unwrap_or(0);
        }
    }

    value.parse::<f64>().map(|n| n as i64).unwrap_or(0)
}

/// Parse a unitless count quantity (the `pods` capacity)
pub fn parse_count(quantity: &Quantity) -> i64 {
    quantity.0.trim().parse::<i64>().unwrap_or(0)
}
