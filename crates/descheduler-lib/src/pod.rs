//! Pod view helpers
//!
//! Accessors over the raw API objects plus the signature used for duplicate
//! detection. Everything here is a pure function of the pod value.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_FAILED: &str = "Failed";
pub const PHASE_UNKNOWN: &str = "Unknown";

pub fn namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or_default()
}

pub fn name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// Cluster-wide pod key `namespace/name`
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", namespace(pod), name(pod))
}

pub fn node_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default()
}

pub fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

/// Platform-reported status reason, empty when unset
pub fn status_reason(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.reason.as_deref())
        .unwrap_or_default()
}

pub fn creation_timestamp(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn priority_class_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.priority_class_name.as_deref())
        .unwrap_or_default()
}

pub fn priority(pod: &Pod) -> Option<i32> {
    pod.spec.as_ref().and_then(|spec| spec.priority)
}

/// A pod counts as low priority when it has no priority class, no resolved
/// numeric priority, or a priority of zero or below.
pub fn is_low_priority(pod: &Pod) -> bool {
    priority_class_name(pod).is_empty() || priority(pod).map_or(true, |p| p <= 0)
}

pub fn owner_references(pod: &Pod) -> &[OwnerReference] {
    pod.metadata.owner_references.as_deref().unwrap_or_default()
}

/// True when any owner reference kind appears in `kinds`
pub fn has_excluded_owner_kind(pod: &Pod, kinds: &[String]) -> bool {
    owner_references(pod)
        .iter()
        .any(|owner| kinds.iter().any(|kind| kind == &owner.kind))
}

/// Container images, lexically sorted
pub fn container_images(pod: &Pod) -> Vec<String> {
    let mut images: Vec<String> = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|container| container.image.clone())
        .collect();
    images.sort();
    images
}

/// Signature for duplicate detection: namespace, each owner reference as
/// `Kind:Name` in its given order, then the sorted image list comma-joined,
/// all pipe-separated.
pub fn signature(pod: &Pod) -> String {
    let mut parts = vec![namespace(pod).to_string()];

    for owner in owner_references(pod) {
        parts.push(format!("{}:{}", owner.kind, owner.name));
    }

    parts.push(container_images(pod).join(","));
    parts.join("|")
}
