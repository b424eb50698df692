//! Descheduler library
//!
//! This crate provides the policy engine of the cluster rebalancer:
//! - Cluster view helpers (node readiness, utilization, pod signatures)
//! - The eviction gatekeeper with per-cycle budgets
//! - The descheduling strategies
//! - The periodic controller loop
//! - Configuration, health tracking and observability

pub mod client;
pub mod config;
pub mod controller;
pub mod eviction;
pub mod health;
pub mod node;
pub mod observability;
pub mod pod;
pub mod strategies;
pub mod test_util;

pub use client::{ClusterClient, KubeClusterClient};
pub use config::DeschedulerConfig;
pub use controller::Descheduler;
pub use eviction::{EvictionStats, PodEvictor};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::DeschedulerMetrics;
