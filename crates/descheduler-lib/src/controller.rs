//! Controller loop
//!
//! Orchestrates the periodic descheduling cycle: discover nodes, filter by
//! readiness, schedulability and the node selector, reset the gatekeeper,
//! run each enabled strategy in order, then emit the cycle statistics.

use crate::client::ClusterClient;
use crate::config::DeschedulerConfig;
use crate::eviction::{EvictionStats, PodEvictor};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::node;
use crate::observability::DeschedulerMetrics;
use crate::strategies::{build_strategies, Strategy};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Descheduler {
    client: Arc<dyn ClusterClient>,
    config: Arc<DeschedulerConfig>,
    evictor: Arc<PodEvictor>,
    strategies: Vec<Box<dyn Strategy>>,
    health: HealthRegistry,
    metrics: DeschedulerMetrics,
}

impl Descheduler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: Arc<DeschedulerConfig>,
        health: HealthRegistry,
    ) -> Self {
        let evictor = Arc::new(PodEvictor::new(
            client.clone(),
            config.dry_run,
            config.limits.clone(),
        ));
        let strategies = build_strategies(&config, client.clone(), evictor.clone());

        let enabled: Vec<&str> = strategies
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.name())
            .collect();
        info!("Created descheduler with {} enabled strategies", enabled.len());
        for name in &enabled {
            info!("  - {}", name);
        }

        Self {
            client,
            config,
            evictor,
            strategies,
            health,
            metrics: DeschedulerMetrics::new(),
        }
    }

    /// Execute cycles until cancellation. An interval of zero runs exactly
    /// one cycle and returns. Cycle failures are logged and do not stop the
    /// loop; cancellation is a clean stop.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Starting descheduler");
        info!(
            "Configuration: DryRun={}, Interval={}s",
            self.config.dry_run, self.config.interval
        );
        if self.config.dry_run {
            info!("Running in DRY RUN mode - no pods will actually be evicted");
        }

        if self.config.interval == 0 {
            return self.run_once(cancel).await;
        }

        if let Err(err) = self.run_once(cancel).await {
            error!("Initial run failed: {:#}", err);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Descheduler stopped by cancellation");
                    return Ok(());
                }
                // the sleep starts after the previous cycle returned, so a
                // cycle overrunning the interval never piles up
                _ = tokio::time::sleep(self.config.interval()) => {
                    if let Err(err) = self.run_once(cancel).await {
                        error!("Descheduling cycle failed: {:#}", err);
                    }
                }
            }
        }
    }

    /// Execute one descheduling cycle
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<()> {
        let start = Instant::now();
        info!("=== Starting descheduling cycle ===");

        self.evictor.reset().await;

        let result = self.execute_cycle(cancel).await;
        match &result {
            Ok(()) => {
                self.health
                    .update(components::CONTROLLER, ComponentHealth::healthy())
                    .await;
            }
            Err(err) => {
                self.health
                    .update(
                        components::CONTROLLER,
                        ComponentHealth::degraded(format!("{err:#}")),
                    )
                    .await;
            }
        }

        let stats = self.evictor.stats().await;
        self.print_cycle_stats(start, &stats);
        self.metrics.record_cycle(
            start.elapsed().as_secs_f64(),
            stats.total_evicted as u64,
            stats.failed_evictions as u64,
        );

        info!("=== Descheduling cycle completed ===");
        result
    }

    /// Current cycle statistics
    pub async fn stats(&self) -> EvictionStats {
        self.evictor.stats().await
    }

    async fn execute_cycle(&self, cancel: &CancellationToken) -> Result<()> {
        let nodes = self
            .client
            .list_nodes()
            .await
            .context("failed to get available nodes")?;

        let available: Vec<Node> = nodes
            .into_iter()
            .filter(|n| {
                let ready = node::is_ready(n);
                let schedulable = node::is_schedulable(n);
                if !(ready && schedulable) {
                    debug!(
                        "Node {} is not available (ready={}, schedulable={})",
                        node::node_name(n),
                        ready,
                        schedulable
                    );
                }
                ready && schedulable
            })
            .collect();

        info!("Found {} available nodes", available.len());
        if available.len() < 2 {
            info!(
                "Need at least 2 nodes for descheduling, found {}. Skipping cycle.",
                available.len()
            );
            return Ok(());
        }

        let filtered: Vec<Node> = available
            .into_iter()
            .filter(|n| {
                let matches = node::matches_selector(n, &self.config.node_selector);
                if !matches {
                    debug!("Node {} does not match node selector", node::node_name(n));
                }
                matches
            })
            .collect();

        info!("After node selector filtering: {} nodes", filtered.len());
        if filtered.is_empty() {
            info!("No nodes match the node selector. Skipping cycle.");
            return Ok(());
        }

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                break;
            }
            if !strategy.is_enabled() {
                continue;
            }

            info!("--- Executing strategy: {} ---", strategy.name());
            let strategy_start = Instant::now();

            match strategy.execute(cancel, &filtered).await {
                Ok(()) => {
                    info!(
                        "Strategy {} completed in {:?}",
                        strategy.name(),
                        strategy_start.elapsed()
                    );
                }
                Err(err) => {
                    error!("Strategy {} failed: {:#}", strategy.name(), err);
                }
            }
        }

        Ok(())
    }

    fn print_cycle_stats(&self, start: Instant, stats: &EvictionStats) {
        info!("=== Cycle Statistics ===");
        info!("Duration: {:?}", start.elapsed());
        info!("Total evicted: {}", stats.total_evicted);
        info!("Failed evictions: {}", stats.failed_evictions);

        if !stats.evicted_by_node.is_empty() {
            info!("Evictions by node:");
            for (node_name, count) in &stats.evicted_by_node {
                info!("  {}: {}", node_name, count);
            }
        }

        if !stats.evicted_by_namespace.is_empty() {
            info!("Evictions by namespace:");
            for (namespace, count) in &stats.evicted_by_namespace {
                info!("  {}: {}", namespace, count);
            }
        }

        if !stats.evicted_by_reason.is_empty() {
            info!("Evictions by reason:");
            for (reason, count) in &stats.evicted_by_reason {
                info!("  {}: {}", reason, count);
            }
        }
    }
}
