//! Metrics collection for TriRed
//!
//! This module provides Prometheus metrics for the poll loop, control
//! commands and query dispatch.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics registry for TriRed
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub poller: PollerMetrics,
    pub dispatch: DispatchMetrics,
}

/// Registry refresh and control-command metrics
#[derive(Debug, Clone)]
pub struct PollerMetrics {
    /// Completed refresh cycles that published a snapshot
    pub refresh_total: IntCounter,

    /// Refresh cycles whose result was discarded (stale or torn down)
    pub refresh_discarded: IntCounter,

    /// Wall time of one refresh cycle
    pub refresh_duration: Histogram,

    /// Failed status polls, by node and failure kind
    pub poll_failures: IntCounterVec,

    /// Nodes reporting `running` in the latest snapshot
    pub nodes_running: IntGauge,

    /// 1 if the latest snapshot has a leader
    pub leader_present: IntGauge,

    /// Start/stop commands sent, by command
    pub commands_total: IntCounterVec,

    /// Start/stop commands that failed, by command
    pub command_failures: IntCounterVec,
}

/// Query dispatch metrics
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Dispatch attempts, by outcome (succeeded, failed, no_leader)
    pub dispatch_total: IntCounterVec,

    /// Dispatches not sent because another was in flight
    pub dispatch_rejected_busy: IntCounter,

    /// Leader round-trip time
    pub dispatch_duration: Histogram,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let refresh_total = IntCounter::new(
            "trired_refresh_total",
            "Total number of published registry refreshes",
        )
        .expect("valid metric");

        let refresh_discarded = IntCounter::new(
            "trired_refresh_discarded_total",
            "Refresh cycles discarded as stale or after shutdown",
        )
        .expect("valid metric");

        let refresh_duration = Histogram::with_opts(
            HistogramOpts::new(
                "trired_refresh_duration_seconds",
                "Registry refresh duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .expect("valid metric");

        let poll_failures = IntCounterVec::new(
            Opts::new("trired_poll_failures_total", "Failed node status polls"),
            &["node", "kind"],
        )
        .expect("valid metric");

        let nodes_running = IntGauge::new(
            "trired_nodes_running",
            "Nodes reporting running in the latest snapshot",
        )
        .expect("valid metric");

        let leader_present = IntGauge::new(
            "trired_leader_present",
            "Whether the latest snapshot contains a leader",
        )
        .expect("valid metric");

        let commands_total = IntCounterVec::new(
            Opts::new("trired_commands_total", "Start/stop commands sent"),
            &["command"],
        )
        .expect("valid metric");

        let command_failures = IntCounterVec::new(
            Opts::new("trired_command_failures_total", "Start/stop commands that failed"),
            &["command"],
        )
        .expect("valid metric");

        let dispatch_total = IntCounterVec::new(
            Opts::new("trired_dispatch_total", "Query dispatches by outcome"),
            &["outcome"],
        )
        .expect("valid metric");

        let dispatch_rejected_busy = IntCounter::new(
            "trired_dispatch_rejected_busy_total",
            "Dispatches refused while another was in flight",
        )
        .expect("valid metric");

        let dispatch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "trired_dispatch_duration_seconds",
                "Leader query round-trip in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .expect("valid metric");

        // Register all metrics
        registry.register(Box::new(refresh_total.clone())).expect("register metric");
        registry.register(Box::new(refresh_discarded.clone())).expect("register metric");
        registry.register(Box::new(refresh_duration.clone())).expect("register metric");
        registry.register(Box::new(poll_failures.clone())).expect("register metric");
        registry.register(Box::new(nodes_running.clone())).expect("register metric");
        registry.register(Box::new(leader_present.clone())).expect("register metric");
        registry.register(Box::new(commands_total.clone())).expect("register metric");
        registry.register(Box::new(command_failures.clone())).expect("register metric");

        registry.register(Box::new(dispatch_total.clone())).expect("register metric");
        registry.register(Box::new(dispatch_rejected_busy.clone())).expect("register metric");
        registry.register(Box::new(dispatch_duration.clone())).expect("register metric");

        let poller = PollerMetrics {
            refresh_total,
            refresh_discarded,
            refresh_duration,
            poll_failures,
            nodes_running,
            leader_present,
            commands_total,
            command_failures,
        };

        let dispatch = DispatchMetrics {
            dispatch_total,
            dispatch_rejected_busy,
            dispatch_duration,
        };

        MetricsRegistry {
            registry,
            poller,
            dispatch,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
