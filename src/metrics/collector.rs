//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the queue service: queue
//! traffic, tick outcomes, expiry sweeps and event publishing.

use crate::matchmaking::scheduler::TickOutcome;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the queue service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue traffic metrics
    queue_metrics: QueueMetrics,

    /// Matchmaking tick metrics
    tick_metrics: TickMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Events handed to the publisher, by event and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue traffic metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Join attempts by outcome (joined, rejoined, already_queued, unknown_player, error)
    pub joins_total: IntCounterVec,

    /// Leave attempts by outcome (removed, not_queued, error)
    pub leaves_total: IntCounterVec,

    /// Active entries seen at the last position recompute
    pub active_entries: IntGauge,

    /// Entries removed by the expiry sweep
    pub expired_entries_total: IntCounter,

    /// Entries removed by an explicit clear
    pub cleared_entries_total: IntCounter,

    /// Wait estimates returned to joiners
    pub estimated_wait_seconds: Histogram,
}

/// Matchmaking tick metrics
#[derive(Clone)]
pub struct TickMetrics {
    /// Ticks by outcome (lock_unavailable, insufficient_players, matched, failed)
    pub ticks_total: IntCounterVec,

    /// Matches accepted by match creation
    pub matches_formed_total: IntCounter,

    /// Selected players dropped because their profile could not be resolved
    pub dropped_players_total: IntCounter,

    /// Match creation failures; the selected entries are removed regardless
    pub handoff_failures_total: IntCounter,

    /// Players taken out of the queue by ticks
    pub players_matched_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Coordinator operation durations
    pub queue_operation_duration: HistogramVec,

    /// Full tick duration, lock wait included
    pub tick_duration: Histogram,

    /// Expiry sweep duration
    pub sweep_duration: Histogram,

    /// Time spent waiting for the tick lock
    pub lock_wait_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let tick_metrics = TickMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            tick_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn tick(&self) -> &TickMetrics {
        &self.tick_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a join attempt
    pub fn record_join(&self, outcome: &str, duration: Duration) {
        self.queue_metrics
            .joins_total
            .with_label_values(&[outcome])
            .inc();
        self.record_queue_operation("join", duration);
    }

    /// Record a leave attempt
    pub fn record_leave(&self, outcome: &str, duration: Duration) {
        self.queue_metrics
            .leaves_total
            .with_label_values(&[outcome])
            .inc();
        self.record_queue_operation("leave", duration);
    }

    pub fn record_wait_estimate(&self, seconds: u64) {
        self.queue_metrics
            .estimated_wait_seconds
            .observe(seconds as f64);
    }

    pub fn set_active_entries(&self, count: usize) {
        self.queue_metrics.active_entries.set(count as i64);
    }

    /// Record one pass of the expiry sweep
    pub fn record_sweep(&self, expired: usize, duration: Duration) {
        self.queue_metrics
            .expired_entries_total
            .inc_by(expired as u64);
        self.performance_metrics
            .sweep_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_clear(&self, cleared: usize) {
        self.queue_metrics
            .cleared_entries_total
            .inc_by(cleared as u64);
    }

    /// Record a completed tick
    pub fn record_tick(&self, outcome: &TickOutcome, duration: Duration) {
        self.tick_metrics
            .ticks_total
            .with_label_values(&[outcome.label()])
            .inc();

        if let TickOutcome::Matched(report) = outcome {
            self.tick_metrics
                .players_matched_total
                .inc_by(report.removed as u64);
            self.tick_metrics
                .dropped_players_total
                .inc_by(report.dropped.len() as u64);
            if report.match_handle.is_some() {
                self.tick_metrics.matches_formed_total.inc();
            } else {
                self.tick_metrics.handoff_failures_total.inc();
            }
        }

        self.performance_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a tick that ended in an error before completing
    pub fn record_tick_failure(&self, duration: Duration) {
        self.tick_metrics
            .ticks_total
            .with_label_values(&["failed"])
            .inc();
        self.performance_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_lock_wait(&self, duration: Duration) {
        self.performance_metrics
            .lock_wait_duration
            .observe(duration.as_secs_f64());
    }

    /// Record coordinator operation duration
    pub fn record_queue_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .queue_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record an event publish attempt
    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("queue_warden_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "queue_warden_events_published_total",
                "Queue events handed to the publisher",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "queue_warden_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("queue_warden_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("queue_warden_joins_total", "Join attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let leaves_total = IntCounterVec::new(
            Opts::new("queue_warden_leaves_total", "Leave attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(leaves_total.clone()))?;

        let active_entries = IntGauge::new(
            "queue_warden_active_entries",
            "Active queue entries at the last recompute",
        )?;
        registry.register(Box::new(active_entries.clone()))?;

        let expired_entries_total = IntCounter::new(
            "queue_warden_expired_entries_total",
            "Entries removed by the expiry sweep",
        )?;
        registry.register(Box::new(expired_entries_total.clone()))?;

        let cleared_entries_total = IntCounter::new(
            "queue_warden_cleared_entries_total",
            "Entries removed by an explicit clear",
        )?;
        registry.register(Box::new(cleared_entries_total.clone()))?;

        let estimated_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "queue_warden_estimated_wait_seconds",
                "Wait estimates returned to joiners",
            )
            .buckets(vec![0.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0]),
        )?;
        registry.register(Box::new(estimated_wait_seconds.clone()))?;

        Ok(Self {
            joins_total,
            leaves_total,
            active_entries,
            expired_entries_total,
            cleared_entries_total,
            estimated_wait_seconds,
        })
    }
}

impl TickMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ticks_total = IntCounterVec::new(
            Opts::new("queue_warden_ticks_total", "Matchmaking ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let matches_formed_total = IntCounter::new(
            "queue_warden_matches_formed_total",
            "Matches accepted by match creation",
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let dropped_players_total = IntCounter::new(
            "queue_warden_dropped_players_total",
            "Selected players whose profile could not be resolved",
        )?;
        registry.register(Box::new(dropped_players_total.clone()))?;

        let handoff_failures_total = IntCounter::new(
            "queue_warden_handoff_failures_total",
            "Match creation failures",
        )?;
        registry.register(Box::new(handoff_failures_total.clone()))?;

        let players_matched_total = IntCounter::new(
            "queue_warden_players_matched_total",
            "Entries removed from the queue by ticks",
        )?;
        registry.register(Box::new(players_matched_total.clone()))?;

        Ok(Self {
            ticks_total,
            matches_formed_total,
            dropped_players_total,
            handoff_failures_total,
            players_matched_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "queue_warden_queue_operation_duration_seconds",
                "Queue operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(queue_operation_duration.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "queue_warden_tick_duration_seconds",
                "Matchmaking tick duration",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "queue_warden_sweep_duration_seconds",
                "Expiry sweep duration",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        let lock_wait_duration = Histogram::with_opts(
            HistogramOpts::new(
                "queue_warden_lock_wait_duration_seconds",
                "Time spent waiting for the tick lock",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;
        registry.register(Box::new(lock_wait_duration.clone()))?;

        Ok(Self {
            queue_operation_duration,
            tick_duration,
            sweep_duration,
            lock_wait_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
