//! Metrics and monitoring for the queue-warden service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health probes and the metrics endpoint.

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics, ServiceMetrics, TickMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
