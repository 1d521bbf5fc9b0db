//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the queue service,
//! including readiness and liveness probes. The queue store is probed with a
//! real round trip, so an unreachable store shows up as unhealthy rather
//! than as an empty queue.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub instance_id: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Active entries in the shared queue; `None` if the store is unreachable
    pub players_queued: Option<usize>,
    /// Matches this instance handed off since start
    pub matches_formed: u64,
    /// Entries this instance removed through ticks since start
    pub players_matched: u64,
    /// Entries this instance expired since start
    pub entries_expired: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_service_running(&app_state).await);
        checks.push(Self::check_queue_store(&app_state).await);
        checks.push(Self::check_amqp_health(&app_state));

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status: Self::overall_status(&checks),
            service: app_state.config().service.name.clone(),
            instance_id: app_state.config().service.instance_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Worst status wins; a degraded component only degrades the service
    pub fn overall_status(checks: &[ComponentCheck]) -> HealthStatus {
        let mut overall = HealthStatus::Healthy;
        for check in checks {
            match check.status {
                HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
                HealthStatus::Degraded => overall = HealthStatus::Degraded,
                HealthStatus::Healthy => {}
            }
        }
        overall
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service must be running and reach its store
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_queue_store(&app_state).await.status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_queue_store(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.coordinator().store().size().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: "queue_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Lost AMQP only degrades the service; queue operations keep working
    fn check_amqp_health(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.amqp_connection() {
            None => (HealthStatus::Healthy, Some("publishing disabled".to_string())),
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection closed; events are not published".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let metrics = app_state.metrics_collector();

        let players_queued = match app_state.coordinator().store().size().await {
            Ok(size) => Some(size),
            Err(e) => {
                debug!("Failed to read queue size for health check: {}", e);
                None
            }
        };

        ServiceStats {
            players_queued,
            matches_formed: metrics.tick().matches_formed_total.get(),
            players_matched: metrics.tick().players_matched_total.get(),
            entries_expired: metrics.queue().expired_entries_total.get(),
            uptime_seconds: app_state.uptime().as_secs(),
        }
    }
}

impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: HealthStatus) -> ComponentCheck {
        ComponentCheck {
            name: "component".to_string(),
            status,
            message: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_overall_status_takes_the_worst_component() {
        assert_eq!(
            HealthCheck::overall_status(&[check(HealthStatus::Healthy)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthCheck::overall_status(&[
                check(HealthStatus::Healthy),
                check(HealthStatus::Degraded)
            ]),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthCheck::overall_status(&[
                check(HealthStatus::Degraded),
                check(HealthStatus::Unhealthy),
                check(HealthStatus::Healthy)
            ]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
