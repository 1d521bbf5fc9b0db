//! Service layer for the queue-warden service
//!
//! This module contains the main application state, the queue HTTP API,
//! health checks and background task management for the production service.

pub mod api;
pub mod app;
pub mod health;

pub use api::{router, ApiError};
pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus, ServiceStats};
