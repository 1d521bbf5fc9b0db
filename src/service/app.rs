//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the queue store,
//! tick lock, collaborators and background tasks together.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, NullEventPublisher, PublisherConfig};
use crate::config::{AppConfig, StoreBackend};
use crate::lock::{InMemoryTickLock, RedisTickLock, TickLock};
use crate::matchmaking::{PublishingMatchCreation, SchedulerConfig, TickScheduler};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::players::{InMemoryPlayerDirectory, OpenPlayerLookup, PlayerLookup};
use crate::queue::{CoordinatorConfig, InMemoryQueueStore, QueueCoordinator, QueueStore, RedisQueueStore};
use crate::service::api;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Queue store error: {message}")]
    Store { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Queue operations over the shared store
    coordinator: Arc<QueueCoordinator>,

    /// Periodic tick and expiry sweep
    scheduler: Arc<TickScheduler>,

    /// AMQP connection, absent when publishing is disabled
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Metrics collector shared by every component
    metrics_collector: Arc<MetricsCollector>,

    /// Health and metrics HTTP server, created on start
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Shutdown signal for the queue API server
    api_shutdown: broadcast::Sender<()>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!(
            "Initializing queue service '{}' (instance {})",
            config.service.name, config.service.instance_id
        );
        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (store, tick_lock) = Self::initialize_store(&config).await?;
        let lookup = Self::initialize_lookup(&config)?;
        let (event_publisher, amqp_connection) = Self::initialize_publisher(&config).await?;

        let coordinator = Arc::new(QueueCoordinator::with_metrics(
            store,
            lookup,
            event_publisher.clone(),
            CoordinatorConfig::from(&config.matchmaking),
            metrics_collector.clone(),
        ));

        let match_creation = Arc::new(PublishingMatchCreation::new(
            event_publisher,
            &config.service.instance_id,
            config.publish_timeout(),
        ));

        let scheduler = Arc::new(TickScheduler::new(
            coordinator.clone(),
            tick_lock,
            match_creation,
            SchedulerConfig::from(&config.matchmaking),
        ));

        let (api_shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            coordinator,
            scheduler,
            amqp_connection,
            metrics_collector,
            health_server: Mutex::new(None),
            api_shutdown,
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start HTTP servers and the periodic tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting queue service");

        *self.is_running.write().await = true;

        self.start_health_server().await?;
        self.start_api_server().await?;
        self.start_background_tasks().await;

        info!("✅ Queue service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of queue service");

        *self.is_running.write().await = false;

        if self.api_shutdown.send(()).is_err() {
            debug!("Queue API server was not listening");
        }

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            } else {
                info!("✅ Health server stopped");
            }
        }

        self.stop_background_tasks().await;

        match self.coordinator.store().size().await {
            Ok(active) => info!("Queue size at shutdown: {}", active),
            Err(e) => warn!("Could not read queue size at shutdown: {}", e),
        }
        info!("✅ Queue service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn coordinator(&self) -> Arc<QueueCoordinator> {
        self.coordinator.clone()
    }

    pub fn scheduler(&self) -> Arc<TickScheduler> {
        self.scheduler.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// AMQP connection for health checks; `None` when publishing is disabled
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    async fn initialize_store(
        config: &AppConfig,
    ) -> Result<(Arc<dyn QueueStore>, Arc<dyn TickLock>), ServiceError> {
        match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory queue store and tick lock (single instance only)");
                Ok((
                    Arc::new(InMemoryQueueStore::new(config.entry_ttl())),
                    Arc::new(InMemoryTickLock::new()),
                ))
            }
            StoreBackend::Redis => {
                let store = RedisQueueStore::connect(
                    &config.store.redis_url,
                    &config.store.key_prefix,
                    config.entry_ttl(),
                    config.store_operation_timeout(),
                )
                .await
                .map_err(|e| ServiceError::Store {
                    message: format!("Failed to connect to Redis: {}", e),
                })?;

                store.ping().await.map_err(|e| ServiceError::Store {
                    message: format!("Redis did not answer PING: {}", e),
                })?;

                let lock = RedisTickLock::new(
                    store.connection(),
                    &config.store.key_prefix,
                    config.store_operation_timeout(),
                );
                info!(
                    "Using Redis queue store at {} (prefix '{}')",
                    config.store.redis_url, config.store.key_prefix
                );
                Ok((Arc::new(store), Arc::new(lock)))
            }
        }
    }

    fn initialize_lookup(config: &AppConfig) -> Result<Arc<dyn PlayerLookup>, ServiceError> {
        match &config.lookup.profiles_file {
            Some(path) => {
                let directory =
                    InMemoryPlayerDirectory::from_file(path).map_err(|e| {
                        ServiceError::Initialization {
                            message: format!("Failed to load player profiles: {}", e),
                        }
                    })?;
                Ok(Arc::new(directory))
            }
            None => {
                warn!("No profiles file configured; every non-empty identity will resolve");
                Ok(Arc::new(OpenPlayerLookup))
            }
        }
    }

    async fn initialize_publisher(
        config: &AppConfig,
    ) -> Result<(Arc<dyn EventPublisher>, Option<Arc<AmqpConnection>>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP publishing disabled");
            return Ok((Arc::new(NullEventPublisher), None));
        }

        info!("Connecting to AMQP broker: {}", config.amqp.url);
        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;

        let publisher = AmqpEventPublisher::new(channel, PublisherConfig::from(&config.amqp))
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok((Arc::new(publisher), Some(Arc::new(connection))))
    }

    async fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let health_config = HealthServerConfig {
            port: self.config.service.metrics_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(server.clone());

        let port = self.config.service.metrics_port;
        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            } else {
                info!("Health server task completed");
            }
        });
        self.background_tasks.lock().await.push(handle);

        info!("✅ Health and metrics endpoints on port {}", port);
        Ok(())
    }

    async fn start_api_server(&self) -> Result<(), ServiceError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.service.http_port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to bind queue API on {}: {}", addr, e),
            })?;

        let router = api::router(self.coordinator.clone());
        let mut shutdown_rx = self.api_shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("Queue API shutdown signal received");
                })
                .await;
            if let Err(e) = served {
                error!("Queue API server failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);

        info!("✅ Queue API listening on http://{}", addr);
        Ok(())
    }

    /// Start the tick, sweep and health metric tasks
    async fn start_background_tasks(&self) {
        info!("Starting background tasks...");

        let tick_task = self
            .scheduler
            .clone()
            .start_tick_task(self.is_running.clone());
        let sweep_task = self
            .scheduler
            .clone()
            .start_sweep_task(self.is_running.clone());

        let health_metrics_task = {
            let metrics_collector = self.metrics_collector.clone();
            let coordinator = self.coordinator.clone();
            let is_running = self.is_running.clone();
            let amqp_connection = self.amqp_connection.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(started_at.elapsed().as_secs() as i64);

                    let store_ok = coordinator.store().size().await.is_ok();
                    let amqp_ok = amqp_connection
                        .as_ref()
                        .map(|connection| connection.is_alive())
                        .unwrap_or(true);

                    metrics_collector.update_component_health("queue_store", store_ok);
                    metrics_collector.update_component_health("amqp", amqp_ok);
                    let status = match (store_ok, amqp_ok) {
                        (true, true) => 2,
                        (true, false) => 1,
                        _ => 0,
                    };
                    metrics_collector.update_health_status(status);
                    debug!(
                        "Updated health metrics - store: {}, amqp: {}",
                        store_ok, amqp_ok
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(tick_task);
        tasks.push(sweep_task);
        tasks.push(health_metrics_task);

        info!(
            "Background tasks started - tick every {}s, sweep every {}s",
            self.config.matchmaking.tick_interval_seconds,
            self.config.matchmaking.sweep_interval_seconds
        );
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.amqp.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_offline_app_state_initializes() {
        let state = AppState::new(offline_config()).await.unwrap();

        assert!(!state.is_running().await);
        assert!(state.amqp_connection().is_none());
        assert_eq!(state.coordinator().store().size().await.unwrap(), 0);
        assert_eq!(state.scheduler().config().team_size, 5);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = offline_config();
        config.matchmaking.team_size = 0;

        assert!(matches!(
            AppState::new(config).await,
            Err(ServiceError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_profiles_file_fails_initialization() {
        let mut config = offline_config();
        config.lookup.profiles_file = Some("/nonexistent/profiles.json".into());

        assert!(matches!(
            AppState::new(config).await,
            Err(ServiceError::Initialization { .. })
        ));
    }
}
