//! Coordinator server implementation
//!
//! Assembles the registry, the central delivery store, the event hub and the
//! auto-start scheduler behind one axum router.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::delivery::{SharedDeliveryStore, SqliteDeliveryStore};
use crate::scheduler::AutoStartScheduler;

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::events::{EventHub, DEFAULT_EVENT_BUFFER};
use super::live::{LiveProgressClient, LIVE_QUERY_TIMEOUT};
use super::registry::ClientRegistry;

/// Worker gauge refresh period
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Worker registry and assignment queue
    pub registry: Arc<ClientRegistry>,

    /// Central delivery store
    pub store: SharedDeliveryStore,

    /// Event intake
    pub events: Arc<EventHub>,

    /// Queries running delivery endpoints
    pub live: Arc<LiveProgressClient>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: CoordinatorConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main Coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a server, opening the store named in the config
    pub fn new(config: CoordinatorConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| ServerError::InitError(e.to_string()))?;
                }
                SqliteDeliveryStore::open(path)
            }
            None => SqliteDeliveryStore::in_memory(),
        }
        .map_err(|e| ServerError::InitError(e.to_string()))?;

        Self::with_store(config, Arc::new(store))
    }

    /// Create a server over an existing delivery store
    pub fn with_store(config: CoordinatorConfig, store: SharedDeliveryStore) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let registry = Arc::new(ClientRegistry::from_config(&config));
        let events = Arc::new(EventHub::new(store.clone(), DEFAULT_EVENT_BUFFER));
        let live = Arc::new(
            LiveProgressClient::new(LIVE_QUERY_TIMEOUT).map_err(|e| ServerError::InitError(e.to_string()))?,
        );

        let state = AppState {
            registry,
            store,
            events,
            live,
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Build the auto-start scheduler over this server's store and registry
    pub fn scheduler(&self) -> Arc<AutoStartScheduler> {
        Arc::new(AutoStartScheduler::new(
            self.state.store.clone(),
            self.state.registry.clone(),
            self.config.scheduler_interval(),
        ))
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener until `shutdown_signal` resolves
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        tracing::info!(address = %local, "Starting Coordinator server");

        let (stop_tx, stop_rx) = watch::channel(false);
        let background = self.start_background_tasks(stop_rx);

        let result = axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        let _ = stop_tx.send(true);
        for task in background {
            let _ = task.await;
        }

        tracing::info!("Coordinator server shutdown complete");
        result
    }

    fn start_background_tasks(&self, stop_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.config.scheduler_enabled {
            tasks.push(self.scheduler().spawn(stop_rx.clone()));
        }

        let registry = self.state.registry.clone();
        let mut gauge_stop = stop_rx;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.stats().await;
                    }
                    _ = gauge_stop.changed() => break,
                }
            }
        }));

        tracing::info!(scheduler = self.config.scheduler_enabled, "Background tasks started");
        tasks
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            liveness_window_secs: self.config.liveness_window_secs,
            queue_capacity: self.config.queue_capacity,
            scheduler_enabled: self.config.scheduler_enabled,
            scheduler_interval_secs: self.config.scheduler_interval_secs,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub liveness_window_secs: u64,
    pub queue_capacity: usize,
    pub scheduler_enabled: bool,
    pub scheduler_interval_secs: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let on_off = |b: bool| if b { "enabled" } else { "disabled" };
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Liveness Window: {}s\n\
             Queue Capacity: {}\n\
             Scheduler: {} (every {}s)\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.liveness_window_secs,
            self.queue_capacity,
            on_off(self.scheduler_enabled),
            self.scheduler_interval_secs,
            on_off(self.cors_enabled),
            on_off(self.request_logging_enabled),
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Failed to bind: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    ServeError(String),
}

// ============================================================================
// Tests
// ============================================================================
