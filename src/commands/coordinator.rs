use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use examgrid::coordinator::{CoordinatorConfig, CoordinatorServer};

use super::shutdown::ShutdownSignals;

/// Command-line overrides for the coordinator
pub struct CoordinatorParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
    pub liveness_window: Option<u64>,
    pub scheduler_interval: Option<u64>,
    pub no_scheduler: bool,
    pub no_cors: bool,
}

impl CoordinatorParams {
    fn apply(self, mut config: CoordinatorConfig) -> Result<CoordinatorConfig> {
        if self.host.is_some() || self.port.is_some() {
            let host = self
                .host
                .unwrap_or_else(|| config.bind_address.ip().to_string());
            let port = self.port.unwrap_or(config.bind_address.port());
            config.bind_address = format!("{host}:{port}")
                .parse::<SocketAddr>()
                .context("Invalid bind address")?;
        }
        if let Some(path) = self.database {
            config.database_path = Some(path);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(secs) = self.liveness_window {
            config.liveness_window_secs = secs;
        }
        if let Some(secs) = self.scheduler_interval {
            config.scheduler_interval_secs = secs;
        }
        if self.no_scheduler {
            config.scheduler_enabled = false;
        }
        if self.no_cors {
            config.enable_cors = false;
        }

        config.validate().context("Invalid coordinator configuration")?;
        Ok(config)
    }
}

/// Run the coordinator until SIGINT or SIGTERM
pub async fn coordinator(base: CoordinatorConfig, params: CoordinatorParams) -> Result<()> {
    let config = params.apply(base)?;
    let signals = ShutdownSignals::install().context("Failed to install signal handlers")?;
    let server = CoordinatorServer::new(config.clone()).context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET    /api/health                                   - Health check");
    println!("  GET    /metrics                                      - Prometheus metrics");
    println!("  GET    /api/internal/exam-clients                    - List workers");
    println!("  POST   /api/internal/exam-clients/register           - Register worker");
    println!("  POST   /api/internal/exam-clients/{{id}}/status        - Status report");
    println!("  GET    /api/internal/exam-clients/{{id}}/assignments   - Poll assignment");
    println!("  DELETE /api/internal/exam-clients/{{id}}               - Unregister worker");
    println!("  POST   /api/internal/exam-clients/event              - Delivery event");
    println!("  POST   /api/internal/exam-clients/{{id}}/final-results - Final results");
    println!("  GET    /api/deliveries/{{id}}                          - Delivery detail");
    println!("  POST   /api/deliveries/{{id}}/control                  - start|stop|pause|resume");
    println!("  GET    /api/deliveries/{{id}}/results                  - Stored results");
    println!("  GET    /api/deliveries/{{id}}/live-progress            - Live progress");
    println!();
    println!("Coordinator listening on http://{}", config.bind_address);
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async move {
            signals.recv().await;
        })
        .await?;

    println!("Coordinator stopped.");
    Ok(())
}
