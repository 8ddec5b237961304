use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use examgrid::worker::{ExamClient, WorkerConfig};

use super::shutdown::ShutdownSignals;

/// Command-line overrides for an exam-client worker
pub struct ExamClientParams {
    pub coordinator: Option<String>,
    pub client_id: Option<String>,
    pub client_ip: Option<String>,
    pub port: Option<u16>,
    pub max_deliveries: Option<u32>,
    pub data_dir: Option<PathBuf>,
    pub retain_exported: bool,
}

impl ExamClientParams {
    fn apply(self, mut config: WorkerConfig) -> Result<WorkerConfig> {
        if let Some(url) = self.coordinator {
            config.coordinator_url = url;
        }
        if let Some(id) = self.client_id {
            config.client_id = id;
        }
        if let Some(ip) = self.client_ip {
            config.client_ip = ip;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_deliveries {
            config.max_deliveries = max;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if self.retain_exported {
            config.retain_exported_stores = true;
        }

        config.validate().context("Invalid exam-client configuration")?;
        Ok(config)
    }
}

/// Run a worker until SIGINT or SIGTERM, then drain its instances and unregister
pub async fn exam_client(base: WorkerConfig, params: ExamClientParams) -> Result<()> {
    let config = params.apply(base)?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir: {}", config.data_dir.display()))?;

    println!("{}", config.display());
    println!();

    let signals = ShutdownSignals::install().context("Failed to install signal handlers")?;
    let worker = Arc::new(ExamClient::new(config).context("Failed to create exam client")?);

    // Registration failure is fatal
    let handle = worker
        .start()
        .await
        .context("Failed to register with coordinator")?;

    println!("Exam client running. Press Ctrl+C to stop.\n");

    let name = signals.recv().await;
    println!("\n{name} received, stopping...");

    handle.shutdown().await;
    worker.shutdown().await;

    println!(
        "Exam client stopped after processing {} deliveries.",
        worker.total_processed()
    );
    Ok(())
}
