use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{coordinator, exam_client, CoordinatorParams, ExamClientParams};

#[derive(Parser)]
#[command(
    name = "examgrid",
    version,
    about = "Coordinator and exam-client workers for distributed exam deliveries",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (falls back to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator: registry, scheduler and REST API
    Coordinator {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(short, long)]
        port: Option<u16>,

        /// Central delivery store path
        #[arg(long)]
        database: Option<PathBuf>,

        /// Pending assignment limit
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Seconds without a status report before a worker is offline
        #[arg(long)]
        liveness_window: Option<u64>,

        /// Auto-start scheduler interval in seconds
        #[arg(long)]
        scheduler_interval: Option<u64>,

        /// Do not run the auto-start scheduler in this process
        #[arg(long, default_value = "false")]
        no_scheduler: bool,

        /// Disable CORS
        #[arg(long, default_value = "false")]
        no_cors: bool,
    },

    /// Run an exam-client worker
    ExamClient {
        /// Coordinator URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Worker identity
        #[arg(long)]
        client_id: Option<String>,

        /// Address advertised to the coordinator
        #[arg(long)]
        client_ip: Option<String>,

        /// Base port for delivery endpoints (0 = OS-assigned)
        #[arg(short, long)]
        port: Option<u16>,

        /// Concurrent delivery limit (0 = unlimited)
        #[arg(short, long)]
        max_deliveries: Option<u32>,

        /// Directory for per-delivery stores
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep store files after a successful export
        #[arg(long, default_value = "false")]
        retain_exported: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = examgrid::config::Config::load(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = examgrid::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    match cli.command {
        Commands::Coordinator {
            host,
            port,
            database,
            queue_capacity,
            liveness_window,
            scheduler_interval,
            no_scheduler,
            no_cors,
        } => {
            tracing::info!(host = ?host, port = ?port, database = ?database, "Starting coordinator command");
            coordinator(
                config.coordinator,
                CoordinatorParams {
                    host,
                    port,
                    database,
                    queue_capacity,
                    liveness_window,
                    scheduler_interval,
                    no_scheduler,
                    no_cors,
                },
            )
            .await?;
        }

        Commands::ExamClient {
            coordinator,
            client_id,
            client_ip,
            port,
            max_deliveries,
            data_dir,
            retain_exported,
        } => {
            tracing::info!(
                coordinator = ?coordinator,
                client_id = ?client_id,
                max_deliveries = ?max_deliveries,
                "Starting exam-client command"
            );
            exam_client(
                config.worker,
                ExamClientParams {
                    coordinator,
                    client_id,
                    client_ip,
                    port,
                    max_deliveries,
                    data_dir,
                    retain_exported,
                },
            )
            .await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("examgrid=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("examgrid={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
