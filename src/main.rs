use clap::Parser;
use scanfarm::cli::{self, Cli, Commands};
use scanfarm::config::{AppConfig, LoggingConfig};
use scanfarm::coordinator::Coordinator;
use scanfarm::scan::build_source;
use scanfarm::sink::FileSink;
use scanfarm::worker::{self, CommandEvaluator, Worker};
use scanfarm::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    match &cli.command {
        Commands::Serve { .. } => {
            init_logging(&config.logging);
            run_coordinator(config).await?;
        }
        Commands::Work { .. } => {
            init_logging(&config.logging);
            run_worker(config).await?;
        }
        Commands::ShowConfig => {
            init_logging_simple();
            cli::show_config(&config)?;
        }
        Commands::Count => {
            init_logging_simple();
            cli::count_points(&config)?;
        }
    }

    Ok(())
}

async fn run_coordinator(config: AppConfig) -> Result<()> {
    cli::ensure_valid(&config)?;

    let source = build_source(&config.scan)?;
    let sink = FileSink::new(&config.coordinator.output_dir)?;
    info!(
        "Writing results under {}",
        config.coordinator.output_dir.display()
    );

    let coordinator = Coordinator::bind(config, source, Box::new(sink)).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let summary = coordinator.run(shutdown_rx).await?;
    if !summary.is_complete() {
        info!("Run interrupted; restart with --start-index to resume");
    }
    Ok(())
}

async fn run_worker(config: AppConfig) -> Result<()> {
    let config = worker::bootstrap_config(config).await?;
    let evaluator = CommandEvaluator::from_config(&config.evaluator)?;
    let worker = Worker::new(&config, Arc::new(evaluator));

    match worker.run().await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Worker stopped: {}", e);
            Err(e)
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,scanfarm={}", logging.level)));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
