use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::{Result, ScanError};
use crate::scan::build_source;

#[derive(Parser)]
#[command(name = "scanfarm")]
#[command(version = "0.1.0")]
#[command(about = "Distribute parameter scan points to pull-based workers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (defaults to config/default.toml plus SCANFARM_ENV overlay)
    #[arg(short, long, env = "SCANFARM_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory for the per-channel output files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Skip this many scan points (resume a partial run)
        #[arg(long)]
        start_index: Option<u64>,
    },
    /// Run a worker against a coordinator
    Work {
        /// Coordinator host
        #[arg(long)]
        host: Option<String>,
        /// Coordinator port
        #[arg(short, long)]
        port: Option<u16>,
        /// Fixed or initial batch size
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Target compute seconds per batch (0 = fixed batch size)
        #[arg(long)]
        busy_secs: Option<f64>,
        /// Use the local evaluator settings instead of the coordinator's
        #[arg(long)]
        no_bootstrap: bool,
    },
    /// Print the resolved configuration as TOML
    ShowConfig,
    /// Print how many scan points the configured source yields
    Count,
}

impl Cli {
    /// Load the configuration and apply command-line overrides.
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_file(path)?,
            None => AppConfig::load()?,
        };
        apply_overrides(&self.command, &mut config);
        Ok(config)
    }
}

pub fn apply_overrides(command: &Commands, config: &mut AppConfig) {
    match command {
        Commands::Serve {
            port,
            output_dir,
            start_index,
        } => {
            if let Some(port) = port {
                config.coordinator.port = *port;
            }
            if let Some(dir) = output_dir {
                config.coordinator.output_dir = dir.clone();
            }
            if let Some(index) = start_index {
                config.coordinator.start_index = *index;
            }
        }
        Commands::Work {
            host,
            port,
            batch_size,
            busy_secs,
            no_bootstrap,
        } => {
            if let Some(host) = host {
                config.worker.host = host.clone();
            }
            if let Some(port) = port {
                config.worker.port = *port;
            }
            if let Some(size) = batch_size {
                config.worker.default_batch_size = *size;
            }
            if let Some(secs) = busy_secs {
                config.worker.nominal_busy_secs = *secs;
            }
            if *no_bootstrap {
                config.worker.fetch_config = false;
            }
        }
        Commands::ShowConfig | Commands::Count => {}
    }
}

/// Fail with every validation problem at once.
pub fn ensure_valid(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|errors| ScanError::InvalidConfig(errors.join("; ")))
}

pub fn show_config(config: &AppConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn count_points(config: &AppConfig) -> Result<()> {
    let source = build_source(&config.scan)?;
    match source.point_count() {
        Some(total) => println!("{}", total),
        None => println!("unknown"),
    }
    Ok(())
}
