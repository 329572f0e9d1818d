use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};
use tracing::info;

use vxmon::config::Config;
use vxmon::models::Detection;
use vxmon::store::{DetectionStore, SqliteStore};

#[derive(Parser)]
#[command(name = "vxmon")]
#[command(author, version, about = "VXLAN traffic-mirroring sensor with flow classification")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the configuration named on the command line, or search the
    /// default locations. Environment overrides apply either way.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => {
                let mut config = Config::load(path)?;
                config.apply_env();
                Ok(config)
            }
            None => Config::load_or_default(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sensor in the foreground
    Run {
        /// Override the UDP listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the worker count (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Query stored detections for a tenant
    Detections {
        /// Tenant identifier (e.g. TENANT#7)
        tenant: String,

        /// Range start, epoch milliseconds (default: 24h ago)
        #[arg(long)]
        start_ms: Option<i64>,

        /// Range end, epoch milliseconds (default: now)
        #[arg(long)]
        end_ms: Option<i64>,

        /// Maximum rows returned
        #[arg(short, long, default_value = "50")]
        limit: u32,

        /// Output format (table, json, simple)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Print the effective configuration
    Config,
}

pub async fn run_command(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run { port, workers } => cmd_run(config, port, workers).await,
        Commands::Detections {
            tenant,
            start_ms,
            end_ms,
            limit,
            format,
        } => cmd_detections(config, &tenant, start_ms, end_ms, limit, &format),
        Commands::Config => cmd_config(&config),
    }
}

async fn cmd_run(mut config: Config, port: Option<u16>, workers: Option<usize>) -> Result<()> {
    if let Some(port) = port {
        config.sensor.port = port;
    }
    if let Some(workers) = workers {
        config.sensor.workers = workers;
    }

    let mut sensor = vxmon::build_sensor(config)?;
    sensor.start()?;

    let mut interval = tokio::time::interval(Duration::from_secs(10));
    interval.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                let stats = sensor.stats();
                info!(
                    rx = stats.rx_packets,
                    handled = stats.handled_packets,
                    flushed = stats.flushed_windows,
                    dropped = stats.dropped_full_queue,
                    errors = stats.rx_errors,
                    queue = stats.queue_depth,
                    flows = stats.active_flows,
                    "Pipeline stats"
                );
            }
        }
    }

    sensor.stop();
    Ok(())
}

fn cmd_detections(
    config: Config,
    tenant: &str,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    limit: u32,
    format: &str,
) -> Result<()> {
    let end_ms = end_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
    let start_ms = start_ms.unwrap_or(end_ms - 24 * 3600 * 1000);

    let store = SqliteStore::open(config.db_path())
        .with_context(|| format!("Failed to open detection store: {}", config.store.db_path))?;
    let detections = store.query(tenant, start_ms, end_ms, limit)?;

    if detections.is_empty() {
        println!("No detections for {} in range", tenant);
        return Ok(());
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&detections)?);
        }
        "simple" => {
            for det in &detections {
                println!(
                    "{} {} score={:.2} {}",
                    det.ts_ms, det.flow, det.verdict.score, det.verdict.label
                );
            }
        }
        _ => {
            let rows: Vec<DetectionRow> = detections.iter().map(DetectionRow::from).collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Time (UTC)")]
    time: String,
    #[tabled(rename = "Flow")]
    flow: String,
    #[tabled(rename = "Pkts")]
    pkts: u64,
    #[tabled(rename = "Bytes")]
    bytes: u64,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
}

impl From<&Detection> for DetectionRow {
    fn from(det: &Detection) -> Self {
        let time = det
            .recorded_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| det.ts_ms.to_string());

        let verdict = if det.verdict.is_malicious() {
            det.verdict.label.to_string().red().bold().to_string()
        } else {
            det.verdict.label.to_string().green().to_string()
        };

        Self {
            time,
            flow: det.flow.to_string(),
            pkts: det.features.pkts,
            bytes: det.features.bytes,
            score: format!("{:.2}", det.verdict.score),
            verdict,
        }
    }
}
