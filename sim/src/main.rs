//! PDSCH Link Simulator
//!
//! Runs transport blocks through the PDSCH encoder, a flat channel with white Gaussian
//! noise and the PDSCH decoder, and reports BLER, decoder iterations and RI/PMI
//! suggestions per SNR point as JSON.

mod config;
mod link;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::SimConfig;
use phy::Concurrency;

/// LTE PDSCH loopback simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// SNR points in dB, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    snr: Vec<f32>,

    /// Subframes per SNR point
    #[arg(long)]
    subframes: Option<u32>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Process every codeword on the calling thread
    #[arg(long)]
    sequential: bool,

    /// Write the JSON report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path.display());
            SimConfig::from_file(path)?
        }
        None => SimConfig::default(),
    };
    if !args.snr.is_empty() {
        config.snr_db = args.snr.clone();
    }
    if let Some(subframes) = args.subframes {
        config.nof_subframes = subframes;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.sequential {
        config.engine.concurrency = Concurrency::Sequential;
    }

    let cell = config.cell()?;
    let grant = config.grant()?;

    info!("Cell configuration:");
    info!("  PRB: {}", cell.nof_prb);
    info!("  Ports: {}", cell.nof_ports);
    info!("  PCI: {}", cell.id.0);
    info!("PDSCH configuration:");
    info!("  Scheme: {:?}", config.pdsch.mimo);
    info!("  MCS: {:?}, TBS: {:?}", config.pdsch.mcs, config.pdsch.tbs);
    info!("  Allocated PRB: {}", grant.nof_prb());
    info!("  Receive antennas: {}", config.channel.nof_rx);
    info!("  Channel: {:?}", config.channel.model);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut points = Vec::with_capacity(config.snr_db.len());
    for &snr_db in &config.snr_db {
        points.push(link::run_point(&config, cell, &grant, snr_db, &mut rng)?);
    }

    let report = link::Report { config, points };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    info!("Simulation complete");
    Ok(())
}
