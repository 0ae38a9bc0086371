//! dfp - Device Family Pack inspector
//!
//! Lists the devices of a pack and shows a device's resolved memory map
//! and debug topology.

mod config;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dfp_core::{FlashAlgoDecoder, FlashAlgoIndex, Pack};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Config, OutputFormat};
use report::DeviceReport;

#[derive(Parser, Debug)]
#[command(name = "dfp")]
#[command(about = "Inspect devices described by CMSIS Device Family Packs")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dfp.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the devices of a pack
    List {
        /// Pack directory, .pdsc file or .pack archive
        pack: PathBuf,
    },
    /// Show the memory map and debug topology of one device
    Show {
        /// Pack directory, .pdsc file or .pack archive
        pack: PathBuf,
        /// Part number of the device or variant
        part: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(&args.config)?;

    // Initialize logging
    let level_name = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let level = match level_name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("dfp v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::List { pack } => {
            let pack = open_pack(&pack, &config)?;
            print!("{}", report::list_devices(&pack));
        }
        Command::Show { pack, part, json } => {
            let pack = open_pack(&pack, &config)?;
            let device = pack
                .device(&part)
                .with_context(|| format!("Device '{}' not found in pack", part))?;
            let report = DeviceReport::new(device);
            if json || config.output.format == OutputFormat::Json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.to_text());
            }
        }
    }

    Ok(())
}

fn open_pack(path: &Path, config: &Config) -> Result<Pack> {
    let decoder: Option<Arc<dyn FlashAlgoDecoder>> = match &config.algorithms.index {
        Some(index) => {
            let index = FlashAlgoIndex::from_file(index).with_context(|| {
                format!("Failed to load algorithm index {}", index.display())
            })?;
            info!(algorithms = index.algorithm.len(), "Loaded flash algorithm index");
            Some(Arc::new(index))
        }
        None => None,
    };

    Pack::open_with(path, decoder)
        .with_context(|| format!("Failed to open pack {}", path.display()))
}
