//! Command-line entry point for the Tekir bot.
//!
//! Parses arguments, loads the configuration and runs the bot until the
//! process is terminated. See the crate documentation for an overview of
//! the bot itself.
//!
//! # Usage
//!
//! ```bash
//! tekir --config config.yaml --data ./tekir-data
//! ```
//!
//! The data directory holds the persistent store: the cached access token,
//! the sync cursor and the processed-event records. Deleting it makes the
//! bot start from the current server state and forget which events it
//! already acknowledged.
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)
//! - `TEKIR_*` - Configuration overrides, e.g. `TEKIR_MATRIX__BOT_PASSWORD`

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use tekir::{bot::Bot, config::Config, store::FileStore};

/// Command-line arguments for the Tekir bot.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// Values can be overridden with `TEKIR_`-prefixed environment
    /// variables.
    #[arg(short, long)]
    config: String,

    /// Path to the directory for persistent state.
    ///
    /// Holds the token cache, the sync cursor and the processed-event
    /// records. The directory must exist.
    #[arg(short, long)]
    data: String,

    /// Long-poll timeout in seconds for the sync endpoint.
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Run a single sync iteration and exit, for diagnostics.
    #[arg(long)]
    once: bool,
}

/// Main entry point for the Tekir bot.
///
/// Initializes logging, parses arguments, loads the configuration and runs
/// the bot. Configuration errors are logged and end the process cleanly;
/// runtime errors are handled inside the sync loop and never end it.
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting tekir {}...", env!("CARGO_PKG_VERSION"));

    // Parse command line arguments
    let args = Args::parse();

    // Load configuration from YAML file with environment variable overrides
    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            return;
        }
    };

    let store_path = Path::new(&args.data).join("store");
    let store = Arc::new(FileStore::new(store_path.to_string_lossy().into_owned()));

    let bot = Bot::new(&config, store, args.timeout, args.once);
    bot.start().await;
}
