mod config;
mod replay;
mod serve;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vnf_ledger_engine::ManualClock;

use crate::config::LedgerConfig;

/// VNF lifecycle ledger.
#[derive(Parser)]
#[command(name = "vnf-ledger", version, about = "VNF lifecycle ledger")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ledger HTTP API server
    Serve {
        /// Port to listen on (overrides the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Apply a JSON-lines call log to a fresh ledger and print the outcomes
    Replay {
        /// Path to the call log (one JSON call per line)
        script: PathBuf,
        /// Exit non-zero if any call is rejected or malformed
        #[arg(long)]
        strict: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match LedgerConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { port } => {
            let rt = runtime();
            if let Err(e) = rt.block_on(serve::start_server(&config, port)) {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Commands::Replay { script, strict } => {
            cmd_replay(&config, &script, strict);
        }
        Commands::Config => match config.to_redacted_toml() {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("error: cannot render configuration: {}", e);
                process::exit(1);
            }
        },
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    }
}

fn cmd_replay(config: &LedgerConfig, script_path: &Path, strict: bool) {
    let script = match std::fs::read_to_string(script_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", script_path.display(), e);
            process::exit(1);
        }
    };
    let clock = Arc::new(ManualClock::new(replay::REPLAY_EPOCH));
    let mut engine = match config.build_engine() {
        Ok(engine) => engine.with_clock(clock.clone()),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let rt = runtime();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = match rt.block_on(replay::run(&mut engine, &clock, &script, &mut out)) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("error: cannot write output: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(
        applied = summary.applied,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "replay finished"
    );
    if strict && !summary.is_clean() {
        process::exit(1);
    }
}
