// src/main.rs - Plan moves offline or stream them to the step controller
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use tplan_rs::communication::open_serial;
use tplan_rs::config::{load_config, Config};
use tplan_rs::motion::planner::{SegmentList, ValidationPolicy};
use tplan_rs::motion::script::parse_moves;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Multi-axis stepper trajectory planner
#[derive(Parser, Debug)]
#[command(name = "tplan", version, about = "Plan multi-axis stepper moves and stream them to a step controller.")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan a move script and print the resulting sub-segments
    Plan {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "tplan.toml")]
        config: PathBuf,
        /// Move script, one relative move per line
        moves: PathBuf,
        /// Print one JSON object per sub-segment
        #[arg(long)]
        json: bool,
        /// Check every segment and report all violations
        #[arg(long)]
        validate: bool,
    },
    /// Configure the controller and send a move script as relative moves
    Send {
        #[arg(short, long, default_value = "tplan.toml")]
        config: PathBuf,
        moves: PathBuf,
        /// Serial port, overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },
}

fn setup_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load(config_path: &Path, moves_path: &Path) -> Result<(Config, Vec<Vec<i64>>), BoxError> {
    let path = config_path.to_string_lossy();
    tracing::info!("Loading configuration from: {}", path);
    let config = load_config(&path)?;
    config.validate()?;

    let text = std::fs::read_to_string(moves_path).map_err(|e| {
        tracing::error!("Failed to read move script '{}': {}", moves_path.display(), e);
        e
    })?;
    let moves = parse_moves(&text, config.axes.len())?;
    tracing::info!("{} axes, {} moves", config.axes.len(), moves.len());
    Ok((config, moves))
}

fn plan(config: &Config, moves: &[Vec<i64>], json: bool, validate: bool) -> Result<(), BoxError> {
    let mut list = SegmentList::with_solver(&config.joints()?, config.solver())?;

    let print = |list: &mut SegmentList| -> Result<(), BoxError> {
        for ss in list.sub_segments() {
            if json {
                println!("{}", serde_json::to_string(&ss)?);
            } else {
                println!("{:4} {} {}", ss.seg_number, ss.axis, ss);
            }
        }
        Ok(())
    };

    for m in moves {
        list.add_distance_segment(m)?;
        print(&mut list)?;
    }
    list.finish();
    print(&mut list)?;

    if validate {
        let mut failures = 0;
        for seg in list.history() {
            for violation in seg.validate(ValidationPolicy::Collect)? {
                tracing::error!("{}", violation);
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(format!("{} invariant violations", failures).into());
        }
        tracing::info!("{} segments validated", list.committed_segments());
    }

    tracing::info!("final positions {:?}", list.positions());
    Ok(())
}

async fn send(mut config: Config, moves: &[Vec<i64>], port: Option<String>) -> Result<(), BoxError> {
    if let Some(port) = port {
        config.serial.port = port;
    }
    let mut link = open_serial(&config.serial)?;

    link.configure(&config).await?;
    link.info().await?;
    link.run().await?;
    for m in moves {
        link.rmove(m).await?;
        if let Some(state) = link.current_state() {
            tracing::debug!("{}", state);
        }
    }
    link.info().await?;
    tracing::info!("sent {} moves", moves.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    match cli.command {
        Commands::Plan { config, moves, json, validate } => {
            let (config, moves) = load(&config, &moves)?;
            plan(&config, &moves, json, validate)
        }
        Commands::Send { config, moves, port } => {
            let (config, moves) = load(&config, &moves)?;
            send(config, &moves, port).await
        }
    }
}
