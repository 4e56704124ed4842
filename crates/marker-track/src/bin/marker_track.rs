//! marker-track CLI: run the websocket server or replay frames offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use marker_track::{encode_results, FrameProcessor, MarkerEnroller, MarkerRegistry, ServerConfig};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "marker-track")]
#[command(about = "Detect and track planar markers in streamed camera frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the configured markers and serve the websocket endpoint.
    Serve(ServeArgs),

    /// Run a sequence of image files through one tracker, printing one JSON
    /// result line per frame.
    Detect(DetectArgs),

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct LogArgs {
    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Args)]
struct ServeArgs {
    /// Path to the JSON config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config.
    #[arg(long)]
    bind: Option<String>,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Path to the JSON config.
    #[arg(long)]
    config: PathBuf,

    /// Simulated time between consecutive frames, in milliseconds.
    #[arg(long, default_value = "33")]
    frame_interval_ms: u64,

    /// Frame images, processed in order.
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    #[command(flatten)]
    log: LogArgs,
}

#[cfg(feature = "tracing")]
fn init_logging(args: &LogArgs) -> CliResult<()> {
    marker_track::core::init_tracing(args.log_level, args.log_json);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(args: &LogArgs) -> CliResult<()> {
    marker_track::core::init_with_level(args.log_level)?;
    if args.log_json {
        warn!("--log-json needs the `tracing` feature; using plain logs");
    }
    Ok(())
}

/// Load and resolve marker paths against the config's directory. Callers
/// validate after applying their overrides.
fn load_config(path: Option<&Path>) -> CliResult<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let mut config = ServerConfig::load_json(path)?;
    if let Some(dir) = path.parent() {
        config.resolve_paths(dir);
    }
    Ok(config)
}

fn build_processor(config: &ServerConfig) -> Arc<FrameProcessor> {
    let registry = Arc::new(MarkerRegistry::new());
    let enrolled = MarkerEnroller::from_config(config).enroll_all(&config.markers, &registry);
    if enrolled < config.markers.len() {
        warn!(
            "enrolled {enrolled} of {} configured markers",
            config.markers.len()
        );
    }
    Arc::new(FrameProcessor::from_config(config, registry))
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_serve(&args),
        Commands::Detect(args) => run_detect(&args),
        Commands::DefaultConfig => run_default_config(),
    }
}

fn run_serve(args: &ServeArgs) -> CliResult<()> {
    init_logging(&args.log)?;
    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    config.validate()?;
    let addr = config.bind_addr()?;
    let processor = build_processor(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        };
        marker_track::server::serve(addr, processor, shutdown).await
    })?;
    Ok(())
}

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    init_logging(&args.log)?;
    let config = load_config(Some(&args.config))?;
    config.validate()?;
    let processor = build_processor(&config);

    let mut tracker = processor.new_tracker();
    let start = Instant::now();
    let interval = Duration::from_millis(args.frame_interval_ms);
    for (i, path) in args.frames.iter().enumerate() {
        let now = start + interval * i as u32;
        let bytes = std::fs::read(path)?;
        let line = match processor.process_bytes(&mut tracker, &bytes, now) {
            Ok(result) => encode_results(result.as_ref())?,
            Err(e) => {
                warn!("{}: {e}", path.display());
                encode_results(None)?
            }
        };
        println!("{line}");
    }
    Ok(())
}

fn run_default_config() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&ServerConfig::default())?);
    Ok(())
}
