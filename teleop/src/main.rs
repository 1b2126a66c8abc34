//! Gesture Teleop - replay a recorded hand/head trace through the teleop core.
//!
//! Commands are logged with their topic; a summary is printed at the end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use gesture_teleop::control::{
    CommandSink, FanoutSink, RecordingSink, TeleopConfig, TeleopSession, TracingSink,
};
use gesture_teleop::replay::{self, ReplaySummary, Trace};

#[derive(Parser, Debug)]
#[command(name = "gesture-teleop", about = "Gesture-driven robot teleoperation core", version)]
struct Cli {
    /// Trace file, one s-expression tick per line
    trace: Option<PathBuf>,

    /// Config file (s-expression); overrides --mode
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control preset: discrete, continuous, or persistent
    #[arg(long, default_value = "continuous")]
    mode: String,

    /// Multiplier on recorded tick delays (0 = as fast as possible)
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gesture_teleop=info".into()),
        )
        .init();

    let config = match &cli.config {
        Some(path) => TeleopConfig::load(path)?,
        None => match TeleopConfig::preset(&cli.mode) {
            Some(config) => config,
            None => bail!(
                "unknown mode: {}. Use: discrete, continuous, or persistent",
                cli.mode
            ),
        },
    };

    if cli.print_config {
        println!("{}", config.config_sexp());
        return Ok(());
    }

    let Some(trace_path) = cli.trace else {
        bail!("no trace file given (see --help)");
    };

    info!("gesture-teleop v{} starting", env!("CARGO_PKG_VERSION"));
    info!("config: {}", config.config_sexp());

    let trace = Trace::load(&trace_path)?;
    let recorder = Arc::new(RecordingSink::new());
    let tracing_sink: Arc<dyn CommandSink> = Arc::new(TracingSink::new(config.topics.clone()));
    let recording_sink: Arc<dyn CommandSink> = recorder.clone();
    let sink: Arc<dyn CommandSink> = Arc::new(FanoutSink::new(vec![tracing_sink, recording_sink]));

    let mut session = TeleopSession::new(&config, sink).context("starting teleop session")?;
    replay::run(&trace, &mut session, cli.time_scale)?;
    info!("final status: {}", session.status_sexp());
    session.shutdown();

    // Count from the recorder so watchdog and shutdown stops are included.
    let mut summary = ReplaySummary {
        ticks: trace.ticks.len(),
        ..ReplaySummary::default()
    };
    summary.count(&recorder.commands());
    info!(skipped = trace.skipped, "summary: {}", summary.to_sexp());
    println!("{}", summary.to_sexp());
    Ok(())
}
