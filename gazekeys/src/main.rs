//! gazekeys - dwell-activated on-screen keyboard daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use gazekeys::config::Config;
use gazekeys::gaze::Viewport;
use gazekeys::keyboard::LayoutPreset;
use gazekeys::{backend, replay};

#[derive(Parser, Debug)]
#[command(name = "gazekeys", version, about = "Gaze-driven dwell keyboard")]
struct Cli {
    /// Config file (default: ~/.config/gazekeys/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Viewport size as WxH
    #[arg(long, global = true)]
    viewport: Option<String>,

    /// Startup layout: grid, board, or none
    #[arg(long, global = true)]
    layout: Option<String>,

    /// Tracker WebSocket URL (default: ws://localhost:8001)
    #[arg(long)]
    feed_url: Option<String>,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/gazekeys.sock)
    #[arg(long)]
    ipc_socket: Option<PathBuf>,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Replay a recorded gaze trace and print the typed text
    Replay {
        /// JSON-lines trace: {"t_ms": .., "x": .., "y": ..}
        trace: PathBuf,

        /// File holding the expected text; exit non-zero on mismatch
        #[arg(long)]
        expect: Option<PathBuf>,

        /// Keep ticking this long after the last sample (ms)
        #[arg(long, default_value_t = 0)]
        tail_ms: u64,
    },
}

/// Load the config file and apply CLI overrides.
fn effective_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default()?,
    };

    if let Some(ref vp) = cli.viewport {
        config.viewport =
            Viewport::parse(vp).with_context(|| format!("invalid --viewport {vp:?}, expected WxH"))?;
    }
    if let Some(ref name) = cli.layout {
        config.layout.preset = LayoutPreset::from_str(name)
            .with_context(|| format!("unknown layout: {name}. Use: grid, board, or none"))?;
    }
    if let Some(ref url) = cli.feed_url {
        config.feed.url = url.clone();
    }
    if let Some(ref path) = cli.ipc_socket {
        config.ipc.socket = Some(path.clone());
    }
    if cli.ipc_trace {
        config.ipc.trace = true;
    }

    config.validate()?;
    Ok(config)
}

fn run_replay(config: &Config, trace: &PathBuf, expect: Option<&PathBuf>, tail_ms: u64) -> anyhow::Result<()> {
    let samples = replay::load_trace(trace).with_context(|| format!("reading {}", trace.display()))?;
    let options = replay::ReplayOptions {
        viewport: config.viewport,
        inset: config.inset,
        dwell: config.dwell,
        validation: config.feed.validation(),
        layout: config.layout.preset,
        tail: Duration::from_millis(tail_ms),
    };
    let report = replay::replay(&samples, &options)?;

    for a in &report.activations {
        println!("activation,{},{},{}", a.at.as_millis(), a.key, a.value.label());
    }
    println!("text,{:?}", report.text);
    info!(
        samples = report.samples,
        rejected = report.rejected,
        activations = report.activations.len(),
        "replay finished"
    );

    if let Some(path) = expect {
        let expected = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let expected = expected.trim_end_matches(['\n', '\r']);
        if report.text != expected {
            eprintln!("expected text: {:?}", expected);
            eprintln!("actual text:   {:?}", report.text);
            anyhow::bail!("text mismatch");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gazekeys=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = effective_config(&cli)?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    match cli.command {
        None | Some(Command::Run) => {
            info!("gazekeys v{} starting", env!("CARGO_PKG_VERSION"));
            backend::run(config, cli.exit_after)
        }
        Some(Command::Replay {
            ref trace,
            ref expect,
            tail_ms,
        }) => run_replay(&config, trace, expect.as_ref(), tail_ms),
    }
}
