use anyhow::Context;
use blockview_authority::{LocalAuthority, Ticker};
use blockview_common::{BlockFace, BlockPos};
use blockview_input::Action;
use blockview_kernel::{ClockConfig, ClockState, Phases, SimulationLoop};
use blockview_render::DebugTextRenderer;
use blockview_stream::Transport;
use blockview_sync::{FrameDriver, Viewer, ViewerConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockview", about = "Headless viewer for a shared block world")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the default configuration
    Info,
    /// Run a headless viewer against an in-process authority
    Run {
        /// Number of frames to draw
        #[arg(short, long, default_value = "120")]
        frames: u64,
        /// Blocks to stack on the origin through world actions
        #[arg(short, long, default_value = "0")]
        place: i32,
        /// Have the authority place a block every N milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
        /// Print the debug frame every N frames
        #[arg(long, default_value = "30")]
        print_every: u64,
        /// List every block in printed frames
        #[arg(long)]
        list_blocks: bool,
        /// JSON viewer config; missing fields take defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Feed millisecond timestamps to the fixed-step clock and print update counts
    Clock {
        /// Fixed step in seconds
        #[arg(long, default_value_t = 1.0 / 60.0)]
        time_step: f64,
        /// Longest frame the clock will consume, in seconds
        #[arg(long, default_value_t = 0.1)]
        max_frame_time: f64,
        /// Host callback timestamps in milliseconds
        #[arg(required = true)]
        timestamps: Vec<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("blockview v{}", env!("CARGO_PKG_VERSION"));
            println!("default config:");
            println!("{}", serde_json::to_string_pretty(&ViewerConfig::default())?);
        }
        Commands::Run {
            frames,
            place,
            tick_ms,
            print_every,
            list_blocks,
            config,
        } => {
            let config = match config {
                Some(path) => ViewerConfig::from_json_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ViewerConfig::default(),
            };
            run(config, frames, place, tick_ms, print_every.max(1), list_blocks)?;
        }
        Commands::Clock {
            time_step,
            max_frame_time,
            timestamps,
        } => clock(
            ClockConfig {
                time_step,
                max_frame_time,
            },
            &timestamps,
        )?,
    }

    Ok(())
}

fn run(
    config: ViewerConfig,
    frames: u64,
    place: i32,
    tick_ms: Option<u64>,
    print_every: u64,
    list_blocks: bool,
) -> anyhow::Result<()> {
    let authority = Arc::new(LocalAuthority::start());
    let ticker = tick_ms
        .map(|ms| Ticker::spawn(&authority, Duration::from_millis(ms)))
        .transpose()
        .context("starting authority ticker")?;

    let transport: Arc<dyn Transport> = authority.clone();
    let renderer = if list_blocks {
        DebugTextRenderer::listing_blocks()
    } else {
        DebugTextRenderer::new()
    };
    let mut viewer = Viewer::connect(transport, &config, renderer)?;

    for y in 0..place {
        viewer.apply_action(Action::PlaceAdjacent {
            existing: BlockPos::new(0, y, 0),
            face: BlockFace::PosY,
        })?;
    }

    let driver = FrameDriver::new(config.refresh_hz).with_max_frames(frames);
    let report = driver.run(&mut viewer, |n, _, v| {
        if let Some(text) = v.last_output().filter(|_| n % print_every == 0) {
            print!("{text}");
        }
    })?;

    println!(
        "Ran {} frames, {} updates, status: {}",
        report.frames,
        report.updates,
        viewer.status()
    );
    let stats = viewer.sync().stats();
    println!(
        "Applied {} updates in {} batches ({} ignored), {} blocks",
        stats.applied,
        stats.batches,
        stats.ignored,
        viewer.sync().read().block_count()
    );
    if let Some(metadata) = viewer.sync().metadata() {
        println!(
            "Authority: {} blocks, {} clients",
            metadata.total_blocks,
            metadata.clients.len()
        );
    }

    viewer.shutdown();
    if let Some(mut ticker) = ticker {
        ticker.stop();
    }
    authority.shutdown();
    Ok(())
}

fn clock(config: ClockConfig, timestamps: &[f64]) -> anyhow::Result<()> {
    let mut sim = SimulationLoop::new(config)?;
    let mut updates = 0u32;
    let mut phases = Phases {
        update: |_: &ClockState| -> Result<(), std::convert::Infallible> {
            updates += 1;
            Ok(())
        },
        render: |_: &ClockState| -> Result<(), std::convert::Infallible> { Ok(()) },
    };

    for &now_ms in timestamps {
        let stats = sim.frame(now_ms, &mut phases)?;
        println!(
            "t={now_ms:>8.1}ms  frame_time={:.4}s  updates={:>3}  alpha={:.3}",
            stats.frame_time, stats.updates, stats.render_alpha
        );
    }
    drop(phases);
    println!(
        "world_time={:.4}s steps={} total_updates={updates}",
        sim.clock().world_time(),
        sim.clock().steps()
    );
    Ok(())
}
