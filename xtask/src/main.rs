use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for blockview")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Run the clock and world model timing bench
    Bench,
    /// Run the headless viewer against the local authority
    Demo {
        /// Frames to draw
        #[arg(long, default_value = "180")]
        frames: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            for step in [fmt_args(), clippy_args(), test_args(), doc_args()] {
                cargo(&step)?;
            }
        }
        Commands::Fmt => cargo(&fmt_args())?,
        Commands::Clippy => cargo(&clippy_args())?,
        Commands::Test => cargo(&test_args())?,
        Commands::Doc => cargo(&doc_args())?,
        Commands::Bench => cargo(&["bench", "-p", "blockview-kernel", "--bench", "bench_clock"])?,
        Commands::Demo { frames } => {
            let frames = frames.to_string();
            cargo(&[
                "run",
                "-p",
                "blockview-cli",
                "--",
                "run",
                "--frames",
                &frames,
                "--place",
                "3",
                "--tick-ms",
                "250",
            ])?;
        }
    }

    Ok(())
}

fn fmt_args() -> Vec<&'static str> {
    vec!["fmt", "--all", "--", "--check"]
}

fn clippy_args() -> Vec<&'static str> {
    vec!["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"]
}

fn test_args() -> Vec<&'static str> {
    vec!["test", "--workspace"]
}

fn doc_args() -> Vec<&'static str> {
    vec!["doc", "--workspace", "--no-deps"]
}

fn cargo(args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args[0]);
    }
    Ok(())
}
