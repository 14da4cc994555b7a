//! Canopy CLI - canopy command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod model;
mod provider;
mod render;
mod util;

/// Canopy - Lazily fetched tree viewer over a demo model
#[derive(Parser)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command
#[derive(clap::Args, Clone, Debug)]
pub struct ModelArgs {
    /// TOML model file (default: built-in sample)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Viewer configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated provider latency in milliseconds
    #[arg(long, default_value = "20")]
    latency_ms: u64,

    /// Give up when the viewer has not settled after this many seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Print the view as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the tree of an input
    Browse {
        #[command(flatten)]
        model: ModelArgs,

        /// Input element (default: the model root)
        #[arg(long)]
        input: Option<String>,

        /// Paths to expand, segments separated by '/'
        #[arg(short, long)]
        expand: Vec<String>,

        /// Elements to hide
        #[arg(long)]
        hide: Vec<String>,

        /// Auto-expand level; 1 shows the top level collapsed, -1 expands all
        #[arg(long, allow_hyphen_values = true)]
        auto_expand: Option<i32>,
    },
    /// Save the view state, switch inputs and restore it
    Roundtrip {
        #[command(flatten)]
        model: ModelArgs,

        /// Paths to expand before switching, segments separated by '/'
        #[arg(short, long)]
        expand: Vec<String>,

        /// Paths to select before switching
        #[arg(short, long)]
        select: Vec<String>,

        /// Input to show in between (default: first other top-level key)
        #[arg(long)]
        via: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // The viewer stays on one thread; providers answer from runtime tasks
    let runtime = tokio::runtime::Handle::current();
    let task = tokio::task::spawn_blocking(move || match cli.command {
        Commands::Browse { model, input, expand, hide, auto_expand } => {
            cmd::browse::run(&model, input, &expand, hide, auto_expand, runtime)
        }
        Commands::Roundtrip { model, expand, select, via } => {
            cmd::roundtrip::run(&model, &expand, &select, via, runtime)
        }
    });
    task.await.context("command thread panicked")?
}
