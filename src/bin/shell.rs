//! poolfs interactive shell
//!
//! Reads one command per line and drives a [`poolfs::Simulator`]. Pool
//! sizing and strategy come from an optional TOML config file, with CLI
//! flags taking precedence.

use anyhow::Context;
use clap::Parser;
use poolfs::allocator::Strategy;
use poolfs::shell::{Outcome, Shell};
use poolfs::SimConfig;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "poolfs-shell")]
#[command(about = "Interactive shell for the poolfs storage simulator")]
struct Args {
    /// TOML config file (capacity, max_segments, max_name_len,
    /// default_mode, strategy)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pool capacity in bytes (overrides the config file)
    #[arg(long)]
    capacity: Option<usize>,

    /// Placement strategy: first-fit, best-fit, next-fit, worst-fit
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Directory for export/import save files
    #[arg(long, default_value = "saved")]
    save_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<SimConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    anyhow::ensure!(config.capacity > 0, "pool capacity must be positive");
    anyhow::ensure!(config.max_segments > 0, "max_segments must be positive");

    fs::create_dir_all(&args.save_dir)
        .with_context(|| format!("creating save directory {}", args.save_dir.display()))?;

    println!(
        "poolfs shell (capacity: {} bytes, strategy: {})",
        config.capacity, config.strategy
    );

    let mut shell = Shell::new(config, args.save_dir);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("\n>>> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!("exit.");
            break;
        }
        match shell.run_line(&line, &mut stdout)? {
            Outcome::Continue => {}
            Outcome::Exit => {
                println!("exit.");
                break;
            }
        }
    }
    Ok(())
}
