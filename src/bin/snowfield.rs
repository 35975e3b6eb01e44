use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snowfield", version)]
struct Cli {
    /// Session configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Open a regular window instead of going full screen.
    #[arg(long)]
    windowed: bool,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Kernel to run.
    #[arg(long, value_enum)]
    pattern: Option<PatternChoice>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PatternChoice {
    Snow,
    Palette,
}

impl From<PatternChoice> for snowfield::KernelProgram {
    fn from(p: PatternChoice) -> Self {
        match p {
            PatternChoice::Snow => Self::Snow,
            PatternChoice::Palette => Self::Palette,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => snowfield::SnowConfig::load(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => snowfield::SnowConfig::default(),
    };
    if cli.windowed {
        config.fullscreen = false;
    }
    if let Some(frames) = cli.frames {
        config.max_frames = Some(frames);
    }
    if let Some(pattern) = cli.pattern {
        config.kernel = pattern.into();
    }

    let summary = snowfield::app::run(&config)?;
    tracing::info!(
        frames = summary.frames,
        t = summary.final_t,
        warnings = summary.warnings,
        "done"
    );
    Ok(())
}
