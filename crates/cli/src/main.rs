mod cli;
mod commands;
mod upload;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkyard_store::{ChunkStore, MergeEngine, StoreConfig};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkyard=debug")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }

    let root = config.root.clone();
    let store = tokio::task::spawn_blocking(move || ChunkStore::open(config))
        .await?
        .with_context(|| format!("opening store at {}", root.display()))?;
    let engine = Arc::new(MergeEngine::new(Arc::new(store)));

    commands::run(cli, engine).await
}
