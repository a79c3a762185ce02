mod batch;
mod cache;
mod client;
mod config;
mod error;
mod media;
mod metadata;
mod report;
mod video;

use clap::Parser;
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tagger",
    about = "Batch media tagging pipeline: titles and keywords via a multimodal model"
)]
struct Args {
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the configured input directory
    #[arg(long, value_name = "DIR")]
    input: Option<PathBuf>,
    /// Override the configured output directory
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| env::var(config::CONFIG_PATH_ENV).ok().map(PathBuf::from));
    let mut settings = config::Settings::load(config_path)?;
    if let Some(input) = args.input {
        settings.folders.input = input;
    }
    if let Some(output) = args.output {
        settings.folders.output = output;
    }

    // fatal before any item is touched
    let api_key = config::load_api_key()?;

    video::init()?;

    let client = client::TaggingClient::new(&settings.tagging, api_key)?;
    let cache = cache::ResultCache::load(&settings.folders.cache_file)?;
    if !cache.is_empty() {
        tracing::info!(entries = cache.len(), "loaded result cache");
    }

    let mut runner = batch::BatchRunner::new(settings, client, cache);
    runner.run().await?;
    Ok(())
}
