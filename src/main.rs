mod blob_store;
mod config;
mod error;
mod form;
mod metadata;
mod query;
mod search;
mod search_clients;
mod service;
mod web_server;

use crate::blob_store::FsBlobStore;
use crate::config::AppConfig;
use crate::query::SearchSettings;
use crate::search::MetadataIndex;
use crate::search_clients::{elasticsearch::ElasticsearchIndex, memory::MemoryIndex, tantivy::TantivyIndex};
use crate::service::ImageService;
use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "image_store", about = "HTTP service storing images and their metadata")]
struct Args {
    /// Base configuration file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,

    /// Overrides `web_port` from the configuration
    #[arg(long)]
    port: Option<u16>,
}

fn build_index(config: &AppConfig) -> Result<Arc<dyn MetadataIndex>> {
    let index: Arc<dyn MetadataIndex> = match config.engine.as_str() {
        "elasticsearch" => Arc::new(ElasticsearchIndex::new(config)?),
        "tantivy" => Arc::new(TantivyIndex::new(config)?),
        "memory" => Arc::new(MemoryIndex::new()),
        other => bail!("unknown engine '{}'", other),
    };
    Ok(index)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.web_port = port;
    }

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting image-store with {} engine", config.engine);

    let index = build_index(&config)?;
    index.ensure_index_exists().await?;

    let blobs = FsBlobStore::new(&config.image_directory);
    blobs.ensure_root().await?;

    let settings = SearchSettings {
        default_page_size: config.default_page_size,
        exact_match_categories: config.exact_match_categories.clone(),
    };
    let service = ImageService::new(Arc::new(blobs), index, settings, config.public_prefix.clone());

    if let Err(e) = web_server::start_web_server(Arc::new(config), service).await {
        log::error!("Web server error: {}", e);
    }

    info!("Image-store finished");

    Ok(())
}
