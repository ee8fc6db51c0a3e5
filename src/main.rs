#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use model_cache::config::Config;
use model_cache::models::{
    format_bytes, DirectoryAssets, ModelManager, ProgressCallback, RemoteRequest,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model-cache")]
#[command(about = "Local cache for ONNX embedding models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache root directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached models
    List,
    /// Show a cached model and its file paths
    Show { model_id: String },
    /// Download a model from the hub
    Pull {
        model_id: String,
        /// Revision (branch, tag or commit)
        #[arg(long)]
        revision: Option<String>,
        /// Remote model file to use instead of automatic selection
        #[arg(long)]
        model_file: Option<String>,
        /// Remote tokenizer file to use instead of automatic selection
        #[arg(long)]
        tokenizer_file: Option<String>,
        /// Skip the external data shard
        #[arg(long)]
        no_external_data: bool,
        /// Parallel connections per file
        #[arg(short = 'j', long)]
        connections: Option<usize>,
        /// Re-download files that are already cached
        #[arg(long)]
        force: bool,
    },
    /// Import a model from local files
    Import {
        model_id: String,
        /// Model file, relative to --assets
        model: String,
        /// Tokenizer file, relative to --assets
        tokenizer: String,
        /// Directory the files are read from
        #[arg(long, default_value = ".")]
        assets: PathBuf,
        /// Replace files that are already cached
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove a cached model
    Remove { model_id: String },
    /// Print the cache root directory
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.cache_dir {
        config.cache.root = dir;
    }

    let manager = ModelManager::new(&config)?;

    match cli.command {
        Commands::List => list(&manager),
        Commands::Show { model_id } => show(&manager, &model_id),
        Commands::Pull {
            model_id,
            revision,
            model_file,
            tokenizer_file,
            no_external_data,
            connections,
            force,
        } => {
            let mut request = RemoteRequest::from_config(&config.download);
            if let Some(revision) = revision {
                request.revision = revision;
            }
            if let Some(connections) = connections {
                request.max_connections = connections;
            }
            request.model_file = model_file;
            request.tokenizer_file = tokenizer_file;
            request.include_external_data &= !no_external_data;
            request.force = force;

            let entry = manager
                .from_remote(&model_id, &request, Some(progress_bars()))
                .await
                .with_context(|| format!("Failed to pull {model_id}"))?;
            println!(
                "✓ Cached {} ({}, {})",
                entry.model_id, entry.model_file_name, entry.tokenizer_file_name
            );
            Ok(())
        }
        Commands::Import {
            model_id,
            model,
            tokenizer,
            assets,
            overwrite,
        } => {
            let assets = DirectoryAssets::new(assets);
            let entry = manager
                .from_assets(&model_id, &assets, &model, &tokenizer, overwrite)
                .await
                .with_context(|| format!("Failed to import {model_id}"))?;
            println!("✓ Imported {}", entry.model_id);
            Ok(())
        }
        Commands::Remove { model_id } => {
            manager.delete_model(&model_id)?;
            println!("✓ Removed {model_id}");
            Ok(())
        }
        Commands::Path => {
            println!("{}", manager.cache().root().display());
            Ok(())
        }
    }
}

fn list(manager: &ModelManager) -> Result<()> {
    let ids = manager.list_model_ids()?;
    if ids.is_empty() {
        println!("No cached models in {}", manager.cache().root().display());
        return Ok(());
    }

    for id in ids {
        let size = manager.cache().cache_size(&id).unwrap_or(0);
        let status = match manager.get_local_model(&id) {
            Some(entry) => format!("{:?}", entry.source).to_lowercase(),
            None => "incomplete".to_string(),
        };
        println!("{id:<48} {:>10}  {status}", format_bytes(size));
    }
    Ok(())
}

fn show(manager: &ModelManager, model_id: &str) -> Result<()> {
    let Some(entry) = manager.get_local_model(model_id) else {
        anyhow::bail!("Model '{model_id}' is not cached. Download it with: model-cache pull {model_id}");
    };
    let files = manager.cache().model_files(model_id, &entry);

    println!("Model:      {}", entry.model_id);
    println!("Source:     {:?}", entry.source);
    if let Some(revision) = &entry.revision {
        println!("Revision:   {revision}");
    }
    if !entry.downloaded_at.is_empty() {
        println!("Cached at:  {}", entry.downloaded_at);
    }
    println!("Model file: {}", files.model.display());
    println!("Tokenizer:  {}", files.tokenizer.display());
    if let Some(data) = files.external_data {
        println!("Data shard: {}", data.display());
    }
    Ok(())
}

/// One progress bar per file, created on its first report
fn progress_bars() -> ProgressCallback {
    let multi = MultiProgress::new();
    let bars: Mutex<HashMap<String, ProgressBar>> = Mutex::new(HashMap::new());
    let style = ProgressStyle::with_template(
        "{msg:30} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");

    Arc::new(move |label: &str, received: u64, total: Option<u64>| {
        let Ok(mut bars) = bars.lock() else {
            return;
        };
        let bar = bars.entry(label.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(total.unwrap_or(0)));
            bar.set_style(style.clone());
            bar.set_message(label.to_string());
            bar
        });
        if let Some(total) = total {
            bar.set_length(total);
        }
        bar.set_position(received);
        if total == Some(received) {
            bar.finish();
        }
    })
}
