//! Fragment CLI - Bridge interface for host tooling
//!
//! Commands: render, filter-styles, reconcile, tag-gallery, invalidate, clear-cache
//! Outputs JSON to stdout, logs to stderr (RUST_LOG)
//! Returns 2 when a fragment is not available

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fragment_render_core::{
    config::Settings,
    gallery::{GalleryDataset, GalleryItem, GalleryReconciler, GalleryViewSettings},
    memory::{MemorySite, SiteFixture},
    FileTier, FragmentChange, Invalidator, MemoryTier, RenderCache, RenderError, SystemClock,
};

#[derive(Parser)]
#[command(name = "fragment-cli")]
#[command(about = "Fragment CLI - render fragments, reconcile galleries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the site fixture (JSON)
    #[arg(short, long, default_value = "site.json")]
    fixture: PathBuf,

    /// Path to settings (JSON); defaults apply when absent
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a fragment and print the client payload
    Render {
        /// Fragment ID
        #[arg(short, long)]
        id: u64,

        /// Durable cache directory; rendering is uncached without it
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Apply the style-handle exclusion rules
    FilterStyles {
        handles: Vec<String>,
    },

    /// Reorder a gallery dataset to match its markup
    Reconcile {
        /// JSON array of gallery items
        #[arg(short, long)]
        dataset: PathBuf,

        /// Rendered gallery markup
        #[arg(short, long)]
        markup: PathBuf,
    },

    /// Tag gallery item containers with their stable ids
    TagGallery {
        #[arg(short, long)]
        markup: PathBuf,
    },

    /// Apply a content change (JSON) to the cache
    Invalidate {
        #[arg(long)]
        cache_dir: PathBuf,

        #[arg(long)]
        change: String,
    },

    /// Remove every cached render
    ClearCache {
        #[arg(long)]
        cache_dir: PathBuf,
    },
}

fn emit<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&format!("Failed to encode output: {}", e)),
    }
}

fn fail(message: &str) -> ExitCode {
    println!("{}", serde_json::json!({ "success": false, "error": message }));
    ExitCode::FAILURE
}

fn open_cache(dir: &Path, settings: &Settings) -> Result<RenderCache, String> {
    let clock = Arc::new(SystemClock);
    let durable = FileTier::open(dir, clock.clone()).map_err(|e| e.to_string())?;
    Ok(RenderCache::new(
        Arc::new(MemoryTier::new(clock.clone())),
        Arc::new(durable),
        clock,
        &settings.cache,
    ))
}

fn load_site(path: &Path) -> Result<MemorySite, String> {
    SiteFixture::load(path)
        .map(MemorySite::from_fixture)
        .map_err(|e| format!("Failed to load fixture: {}", e))
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(e) => return fail(&e.to_string()),
    };

    match cli.command {
        Commands::Render { id, cache_dir } => {
            let site = match load_site(&cli.fixture) {
                Ok(s) => s,
                Err(e) => return fail(&e),
            };
            let renderer = match site.renderer(&settings) {
                Ok(r) => r,
                Err(e) => return fail(&e.to_string()),
            };

            let rendered = match cache_dir {
                Some(dir) => match open_cache(&dir, &settings) {
                    Ok(cache) => renderer.render_cached(id, &cache),
                    Err(e) => return fail(&e),
                },
                None => renderer.render(id),
            };

            match rendered {
                Ok(result) => emit(&result.to_payload()),
                Err(RenderError::NotFound) => {
                    println!("{}", serde_json::json!({ "success": false, "error": RenderError::NotFound.to_string() }));
                    ExitCode::from(2)
                }
                Err(e) => fail(&e.to_string()),
            }
        }

        Commands::FilterStyles { handles } => {
            let site = match load_site(&cli.fixture) {
                Ok(s) => s,
                Err(e) => return fail(&e),
            };
            emit(&site.materializer(&settings).filter_style_handles(&handles))
        }

        Commands::Reconcile { dataset, markup } => {
            let items: Vec<GalleryItem> = match fs::read_to_string(&dataset)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
            {
                Ok(items) => items,
                Err(e) => return fail(&format!("Invalid dataset: {}", e)),
            };
            let markup = match fs::read_to_string(&markup) {
                Ok(m) => m,
                Err(e) => return fail(&format!("Failed to read markup: {}", e)),
            };

            let mut dataset = GalleryDataset::new(items, GalleryViewSettings::from(&settings.gallery));
            GalleryReconciler::new(&settings.gallery).reconcile(&mut dataset, &markup);
            emit(&dataset.to_payload())
        }

        Commands::TagGallery { markup } => match fs::read_to_string(&markup) {
            Ok(m) => {
                print!("{}", GalleryReconciler::new(&settings.gallery).tag_items(&m));
                ExitCode::SUCCESS
            }
            Err(e) => fail(&format!("Failed to read markup: {}", e)),
        },

        Commands::Invalidate { cache_dir, change } => {
            let change: FragmentChange = match serde_json::from_str(&change) {
                Ok(c) => c,
                Err(e) => return fail(&format!("Invalid change: {}", e)),
            };
            let site = match load_site(&cli.fixture) {
                Ok(s) => s,
                Err(e) => return fail(&e),
            };
            let cache = match open_cache(&cache_dir, &settings) {
                Ok(c) => Arc::new(c),
                Err(e) => return fail(&e),
            };
            let outcome = Invalidator::new(site.content.clone(), cache).handle(&change);
            emit(&serde_json::json!({ "success": true, "outcome": format!("{:?}", outcome) }))
        }

        Commands::ClearCache { cache_dir } => match open_cache(&cache_dir, &settings) {
            Ok(cache) => emit(&serde_json::json!({ "success": true, "deleted": cache.clear_all() })),
            Err(e) => fail(&e),
        },
    }
}
