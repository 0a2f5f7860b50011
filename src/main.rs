//! WSI Viewer - command-line front end of the viewer core.
//!
//! `open` drives the full viewer lifecycle against a live slide server with a
//! headless surface; `grid` prints the tile pyramid for a given geometry.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_viewer::{
    config::{Cli, Command, GridConfig, OpenConfig},
    dzi_max_level, level_dimensions, tile_grid_size, validate, HeadlessContainer, HeadlessReport,
    HeadlessSurface, HttpDescriptorSource, HttpTileFetcher, RawDescriptor, SlideId,
    ViewerController,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Open(config) => run_open(config).await,
        Command::Grid(config) => run_grid(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_viewer=debug"
    } else {
        "wsi_viewer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Open Command
// =============================================================================

async fn run_open(config: OpenConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let viewport = match config.viewport_rect() {
        Ok(viewport) => viewport,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let viewer_config = config.viewer_config();

    info!("Configuration:");
    info!("  Server: {}", viewer_config.base_url);
    info!(
        "  Tiles: {:?} timeout, {} retries, {:?} backoff",
        viewer_config.tile_timeout, viewer_config.max_retries, viewer_config.retry_backoff
    );
    info!(
        "  Cache: {}MB tiles",
        viewer_config.tile_cache_bytes / (1024 * 1024)
    );

    let descriptors = match HttpDescriptorSource::with_timeout(
        &viewer_config.base_url,
        viewer_config.descriptor_timeout,
    ) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("Invalid server URL: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let tiles = match HttpTileFetcher::new(&viewer_config.base_url) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("Invalid server URL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let mut viewer: ViewerController<HeadlessSurface> =
        ViewerController::new(&viewer_config, descriptors, tiles, errors_tx);

    let (container, mut report) = HeadlessContainer::new("cli", config.level, viewport);
    if let Err(e) = viewer.mount(container) {
        error!("Failed to mount viewer: {}", e);
        return ExitCode::FAILURE;
    }

    let handle = viewer.handle();
    let control = tokio::spawn(viewer.run());
    handle.select(Some(SlideId::from(config.slide_id.as_str())));

    let deadline = tokio::time::sleep(Duration::from_secs(config.deadline_secs));
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            changed = report.changed() => {
                if changed.is_err() {
                    break Err("viewer stopped unexpectedly".to_string());
                }
                if report.borrow_and_update().is_settled() {
                    break Ok(());
                }
            }
            Some(e) = errors_rx.recv() => break Err(e.to_string()),
            _ = &mut deadline => {
                break Err(format!("viewport did not settle within {}s", config.deadline_secs));
            }
        }
    };

    let summary = report.borrow().clone();
    handle.unmount();
    if let Err(e) = control.await {
        warn!("Viewer task ended abnormally: {}", e);
    }

    match outcome {
        Ok(()) => {
            print_summary(&summary);
            if summary.placeholders > 0 {
                warn!("{} tile(s) could not be loaded", summary.placeholders);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_summary(report: &HeadlessReport) {
    println!(
        "Slide:        {}",
        report.slide_id.as_deref().unwrap_or("-")
    );
    if let Some(level) = report.level {
        println!("Level:        {}", level);
    }
    println!("Tiles:        {}", report.expected);
    println!("Loaded:       {}", report.loaded);
    println!("Placeholders: {}", report.placeholders);
    println!("Bytes:        {}", report.bytes);
}

// =============================================================================
// Grid Command
// =============================================================================

fn run_grid(config: GridConfig) -> ExitCode {
    let max_level = config.max_level.unwrap_or_else(|| {
        let width = config.width.clamp(0, u32::MAX as i64) as u32;
        let height = config.height.clamp(0, u32::MAX as i64) as u32;
        dzi_max_level(width, height) as i64
    });

    let mut raw = RawDescriptor::new(
        config.width,
        config.height,
        config.tile_size,
        config.overlap,
        max_level,
    );
    if let Some(min_level) = config.min_level {
        raw = raw.with_min_level(min_level);
    }

    let descriptor = match validate(SlideId::from("grid"), &raw) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "{}x{} pixels, tile {} px, overlap {} px",
        descriptor.width(),
        descriptor.height(),
        descriptor.tile_size(),
        descriptor.tile_overlap()
    );
    println!("{:>5}  {:>17}  {:>11}  {:>8}", "level", "size", "grid", "tiles");

    let mut total: u64 = 0;
    for level in descriptor.levels() {
        let (Ok((width, height)), Ok((cols, rows))) = (
            level_dimensions(&descriptor, level),
            tile_grid_size(&descriptor, level),
        ) else {
            continue;
        };
        let tiles = cols as u64 * rows as u64;
        total += tiles;
        println!(
            "{:>5}  {:>17}  {:>11}  {:>8}",
            level,
            format!("{}x{}", width, height),
            format!("{}x{}", cols, rows),
            tiles
        );
    }
    println!("Total: {} tile(s) over {} level(s)", total, descriptor.level_count());

    ExitCode::SUCCESS
}
