//! POI discovery batch job.
//!
//! Resolves the search area, generates the grid chunk for this
//! instance, and drives the discovery orchestrator against the Overpass
//! API, writing candidate rows into ScyllaDB.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use prospect::config::{AreaConfig, CategoryConfig};
use prospect::discord::DiscordWebhook;
use prospect::grid::{generate_grid, select_chunk, GridPoint};
use prospect::orchestrator::{Budgets, DiscoveryOrchestrator, RunSummary};
use prospect::overpass::{ClientConfig, SpatialQueryClient};
use prospect::store::{CandidateWriter, ScyllaCandidateStore};
use prospect::subdivide::SubdivisionPolicy;
use prospect::telemetry::TracingTelemetry;

#[derive(Parser, Debug)]
#[command(name = "discover")]
#[command(about = "Discover candidate places for the directory via the Overpass API")]
struct Args {
    /// Named city or district from the area config
    #[arg(long)]
    area: Option<String>,

    /// Explicit center as "lat,lng" (overrides --area)
    #[arg(long)]
    center: Option<String>,

    /// Area config file
    #[arg(long, default_value = "config/areas.toml")]
    areas_file: String,

    /// Category config file
    #[arg(long, default_value = "config/categories.toml")]
    categories_file: String,

    /// Comma-separated category filter (default: all configured)
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Grid span in km (default: the area's configured span)
    #[arg(long)]
    span_km: Option<f64>,

    /// Grid point spacing in meters
    #[arg(long, default_value = "500")]
    spacing_m: f64,

    /// Initial cell radius in meters
    #[arg(long, default_value = "500")]
    radius_m: f64,

    /// Per-query result cap (also the saturation threshold)
    #[arg(long, default_value = "200")]
    max_results: usize,

    /// Maximum subdivision depth for saturated cells
    #[arg(long, default_value = "3")]
    max_depth: u8,

    /// Subdivision radius floor in meters
    #[arg(long, default_value = "250")]
    min_radius_m: f64,

    /// Per-category processed-cell cap
    #[arg(long, default_value = "1000")]
    max_cells_per_category: usize,

    /// Global insert cap for the run
    #[arg(long, default_value = "5000")]
    max_inserts: usize,

    /// Wall-clock safety ceiling in seconds
    #[arg(long, default_value = "3600")]
    max_runtime_secs: u64,

    /// Number of parallel chunk instances
    #[arg(long, default_value = "1")]
    chunks: usize,

    /// Index of this instance's chunk
    #[arg(long, default_value = "0")]
    chunk_index: usize,

    /// Preferred language for display names (e.g. "nl")
    #[arg(long)]
    lang: Option<String>,

    /// Override the Overpass endpoint pool (comma-separated)
    #[arg(long, value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Fixed pre-call delay in milliseconds
    #[arg(long, default_value = "1000")]
    base_delay_ms: u64,

    /// ScyllaDB node
    #[arg(long, default_value = "127.0.0.1:9042")]
    scylla_uri: String,

    /// Discord webhook URL for notifications (optional)
    #[arg(long)]
    discord_webhook: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Prospect Discovery Run");

    let (center, area_span_km, area_label) = resolve_area(&args)?;
    let span_km = args.span_km.unwrap_or(area_span_km);

    let category_config = CategoryConfig::load_from_file(&args.categories_file)?;
    let categories = category_config.filter(&args.categories);
    if categories.is_empty() {
        anyhow::bail!("No categories selected");
    }

    let full_grid = generate_grid(center, span_km, args.spacing_m);
    let chunk = select_chunk(&full_grid, args.chunks, args.chunk_index);
    info!(
        area = %area_label,
        lat = center.lat,
        lng = center.lng,
        span_km,
        spacing_m = args.spacing_m,
        grid_points = full_grid.len(),
        chunk_points = chunk.len(),
        chunk = args.chunk_index,
        chunks = args.chunks,
        categories = categories.len(),
        "run configured"
    );

    let discord = args
        .discord_webhook
        .as_ref()
        .map(|url| DiscordWebhook::new(url.clone()));

    if let Some(ref dw) = discord {
        let _ = dw
            .notify_run_started(&area_label, chunk.len(), categories.len())
            .await;
    }

    let mut client_cfg = ClientConfig {
        max_results: args.max_results,
        base_delay_ms: args.base_delay_ms,
        lang: args.lang.clone(),
        ..Default::default()
    };
    if !args.endpoints.is_empty() {
        for endpoint in &args.endpoints {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid endpoint URL '{}'", endpoint))?;
        }
        client_cfg.endpoints = args.endpoints.clone();
    }
    let querier = SpatialQueryClient::new(client_cfg, Arc::new(TracingTelemetry));

    let store = ScyllaCandidateStore::new(&args.scylla_uri)
        .await
        .context("Failed to connect to candidate store")?;
    let writer = CandidateWriter::new(store);

    let policy = SubdivisionPolicy {
        max_depth: args.max_depth,
        min_radius_m: args.min_radius_m,
    };
    let budgets = Budgets {
        max_cells_per_category: args.max_cells_per_category,
        max_total_inserts: args.max_inserts,
        max_runtime: Duration::from_secs(args.max_runtime_secs),
    };

    let orchestrator =
        DiscoveryOrchestrator::new(querier, writer, policy, budgets, args.radius_m);
    let summary = orchestrator
        .run(&categories, &category_config.food_hints, chunk)
        .await?;

    log_summary(&summary);

    if let Some(ref dw) = discord {
        let _ = dw.notify_run_complete(&area_label, &summary).await;
    }

    Ok(())
}

/// Resolve the run center: explicit --center wins, then the named area.
fn resolve_area(args: &Args) -> Result<(GridPoint, f64, String)> {
    if let Some(ref raw) = args.center {
        let center = parse_center(raw)?;
        return Ok((center, 4.0, format!("center {}", raw)));
    }

    let name = args
        .area
        .as_deref()
        .context("Either --area or --center is required")?;
    let areas = AreaConfig::load_from_file(&args.areas_file)?;
    let area = areas
        .find(name)
        .with_context(|| format!("Unknown area '{}'", name))?;

    Ok((
        GridPoint {
            lat: area.lat,
            lng: area.lng,
        },
        area.span_km,
        area.name.clone(),
    ))
}

fn parse_center(raw: &str) -> Result<GridPoint> {
    let (lat, lng) = raw
        .split_once(',')
        .context("Center must be \"lat,lng\"")?;
    Ok(GridPoint {
        lat: lat.trim().parse().context("Invalid center latitude")?,
        lng: lng.trim().parse().context("Invalid center longitude")?,
    })
}

fn log_summary(summary: &RunSummary) {
    for stats in &summary.per_category {
        info!(
            category = %stats.name,
            cells = stats.cells_queried,
            raw = stats.raw_elements,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            soft_errors = stats.soft_errors,
            subdivisions = stats.subdivisions,
            "category totals"
        );
    }
    info!(
        cells = summary.cells_queried,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        soft_errors = summary.soft_errors,
        subdivisions = summary.subdivisions,
        budget_exhausted = summary.budget_exhausted,
        "run complete"
    );
}
