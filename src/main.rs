//! Command-line driver: hotel rows in, enriched hotels and city weather out.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use geoenrich::{CityWeather, EnrichConfig, EnrichedHotel, EnrichmentEngine, HotelRow, logging};

/// Enrich hotel rows with addresses and per-city weather
#[derive(Debug, Parser)]
#[command(name = "geoenrich", version, about)]
struct Args {
    /// JSON array of hotel rows
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the result document (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "GEOENRICH_CONFIG")]
    config: Option<PathBuf>,

    /// Keep results in memory only; the persistent cache is neither read nor written
    #[arg(long)]
    no_cache: bool,

    /// Give up on each batch after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Serialize)]
struct Report {
    hotels: Vec<EnrichedHotel>,
    weather: Vec<CityWeather>,
}

async fn run(args: Args) -> Result<()> {
    let config = EnrichConfig::load_from_path(args.config.clone())?;
    logging::init(&config.logging).context("Failed to initialize logging")?;

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let rows: Vec<HotelRow> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse hotel rows from {}", args.input.display()))?;
    for row in &rows {
        row.validate()?;
    }
    info!(rows = rows.len(), input = %args.input.display(), "Loaded hotel rows");

    let mut engine = if args.no_cache {
        EnrichmentEngine::in_memory(&config)?
    } else {
        EnrichmentEngine::from_config(&config)?
    };
    if let Some(secs) = args.deadline_secs {
        engine = engine.with_deadline(Duration::from_secs(secs));
    }

    let cities = engine.city_centroids(&rows);
    let weather = engine.enrich_weather(&cities).await?;
    let hotels = engine.enrich_hotels(rows).await?;
    engine.shutdown().await?;

    let document = serde_json::to_string_pretty(&Report { hotels, weather })?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, document)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(output = %path.display(), "Results written");
        }
        None => println!("{document}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        match e.downcast_ref::<geoenrich::EnrichError>() {
            Some(err) => eprintln!("geoenrich: {}", err.user_message()),
            None => eprintln!("geoenrich error: {e:#}"),
        }
        process::exit(1);
    }
}
