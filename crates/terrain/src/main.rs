mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Command, Config};
use log::info;
use terrain::{FileStore, LayerKind, Terrain};

fn open_terrain(config: &Config, name: &str) -> Result<Terrain<FileStore>> {
    let store = FileStore::open(&config.store)
        .with_context(|| format!("opening store {}", config.store.display()))?
        .with_deflate(config.deflate);

    Terrain::open(store, name).with_context(|| format!("opening terrain '{}'", name))
}

fn main() -> Result<()> {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    info!("Using store {}", config.store.display());

    match &config.command {
        Command::IngestPoints(args) => {
            let mut terrain = open_terrain(&config, &args.terrain)?;
            let stats = terrain
                .ingest_points(
                    &args.source,
                    args.layer.as_deref(),
                    &args.options(),
                    args.overwrite,
                )
                .with_context(|| format!("ingesting points from {}", args.source.display()))?;

            println!(
                "{} points, {} duplicates, {} without elevation",
                stats.total, stats.duplicates, stats.missing_elevation
            );
        }

        Command::IngestBreaklines(args) => {
            let mut terrain = open_terrain(&config, &args.terrain)?;
            let count = terrain
                .ingest_breaklines(&args.source, args.layer.as_deref(), &args.options())
                .with_context(|| {
                    format!("ingesting breaklines from {}", args.source.display())
                })?;

            println!("{} breaklines", count);
        }

        Command::Boundary {
            terrain: name,
            tolerance,
            percentile,
        } => {
            let mut terrain = open_terrain(&config, name)?;

            let tolerance = match tolerance {
                Some(t) => *t,
                None => terrain
                    .estimate_boundary_tolerance(*percentile)
                    .context("estimating boundary tolerance")?,
            };

            let record = terrain
                .compute_boundary(tolerance)
                .with_context(|| format!("computing boundary at tolerance {}", tolerance))?;

            println!(
                "tolerance {:.3}: area {:.3}, perimeter {:.3}, {} vertices",
                tolerance, record.area, record.perimeter, record.vertex_count
            );
        }

        Command::EstimateTolerance {
            terrain: name,
            percentile,
        } => {
            let mut terrain = open_terrain(&config, name)?;
            let tolerance = terrain
                .estimate_boundary_tolerance(*percentile)
                .context("estimating boundary tolerance")?;

            println!("{:.3}", tolerance);
        }

        Command::Info { terrain: name } => {
            let store = FileStore::open(&config.store)
                .with_context(|| format!("opening store {}", config.store.display()))?;
            let names = match name {
                Some(name) => vec![name.clone()],
                None => store.terrains()?,
            };

            let mut summaries = Vec::with_capacity(names.len());
            for name in &names {
                let terrain = Terrain::inspect(store.clone(), name)
                    .with_context(|| format!("reading terrain '{}'", name))?;
                summaries.push(terrain.summary()?);
            }

            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }

        Command::Export {
            terrain: name,
            layer,
            output,
        } => {
            let terrain = open_terrain(&config, name)?;
            let kind = LayerKind::from(*layer);
            let count = terrain
                .export_layer(kind, output)
                .with_context(|| format!("exporting {} to {}", kind, output.display()))?;

            println!("{} features", count);
        }
    }

    Ok(())
}
