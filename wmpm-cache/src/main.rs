//! wmpm-cache - projection-mapping cache builder and inspector
//!
//! `build` fills the cache for the given sources (all catalog regions when
//! none are given). Re-running it resumes where the previous run stopped and
//! retries the pairs that failed.
//!
//! `show` prints hemisphere-normalized frames from the cache as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use wmpm_cache::{
    BuildSettings, CacheBuilder, DiagnosticSink, DiscardDiagnostics, ExternalFitter,
    PlotDirWriter,
};
use wmpm_common::config::Config;
use wmpm_common::{CoordinateStore, Hemisphere, Parcellation, ProjectionReader, RegionCatalog};

/// Projection-mapping cache tool
#[derive(Parser, Debug)]
#[clap(name = "wmpm-cache")]
#[clap(about = "Build and inspect the projection-mapping cache")]
struct Args {
    /// Configuration file (TOML)
    #[clap(long, short, env = "WMPM_CONFIG", value_name = "FILE")]
    config: PathBuf,

    /// Log at debug level
    #[clap(long, short)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit and cache all targets of the given sources
    Build {
        /// Source regions (default: every region of the parcellation)
        sources: Vec<String>,
    },
    /// Print cached frames of a source, or of one of its targets
    Show {
        source: String,

        #[clap(long)]
        target: Option<String>,

        /// Hemisphere of the target relative to the source (ipsi or contra)
        #[clap(long, default_value = "ipsi")]
        hemi: Hemisphere,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    info!("Starting wmpm-cache v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Build { sources } => build(&config, sources).await,
        Command::Show {
            source,
            target,
            hemi,
        } => show(&config, &source, target.as_deref(), hemi).await,
    }
}

async fn build(config: &Config, sources: Vec<String>) -> Result<()> {
    let pm = &config.projection_mapping;
    let catalog = Parcellation::from_config(&config.parcellation)?;

    let sources = if sources.is_empty() {
        catalog.region_names().to_vec()
    } else {
        for source in &sources {
            if !catalog.contains(source) {
                warn!("Source {} is not part of the parcellation", source);
            }
        }
        sources
    };

    let settings = BuildSettings::from_config(pm)?;
    let engine = ExternalFitter::spawn(config.fitter()?, pm).await?;
    let store = CoordinateStore::open(&pm.store_path)
        .await
        .with_context(|| format!("Cannot open mapping cache {}", pm.store_path.display()))?;

    let sink: Box<dyn DiagnosticSink> = match &pm.plot_dir {
        Some(dir) => {
            info!("Diagnostic figures go to {}", dir.display());
            Box::new(PlotDirWriter::new(dir, &pm.plot_extension))
        }
        None => Box::new(DiscardDiagnostics),
    };

    let mut builder = CacheBuilder::new(engine, store, settings).with_sink(sink);
    let report = builder.build_all(&catalog, &sources).await?;

    let (engine, store) = builder.into_parts();
    store.close().await?;
    engine.shutdown().await?;

    info!(
        "Build finished in {}s: {} computed, {} skipped, {} failed, {} sources not prepared",
        (report.finished_at - report.started_at).num_seconds(),
        report.computed(),
        report.skipped(),
        report.failed(),
        report.failed_sources.len()
    );
    if report.failed() > 0 || !report.failed_sources.is_empty() {
        warn!("Some pairs are not cached; run the build again to retry them");
    }

    Ok(())
}

async fn show(config: &Config, source: &str, target: Option<&str>, hemi: Hemisphere) -> Result<()> {
    let reader = ProjectionReader::from_config(&config.projection_mapping).await?;

    let output = match target {
        Some(target) => {
            let projection = reader.for_target(source).get(target, hemi).await?;
            serde_json::json!({
                "source": source,
                "target": target,
                "hemi": hemi,
                "frame": projection,
            })
        }
        None => {
            let projection = reader.for_source(source).await?;
            let targets = reader.list_targets(source).await?;
            serde_json::json!({
                "source": source,
                "frame": projection,
                "targets": targets,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    reader.close().await;
    Ok(())
}
