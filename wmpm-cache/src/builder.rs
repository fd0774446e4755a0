//! Cache build pass
//!
//! For each source region: prepare the engine once, store the source's own
//! frame, then walk every target in catalog order. A target already in the
//! store is skipped without touching the engine. A target whose fit or
//! diagnostics fail is reported and left absent, and the walk goes on; the
//! next pass retries it. Every stored target is flushed before the next one
//! starts, so an interrupted pass loses at most the target in flight.
//!
//! Only store failures abort a pass.

use crate::diagnostics::{DiagnosticSink, DiscardDiagnostics};
use crate::engine::{count_complete_experiments, FitArgs, FittingEngine};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wmpm_common::config::{MapperClass, ProjectionMappingConfig};
use wmpm_common::types::validate_region;
use wmpm_common::{CoordinateStore, FrameWrite, RegionCatalog, Result, TargetEntry};

/// Everything the builder needs from configuration
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub class: MapperClass,
    pub flatmap: String,
    pub prepare_args: serde_json::Value,
    pub fit_args: FitArgs,
}

impl BuildSettings {
    pub fn from_config(cfg: &ProjectionMappingConfig) -> Result<Self> {
        Ok(Self {
            class: cfg.mapper_class()?,
            flatmap: cfg.flatmap.clone(),
            prepare_args: cfg.prepare_args.clone(),
            fit_args: FitArgs::from_config(cfg),
        })
    }
}

/// Why a single target was not cached
#[derive(Debug, Error)]
pub enum TargetFailure {
    #[error("{0}")]
    Fit(wmpm_common::Error),

    #[error("diagnostics rendering failed: {0}")]
    Render(std::io::Error),
}

/// Result of one target within a source pass
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// Already cached by an earlier pass
    Skipped,
    /// Fitted and stored in this pass
    Computed(TargetEntry),
    /// Not cached; retried on the next pass
    Failed(String),
}

/// Observability hooks; the defaults log through `tracing`
pub trait BuildObserver: Send {
    fn on_skip(&mut self, source: &str, target: &str) {
        info!("{}/{} already present. Skipping...", source, target);
    }

    fn on_computed(&mut self, source: &str, target: &str, entry: &TargetEntry) {
        info!(
            "{}/{} cached (variance {:.4}, error {:.4})",
            source, target, entry.mapping_variance, entry.error
        );
    }

    fn on_failure(&mut self, source: &str, target: &str, reason: &str) {
        error!("Trouble with {}/{}: {}", source, target, reason);
    }

    fn on_source_failure(&mut self, source: &str, reason: &str) {
        error!("Cannot build source {}: {}", source, reason);
    }
}

/// Observer using only the default logging hooks
pub struct TracingObserver;

impl BuildObserver for TracingObserver {}

/// Outcome of one source pass
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub source: String,
    pub frame: FrameWrite,
    pub computed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SourceSummary {
    fn new(source: &str, frame: FrameWrite) -> Self {
        Self {
            source: source.to_string(),
            frame,
            computed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record(&mut self, target: &str, outcome: TargetOutcome) {
        match outcome {
            TargetOutcome::Skipped => self.skipped.push(target.to_string()),
            TargetOutcome::Computed(_) => self.computed.push(target.to_string()),
            TargetOutcome::Failed(reason) => self.failed.push((target.to_string(), reason)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a multi-source run
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceSummary>,
    /// Sources whose preparation failed, with the reason
    pub failed_sources: Vec<(String, String)>,
}

impl BuildReport {
    pub fn computed(&self) -> usize {
        self.sources.iter().map(|s| s.computed.len()).sum()
    }

    pub fn skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed.len()).sum()
    }
}

pub struct CacheBuilder<E: FittingEngine> {
    engine: E,
    store: CoordinateStore,
    settings: BuildSettings,
    sink: Box<dyn DiagnosticSink>,
    observer: Box<dyn BuildObserver>,
}

impl<E: FittingEngine> CacheBuilder<E> {
    pub fn new(engine: E, store: CoordinateStore, settings: BuildSettings) -> Self {
        Self {
            engine,
            store,
            settings,
            sink: Box::new(DiscardDiagnostics),
            observer: Box::new(TracingObserver),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&mut self) -> &mut CoordinateStore {
        &mut self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Hand back the engine and the store (still open)
    pub fn into_parts(self) -> (E, CoordinateStore) {
        (self.engine, self.store)
    }

    /// Fill the store for `source` against every target of the catalog
    ///
    /// Fails only if the source cannot be prepared or the store fails.
    pub async fn build_source(
        &mut self,
        source: &str,
        catalog: &dyn RegionCatalog,
    ) -> Result<SourceSummary> {
        validate_region(source)?;
        info!("Preparing fitting engine for source {}", source);
        let prepared = self
            .engine
            .prepare_for_source(source, &self.settings.prepare_args)
            .await?;

        let frame = prepared.coords.in_flatmap(&self.settings.flatmap);
        let frame_write = self.store.write_source_frame(source, &frame).await?;
        self.store.flush().await?;

        let n_experiments = if self.settings.class.is_node_based() {
            match &prepared.experiment_columns {
                Some(rows) => Some(count_complete_experiments(rows)),
                None => {
                    warn!(
                        "{} engine returned no experiment data for {}; n_experiments not recorded",
                        self.settings.class, source
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut summary = SourceSummary::new(source, frame_write);
        for target in catalog.region_names() {
            let outcome = self.process_target(source, target, n_experiments).await?;
            summary.record(target, outcome);
        }

        info!(
            "Source {}: {} computed, {} skipped, {} failed",
            source,
            summary.computed.len(),
            summary.skipped.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Run the pass for each source in order
    ///
    /// A source that cannot be prepared is reported and skipped; a store
    /// failure ends the run.
    pub async fn build_all(
        &mut self,
        catalog: &dyn RegionCatalog,
        sources: &[String],
    ) -> Result<BuildReport> {
        let started_at = Utc::now();
        let mut report_sources = Vec::with_capacity(sources.len());
        let mut failed_sources = Vec::new();

        for source in sources {
            match self.build_source(source, catalog).await {
                Ok(summary) => report_sources.push(summary),
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    self.observer.on_source_failure(source, &e.to_string());
                    failed_sources.push((source.clone(), e.to_string()));
                }
            }
        }

        Ok(BuildReport {
            started_at,
            finished_at: Utc::now(),
            sources: report_sources,
            failed_sources,
        })
    }

    /// One unit of work; `Err` only for store failures
    pub async fn process_target(
        &mut self,
        source: &str,
        target: &str,
        n_experiments: Option<i64>,
    ) -> Result<TargetOutcome> {
        if let Err(e) = validate_region(target) {
            let reason = e.to_string();
            self.observer.on_failure(source, target, &reason);
            return Ok(TargetOutcome::Failed(reason));
        }

        if self.store.has_target(source, target).await? {
            self.observer.on_skip(source, target);
            return Ok(TargetOutcome::Skipped);
        }

        let entry = match self.compute_target(source, target, n_experiments).await {
            Ok(entry) => entry,
            Err(failure) => {
                let reason = failure.to_string();
                self.observer.on_failure(source, target, &reason);
                return Ok(TargetOutcome::Failed(reason));
            }
        };

        self.store.write_target_entry(source, target, &entry).await?;
        self.store.flush().await?;
        self.observer.on_computed(source, target, &entry);

        Ok(TargetOutcome::Computed(entry))
    }

    async fn compute_target(
        &mut self,
        source: &str,
        target: &str,
        n_experiments: Option<i64>,
    ) -> std::result::Result<TargetEntry, TargetFailure> {
        debug!("Fitting {}/{}", source, target);
        let fit = self
            .engine
            .fit_target(target, &self.settings.fit_args)
            .await
            .map_err(TargetFailure::Fit)?;

        self.sink
            .render(source, target, &fit.diagnostics)
            .map_err(TargetFailure::Render)?;

        Ok(TargetEntry {
            frame: fit.coords.in_flatmap(&self.settings.flatmap),
            mapping_variance: fit.variance,
            error: fit.error,
            overlaps: fit.overlaps,
            n_experiments,
        })
    }
}
