//! Integration tests for the cache build pass
//!
//! A scripted engine stands in for the external fitter and records every
//! call, so skip, retry and isolation behavior can be asserted exactly.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wmpm_cache::{
    BuildObserver, BuildSettings, CacheBuilder, ControlPoints, DiagnosticSink, FitArgs, FitResult,
    Figure, FittingEngine, PlotDirWriter, PreparedSource, TargetOutcome,
};
use wmpm_common::config::MapperClass;
use wmpm_common::{
    CoordinateStore, Error, FrameWrite, Hemisphere, Parcellation, ProjectionReader, RegionCatalog, Result,
    TargetEntry,
};

#[derive(Default)]
struct Calls {
    prepared: Vec<String>,
    fitted: Vec<String>,
}

/// Engine whose per-target results are fixed up front
struct ScriptedEngine {
    calls: Arc<Mutex<Calls>>,
    failing_targets: HashSet<String>,
    failing_sources: HashSet<String>,
    variances: HashMap<String, f64>,
    experiment_columns: Option<Vec<Vec<f64>>>,
    figures: Vec<Figure>,
}

impl ScriptedEngine {
    fn new(calls: Arc<Mutex<Calls>>) -> Self {
        Self {
            calls,
            failing_targets: HashSet::new(),
            failing_sources: HashSet::new(),
            variances: HashMap::new(),
            experiment_columns: None,
            figures: Vec::new(),
        }
    }

    fn failing_on(mut self, target: &str) -> Self {
        self.failing_targets.insert(target.to_string());
        self
    }

    fn failing_prepare_on(mut self, source: &str) -> Self {
        self.failing_sources.insert(source.to_string());
        self
    }

    fn variance(mut self, target: &str, variance: f64) -> Self {
        self.variances.insert(target.to_string(), variance);
        self
    }
}

#[async_trait::async_trait]
impl FittingEngine for ScriptedEngine {
    async fn prepare_for_source(
        &mut self,
        source: &str,
        _args: &serde_json::Value,
    ) -> Result<PreparedSource> {
        self.calls.lock().unwrap().prepared.push(source.to_string());
        if self.failing_sources.contains(source) {
            return Err(Error::Fit(format!("no injections in {}", source)));
        }
        Ok(PreparedSource {
            coords: ControlPoints {
                x: [1.0, 2.0, 3.0],
                y: [4.0, 5.0, 6.0],
            },
            experiment_columns: self.experiment_columns.clone(),
        })
    }

    async fn fit_target(&mut self, target: &str, _args: &FitArgs) -> Result<FitResult> {
        self.calls.lock().unwrap().fitted.push(target.to_string());
        if self.failing_targets.contains(target) {
            return Err(Error::Fit(format!("degenerate geometry for {}", target)));
        }
        Ok(FitResult {
            coords: ControlPoints {
                x: [1.0, 2.0, 3.0],
                y: [7.0, 8.0, 9.0],
            },
            variance: self.variances.get(target).copied().unwrap_or(0.25),
            overlaps: vec![0.9, 0.8],
            error: 0.1,
            diagnostics: self.figures.clone(),
        })
    }
}

/// Observer recording hook invocations
#[derive(Clone, Default)]
struct RecordingObserver {
    events: Arc<Mutex<Vec<String>>>,
}

impl BuildObserver for RecordingObserver {
    fn on_skip(&mut self, source: &str, target: &str) {
        self.events.lock().unwrap().push(format!("skip {}/{}", source, target));
    }

    fn on_computed(&mut self, source: &str, target: &str, _entry: &TargetEntry) {
        self.events.lock().unwrap().push(format!("computed {}/{}", source, target));
    }

    fn on_failure(&mut self, source: &str, target: &str, _reason: &str) {
        self.events.lock().unwrap().push(format!("failed {}/{}", source, target));
    }

    fn on_source_failure(&mut self, source: &str, _reason: &str) {
        self.events.lock().unwrap().push(format!("source failed {}", source));
    }
}

struct FailingSink;

impl DiagnosticSink for FailingSink {
    fn render(&mut self, _source: &str, target: &str, _figures: &[Figure]) -> std::io::Result<()> {
        if target == "C" {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "plot dir read-only"))
        } else {
            Ok(())
        }
    }
}

fn settings(class: MapperClass) -> BuildSettings {
    BuildSettings {
        class,
        flatmap: "Allen Dorsal Flatmap".to_string(),
        prepare_args: serde_json::json!({}),
        fit_args: FitArgs {
            target_args: serde_json::json!({}),
            pp_use: serde_json::json!({}),
            pp_display: serde_json::json!({}),
            fit_args: serde_json::json!({}),
            draw: false,
        },
    }
}

async fn builder(
    path: &Path,
    engine: ScriptedEngine,
    class: MapperClass,
) -> CacheBuilder<ScriptedEngine> {
    let store = CoordinateStore::open(path).await.unwrap();
    CacheBuilder::new(engine, store, settings(class))
}

#[tokio::test]
async fn test_failed_target_retried_and_cached_target_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let catalog = Parcellation::new(["B", "C"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let engine = ScriptedEngine::new(calls.clone()).failing_on("C").variance("B", 0.5);
    let mut b = builder(&path, engine, MapperClass::VoxelArray).await;
    let summary = b.build_source("A", &catalog).await.unwrap();

    assert_eq!(summary.computed, vec!["B"]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "C");
    assert!(!summary.is_complete());
    assert!(b.store().has_target("A", "B").await.unwrap());
    assert!(!b.store().has_target("A", "C").await.unwrap());
    assert_eq!(b.store().read_target_entry("A", "B").await.unwrap().mapping_variance, 0.5);

    let (_, store) = b.into_parts();
    store.close().await.unwrap();

    // Second pass: no new fit for B, exactly one retry for C
    calls.lock().unwrap().fitted.clear();
    let engine = ScriptedEngine::new(calls.clone()).failing_on("C");
    let mut b = builder(&path, engine, MapperClass::VoxelArray).await;
    let summary = b.build_source("A", &catalog).await.unwrap();

    assert_eq!(calls.lock().unwrap().fitted, vec!["C"]);
    assert_eq!(summary.skipped, vec!["B"]);
    assert_eq!(summary.frame, FrameWrite::Unchanged);
}

#[tokio::test]
async fn test_failure_does_not_stop_later_targets() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["B", "C", "D"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let engine = ScriptedEngine::new(calls.clone()).failing_on("C");
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray).await;
    b.build_source("A", &catalog).await.unwrap();

    assert_eq!(calls.lock().unwrap().fitted, vec!["B", "C", "D"]);
    assert!(b.store().has_target("A", "B").await.unwrap());
    assert!(!b.store().has_target("A", "C").await.unwrap());
    assert!(b.store().has_target("A", "D").await.unwrap());
}

#[tokio::test]
async fn test_complete_cache_issues_no_fit_calls() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let catalog = Parcellation::new(["A", "B", "C"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let mut b = builder(&path, ScriptedEngine::new(calls.clone()), MapperClass::VoxelArray).await;
    b.build_source("A", &catalog).await.unwrap();
    let before = b.store().read_target_entry("A", "B").await.unwrap();
    b.into_parts().1.close().await.unwrap();

    calls.lock().unwrap().fitted.clear();
    let observer = RecordingObserver::default();
    let events = observer.events.clone();
    let mut b = builder(&path, ScriptedEngine::new(calls.clone()), MapperClass::VoxelArray)
        .await
        .with_observer(Box::new(observer));
    let summary = b.build_source("A", &catalog).await.unwrap();

    assert!(calls.lock().unwrap().fitted.is_empty());
    assert!(summary.computed.is_empty());
    assert_eq!(summary.skipped, vec!["A", "B", "C"]);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["skip A/A", "skip A/B", "skip A/C"]
    );
    assert_eq!(b.store().read_target_entry("A", "B").await.unwrap(), before);
}

#[tokio::test]
async fn test_interrupted_pass_resumes_remaining_targets() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let calls = Arc::new(Mutex::new(Calls::default()));

    // Pass that got through the first two targets before being stopped
    {
        let partial = Parcellation::new(["B", "C"]).unwrap();
        let mut b = builder(&path, ScriptedEngine::new(calls.clone()), MapperClass::VoxelArray).await;
        b.build_source("A", &partial).await.unwrap();
        // Dropped without close: only flushed work persists
    }
    let first_b = {
        let mut store = CoordinateStore::open(&path).await.unwrap();
        store.read_target_entry("A", "B").await.unwrap()
    };

    calls.lock().unwrap().fitted.clear();
    let full = Parcellation::new(["B", "C", "D", "E"]).unwrap();
    let engine = ScriptedEngine::new(calls.clone()).variance("B", 0.99);
    let mut b = builder(&path, engine, MapperClass::VoxelArray).await;
    let summary = b.build_source("A", &full).await.unwrap();

    assert_eq!(calls.lock().unwrap().fitted, vec!["D", "E"]);
    assert_eq!(summary.skipped, vec!["B", "C"]);
    assert_eq!(b.store().read_target_entry("A", "B").await.unwrap(), first_b);
}

#[tokio::test]
async fn test_node_based_engine_records_experiment_count() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["B"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let mut engine = ScriptedEngine::new(calls);
    engine.experiment_columns = Some(vec![
        vec![1.0, 2.0],
        vec![f64::NAN, 2.0],
        vec![3.0, 4.0],
    ]);
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelNode).await;
    b.build_source("A", &catalog).await.unwrap();

    let entry = b.store().read_target_entry("A", "B").await.unwrap();
    assert_eq!(entry.n_experiments, Some(2));
}

#[tokio::test]
async fn test_array_engine_records_no_experiment_count() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["B"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let mut engine = ScriptedEngine::new(calls);
    engine.experiment_columns = Some(vec![vec![1.0]]);
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray).await;
    b.build_source("A", &catalog).await.unwrap();

    let entry = b.store().read_target_entry("A", "B").await.unwrap();
    assert_eq!(entry.n_experiments, None);
}

#[tokio::test]
async fn test_source_frame_and_labels_stored() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["B"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let engine = ScriptedEngine::new(calls.clone());
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray).await;
    let summary = b.build_source("A", &catalog).await.unwrap();

    assert_eq!(summary.frame, FrameWrite::Written);
    assert_eq!(calls.lock().unwrap().prepared, vec!["A"]);
    let frame = b.store().read_source_frame("A").await.unwrap();
    assert_eq!(frame.x, [1.0, 2.0, 3.0]);
    assert_eq!(frame.y, [4.0, 5.0, 6.0]);
    assert_eq!(frame.base_coord_system, "Allen Dorsal Flatmap");

    let entry = b.store().read_target_entry("A", "B").await.unwrap();
    assert_eq!(entry.frame.base_coord_system, "Allen Dorsal Flatmap");
    assert_eq!(entry.overlaps, vec![0.9, 0.8]);
}

#[tokio::test]
async fn test_render_failure_isolated_to_its_target() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["B", "C", "D"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let engine = ScriptedEngine::new(calls);
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray)
        .await
        .with_sink(Box::new(FailingSink));
    let summary = b.build_source("A", &catalog).await.unwrap();

    assert_eq!(summary.computed, vec!["B", "D"]);
    assert_eq!(summary.failed[0].0, "C");
    assert!(summary.failed[0].1.contains("plot dir read-only"));
    assert!(!b.store().has_target("A", "C").await.unwrap());
}

#[tokio::test]
async fn test_figures_written_to_plot_dir() {
    let dir = TempDir::new().unwrap();
    let plots = dir.path().join("plots");
    let catalog = Parcellation::new(["B"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let mut engine = ScriptedEngine::new(calls);
    engine.figures = vec![Figure {
        name: "model".to_string(),
        bytes: b"png".to_vec(),
    }];
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray)
        .await
        .with_sink(Box::new(PlotDirWriter::new(&plots, ".png")));
    b.build_source("A", &catalog).await.unwrap();

    assert_eq!(std::fs::read(plots.join("A/B/B_model.png")).unwrap(), b"png");
}

#[tokio::test]
async fn test_build_all_continues_past_unpreparable_source() {
    let dir = TempDir::new().unwrap();
    let catalog = Parcellation::new(["A", "B", "C"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));
    let observer = RecordingObserver::default();
    let events = observer.events.clone();

    let engine = ScriptedEngine::new(calls.clone()).failing_prepare_on("B");
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray)
        .await
        .with_observer(Box::new(observer));
    let report = b.build_all(&catalog, catalog.region_names()).await.unwrap();

    assert_eq!(calls.lock().unwrap().prepared, vec!["A", "B", "C"]);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.failed_sources[0].0, "B");
    assert_eq!(report.computed(), 6);
    assert_eq!(report.failed(), 0);
    assert!(events.lock().unwrap().contains(&"source failed B".to_string()));
    assert!(!b.store().has_source_frame("B").await.unwrap());
    assert!(b.store().has_target("C", "A").await.unwrap());
}

#[tokio::test]
async fn test_process_target_reports_outcomes() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let engine = ScriptedEngine::new(calls).failing_on("C");
    let mut b = builder(&dir.path().join("cache.db"), engine, MapperClass::VoxelArray).await;

    assert!(matches!(
        b.process_target("A", "B", None).await.unwrap(),
        TargetOutcome::Computed(_)
    ));
    assert_eq!(b.process_target("A", "B", None).await.unwrap(), TargetOutcome::Skipped);
    assert!(matches!(
        b.process_target("A", "C", None).await.unwrap(),
        TargetOutcome::Failed(reason) if reason.contains("degenerate geometry")
    ));
    assert!(matches!(
        b.process_target("A", "x/y", None).await.unwrap(),
        TargetOutcome::Failed(_)
    ));
}

#[tokio::test]
async fn test_built_cache_readable_with_hemisphere_folding() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let catalog = Parcellation::new(["B"]).unwrap();
    let calls = Arc::new(Mutex::new(Calls::default()));

    let mut b = builder(&path, ScriptedEngine::new(calls), MapperClass::VoxelArray).await;
    b.build_source("A", &catalog).await.unwrap();
    b.into_parts().1.close().await.unwrap();

    let reader = ProjectionReader::open(&path, 5.0).await.unwrap();
    let accessor = reader.for_target("A");
    assert_eq!(accessor.get("B", Hemisphere::Ipsi).await.unwrap().x, [9.0, 8.0, 7.0]);
    assert_eq!(accessor.get("B", Hemisphere::Contra).await.unwrap().x, [1.0, 2.0, 3.0]);
    assert_eq!(reader.for_source("A").await.unwrap().x, [9.0, 8.0, 7.0]);
}
