//! Fitting-engine seam
//!
//! The engine computes barycentric frames and their goodness-of-fit metrics
//! from connectivity data. The builder treats it as a black box that may fail
//! for any single target.

use serde::Serialize;
use wmpm_common::config::ProjectionMappingConfig;
use wmpm_common::{BarycentricFrame, Result};

/// Flatmap coordinates of three control points, before labelling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoints {
    pub x: [f64; 3],
    pub y: [f64; 3],
}

impl ControlPoints {
    pub fn in_flatmap(&self, flatmap: &str) -> BarycentricFrame {
        BarycentricFrame::new(self.x, self.y, flatmap)
    }
}

/// State exposed by the engine once it has prepared for a source
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSource {
    /// The source region's own frame
    pub coords: ControlPoints,
    /// Per-experiment feature rows (node-based engines only); NaN marks missing data
    pub experiment_columns: Option<Vec<Vec<f64>>>,
}

/// Encoded diagnostic figure (e.g. PNG bytes) produced by a fit
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Output of one target fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub coords: ControlPoints,
    pub variance: f64,
    pub overlaps: Vec<f64>,
    pub error: f64,
    pub diagnostics: Vec<Figure>,
}

/// Pass-through options for a target fit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitArgs {
    pub target_args: serde_json::Value,
    pub pp_use: serde_json::Value,
    pub pp_display: serde_json::Value,
    pub fit_args: serde_json::Value,
    /// Ask the engine for diagnostic figures
    pub draw: bool,
}

impl FitArgs {
    pub fn from_config(cfg: &ProjectionMappingConfig) -> Self {
        Self {
            target_args: cfg.target_args.clone(),
            pp_use: cfg.pp_use.clone(),
            pp_display: cfg.pp_display.clone(),
            fit_args: cfg.fit_args.clone(),
            draw: cfg.plot_dir.is_some(),
        }
    }
}

#[async_trait::async_trait]
pub trait FittingEngine: Send {
    /// Expensive per-source precomputation, amortized over all targets
    async fn prepare_for_source(
        &mut self,
        source: &str,
        args: &serde_json::Value,
    ) -> Result<PreparedSource>;

    /// Fit the target against the source prepared last
    async fn fit_target(&mut self, target: &str, args: &FitArgs) -> Result<FitResult>;
}

/// Number of experiments whose every feature is present
pub fn count_complete_experiments(rows: &[Vec<f64>]) -> i64 {
    rows.iter()
        .filter(|row| row.iter().all(|v| !v.is_nan()))
        .count() as i64
}
