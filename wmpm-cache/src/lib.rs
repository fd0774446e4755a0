//! # Projection-mapping cache builder
//!
//! Drives an external fitting engine over every (source, target) region pair
//! and persists the resulting frames:
//! - `engine`: fitting-engine seam and result types
//! - `fitter_process`: line-delimited JSON client for an external fitter
//! - `diagnostics`: output of diagnostic figures
//! - `builder`: resumable, fault-isolated build pass

pub mod builder;
pub mod diagnostics;
pub mod engine;
pub mod fitter_process;

pub use builder::{
    BuildObserver, BuildReport, BuildSettings, CacheBuilder, SourceSummary, TargetOutcome,
    TracingObserver,
};
pub use diagnostics::{DiagnosticSink, DiscardDiagnostics, PlotDirWriter};
pub use engine::{ControlPoints, FitArgs, FitResult, Figure, FittingEngine, PreparedSource};
pub use fitter_process::ExternalFitter;
