//! Shared data types for cached projection mappings

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Flatmap assumed when a stored frame carries no coordinate-system label
pub const DEFAULT_FLATMAP: &str = "Allen Dorsal Flatmap";

/// Coordinate frame anchored by three control points in a 2D flatmap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarycentricFrame {
    /// Flatmap x coordinates of the three control points
    pub x: [f64; 3],
    /// Flatmap y coordinates of the three control points
    pub y: [f64; 3],
    /// Name of the flatmap this frame is expressed in
    pub base_coord_system: String,
}

impl BarycentricFrame {
    pub fn new(x: [f64; 3], y: [f64; 3], base_coord_system: impl Into<String>) -> Self {
        Self {
            x,
            y,
            base_coord_system: base_coord_system.into(),
        }
    }

    /// Bit-for-bit equality, so frames holding NaN compare equal to themselves
    pub fn same_bits(&self, other: &Self) -> bool {
        let bits = |a: &[f64; 3], b: &[f64; 3]| a.iter().zip(b).all(|(l, r)| l.to_bits() == r.to_bits());
        bits(&self.x, &other.x)
            && bits(&self.y, &other.y)
            && self.base_coord_system == other.base_coord_system
    }
}

/// Cached fit of one (source, target) region pair
///
/// Created once by the builder and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Frame of the target region
    pub frame: BarycentricFrame,
    /// Fit-quality measure of the mapping
    pub mapping_variance: f64,
    /// Fit residual
    pub error: f64,
    /// Per-element overlap diagnostics from the fit
    pub overlaps: Vec<f64>,
    /// Contributing experiments with complete data (node-based engines only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_experiments: Option<i64>,
}

/// Hemisphere relationship between a source and a target region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    /// Same side as the source
    Ipsi,
    /// Opposite side of the source
    Contra,
}

impl FromStr for Hemisphere {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ipsi" => Ok(Hemisphere::Ipsi),
            "contra" => Ok(Hemisphere::Contra),
            other => Err(Error::InvalidInput(format!(
                "Unknown hemisphere '{}' (expected 'ipsi' or 'contra')",
                other
            ))),
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hemisphere::Ipsi => write!(f, "ipsi"),
            Hemisphere::Contra => write!(f, "contra"),
        }
    }
}

/// Reject region identifiers that cannot be used as a store path component
pub fn validate_region(region: &str) -> Result<()> {
    if region.is_empty() {
        return Err(Error::InvalidInput("Region identifier is empty".to_string()));
    }
    if region.contains('/') {
        return Err(Error::InvalidInput(format!(
            "Region identifier '{}' contains '/'",
            region
        )));
    }
    Ok(())
}
