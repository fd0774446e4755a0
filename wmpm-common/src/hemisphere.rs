//! Hemisphere folding of flatmap x coordinates
//!
//! Flatmap x values on either side of `mirror_at` belong to opposite
//! hemispheres. Folding reflects values across the pivot (`2 * mirror_at - x`)
//! so that a coordinate set is expressed relative to one canonical side.
//! Callers apply at most one of the two folds to a coordinate set.

use crate::types::Hemisphere;

/// Reflection of x coordinates around a configured pivot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HemisphereTransform {
    mirror_at: f64,
}

impl HemisphereTransform {
    pub fn new(mirror_at: f64) -> Self {
        Self { mirror_at }
    }

    pub fn mirror_at(&self) -> f64 {
        self.mirror_at
    }

    /// Fold values below the pivot onto the right side; others unchanged
    pub fn to_right_hemisphere<const N: usize>(&self, x: [f64; N]) -> [f64; N] {
        x.map(|v| if v < self.mirror_at { self.reflect(v) } else { v })
    }

    /// Fold values at or above the pivot onto the left side; others unchanged
    pub fn to_left_hemisphere<const N: usize>(&self, x: [f64; N]) -> [f64; N] {
        x.map(|v| if v >= self.mirror_at { self.reflect(v) } else { v })
    }

    /// Ipsilateral targets go to the right hemisphere, contralateral to the left
    pub fn for_hemisphere<const N: usize>(&self, hemi: Hemisphere, x: [f64; N]) -> [f64; N] {
        match hemi {
            Hemisphere::Ipsi => self.to_right_hemisphere(x),
            Hemisphere::Contra => self.to_left_hemisphere(x),
        }
    }

    fn reflect(&self, v: f64) -> f64 {
        2.0 * self.mirror_at - v
    }
}
