//! # Projection-mapping cache common library
//!
//! Shared code for building and reading the projection-mapping cache:
//! - Frame and record types
//! - Error type
//! - Configuration loading and the parcellation catalog
//! - Hemisphere folding of flatmap coordinates
//! - On-disk store (write side) and projection reader (read side)

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod hemisphere;
pub mod reader;
pub mod store;
pub mod types;

pub use catalog::{Parcellation, RegionCatalog};
pub use error::{Error, Result};
pub use hemisphere::HemisphereTransform;
pub use reader::{ProjectionReader, SourceProjection, TargetAccessor, TargetProjection};
pub use store::{CoordinateStore, FrameWrite};
pub use types::{BarycentricFrame, Hemisphere, TargetEntry, DEFAULT_FLATMAP};
