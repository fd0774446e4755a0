//! Read-only, hemisphere-normalized access to the mapping cache
//!
//! Source frames are always folded onto the right hemisphere. Target frames
//! are folded onto the right hemisphere for ipsilateral projections and onto
//! the left one for contralateral projections. `y` is never changed.

use crate::config::ProjectionMappingConfig;
use crate::db::{init, schema};
use crate::hemisphere::HemisphereTransform;
use crate::types::Hemisphere;
use crate::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

/// Canonicalized frame of a source region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceProjection {
    pub x: [f64; 3],
    pub y: [f64; 3],
    pub base_coord_system: String,
}

/// Hemisphere-normalized frame of a target region, with its fit variance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProjection {
    pub x: [f64; 3],
    pub y: [f64; 3],
    pub base_coord_system: String,
    pub mapping_variance: f64,
}

pub struct ProjectionReader {
    pool: SqlitePool,
    transform: HemisphereTransform,
}

impl ProjectionReader {
    /// Open an existing cache; fails with `NotFound` if the file is absent
    pub async fn open(path: impl AsRef<Path>, mirror_at: f64) -> Result<Self> {
        let pool = init::connect_readonly(path.as_ref()).await?;
        Ok(Self {
            pool,
            transform: HemisphereTransform::new(mirror_at),
        })
    }

    pub async fn from_config(cfg: &ProjectionMappingConfig) -> Result<Self> {
        Self::open(&cfg.store_path, cfg.mirror_at()?).await
    }

    pub fn transform(&self) -> HemisphereTransform {
        self.transform
    }

    pub async fn for_source(&self, source: &str) -> Result<SourceProjection> {
        let mut conn = self.pool.acquire().await?;
        let frame = schema::read_frame(&mut conn, &schema::source_group(source))
            .await?
            .ok_or_else(|| Error::NotFound(format!("No cached frame for source {}", source)))?;

        Ok(SourceProjection {
            x: self.transform.to_right_hemisphere(frame.x),
            y: frame.y,
            base_coord_system: frame.base_coord_system,
        })
    }

    /// Accessor for the targets of one source
    pub fn for_target(&self, source: &str) -> TargetAccessor<'_> {
        TargetAccessor {
            reader: self,
            source: source.to_string(),
        }
    }

    pub async fn list_sources(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        schema::list_sources(&mut conn).await
    }

    pub async fn list_targets(&self, source: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        schema::list_targets(&mut conn, source).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Target lookups bound to one source region
pub struct TargetAccessor<'a> {
    reader: &'a ProjectionReader,
    source: String,
}

impl TargetAccessor<'_> {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fails with `NotFound` if the pair was never successfully cached
    pub async fn get(&self, target: &str, hemi: Hemisphere) -> Result<TargetProjection> {
        let mut conn = self.reader.pool.acquire().await?;
        let entry = schema::read_target_entry(&mut conn, &self.source, target)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("No cached mapping for {}/{}", self.source, target))
            })?;

        Ok(TargetProjection {
            x: self.reader.transform.for_hemisphere(hemi, entry.frame.x),
            y: entry.frame.y,
            base_coord_system: entry.frame.base_coord_system,
            mapping_variance: entry.mapping_variance,
        })
    }
}
