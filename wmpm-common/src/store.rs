//! Write-side handle on the mapping cache
//!
//! Writes issued since the last [`CoordinateStore::flush`] are held in one
//! open transaction. Flushing commits them; dropping the store (or a crash)
//! before that discards them, so a record either exists completely on the
//! next run or not at all.
//!
//! One writer per store file. Running two build passes against the same file
//! at once is not arbitrated here; the second writer fails with a storage
//! error once the lock wait expires.

use crate::db::{init, schema};
use crate::types::{validate_region, BarycentricFrame, TargetEntry};
use crate::{Error, Result};
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of writing a source's own frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWrite {
    /// Frame was absent and has been written
    Written,
    /// An identical frame was already stored
    Unchanged,
    /// A different frame was already stored and has been kept
    Conflict,
}

pub struct CoordinateStore {
    conn: SqliteConnection,
    path: PathBuf,
    in_transaction: bool,
}

impl CoordinateStore {
    /// Open for read-write, creating the file and its parent folders if absent
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = init::open_write_connection(&path).await?;
        Ok(Self {
            conn,
            path,
            in_transaction: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff a complete record exists for the pair
    pub async fn has_target(&mut self, source: &str, target: &str) -> Result<bool> {
        schema::has_target(&mut self.conn, source, target).await
    }

    pub async fn has_source_frame(&mut self, source: &str) -> Result<bool> {
        schema::has_source_frame(&mut self.conn, source).await
    }

    /// Store the source's own frame unless one is already present
    ///
    /// An existing frame is never overwritten, even if it differs.
    pub async fn write_source_frame(
        &mut self,
        source: &str,
        frame: &BarycentricFrame,
    ) -> Result<FrameWrite> {
        validate_region(source)?;
        let group = schema::source_group(source);

        if let Some(existing) = schema::read_frame(&mut self.conn, &group).await? {
            if existing.same_bits(frame) {
                return Ok(FrameWrite::Unchanged);
            }
            warn!(
                "Source frame for {} already cached and differs from the new fit; keeping cached frame",
                source
            );
            return Ok(FrameWrite::Conflict);
        }

        self.begin().await?;
        schema::write_frame(&mut self.conn, &group, frame).await?;
        debug!("Wrote source frame for {}", source);
        Ok(FrameWrite::Written)
    }

    /// Store a target record; complete records are never overwritten
    pub async fn write_target_entry(
        &mut self,
        source: &str,
        target: &str,
        entry: &TargetEntry,
    ) -> Result<()> {
        validate_region(source)?;
        validate_region(target)?;

        if self.has_target(source, target).await? {
            return Err(Error::Conflict(format!(
                "{}/{} is already cached",
                source, target
            )));
        }

        self.begin().await?;
        schema::write_target_entry(&mut self.conn, source, target, entry).await
    }

    /// Make every write issued so far durable
    pub async fn flush(&mut self) -> Result<()> {
        if self.in_transaction {
            sqlx::query("COMMIT").execute(&mut self.conn).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Flush pending writes and release the file
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        self.conn.close().await?;
        Ok(())
    }

    pub async fn read_source_frame(&mut self, source: &str) -> Result<BarycentricFrame> {
        schema::read_frame(&mut self.conn, &schema::source_group(source))
            .await?
            .ok_or_else(|| Error::NotFound(format!("No cached frame for source {}", source)))
    }

    pub async fn read_target_entry(&mut self, source: &str, target: &str) -> Result<TargetEntry> {
        schema::read_target_entry(&mut self.conn, source, target)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No cached mapping for {}/{}", source, target)))
    }

    pub async fn list_sources(&mut self) -> Result<Vec<String>> {
        schema::list_sources(&mut self.conn).await
    }

    pub async fn list_targets(&mut self, source: &str) -> Result<Vec<String>> {
        schema::list_targets(&mut self.conn, source).await
    }

    async fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            sqlx::query("BEGIN IMMEDIATE").execute(&mut self.conn).await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}
