//! Hierarchical dataset paths and record-level read/write
//!
//! ```text
//! /<source>/coordinates/{base_coord_system,x,y}
//! /<source>/targets/<target>/coordinates/{base_coord_system,x,y}
//! /<source>/targets/<target>/{mapping_variance,error,overlaps,n_experiments}
//! ```
//!
//! Every record is written with `coordinates/base_coord_system` last. Its
//! presence marks the record as complete.

use super::datasets::{dataset_exists, fetch_dataset, paths_with_suffix, put_dataset, Dataset};
use crate::types::{BarycentricFrame, TargetEntry, DEFAULT_FLATMAP};
use crate::{Error, Result};
use sqlx::sqlite::SqliteConnection;

/// Field whose presence marks a frame as completely written
pub const COMPLETION_MARKER: &str = "coordinates/base_coord_system";

pub fn source_group(source: &str) -> String {
    format!("/{}", source)
}

pub fn target_group(source: &str, target: &str) -> String {
    format!("/{}/targets/{}", source, target)
}

fn field(group: &str, name: &str) -> String {
    format!("{}/{}", group, name)
}

/// Write a frame's x, y and finally its coordinate-system marker
pub async fn write_frame(
    conn: &mut SqliteConnection,
    group: &str,
    frame: &BarycentricFrame,
) -> Result<()> {
    put_dataset(conn, &field(group, "coordinates/x"), &Dataset::Float(frame.x.to_vec())).await?;
    put_dataset(conn, &field(group, "coordinates/y"), &Dataset::Float(frame.y.to_vec())).await?;
    put_dataset(
        conn,
        &field(group, COMPLETION_MARKER),
        &Dataset::Str(frame.base_coord_system.clone()),
    )
    .await?;
    Ok(())
}

/// Read a frame, `None` if its coordinates were never written
///
/// A missing coordinate-system label falls back to [`DEFAULT_FLATMAP`].
pub async fn read_frame(
    conn: &mut SqliteConnection,
    group: &str,
) -> Result<Option<BarycentricFrame>> {
    let x_path = field(group, "coordinates/x");
    let y_path = field(group, "coordinates/y");

    let Some(x) = fetch_dataset(conn, &x_path).await? else {
        return Ok(None);
    };
    let Some(y) = fetch_dataset(conn, &y_path).await? else {
        return Ok(None);
    };

    let marker_path = field(group, COMPLETION_MARKER);
    let base_coord_system = match fetch_dataset(conn, &marker_path).await? {
        Some(ds) => ds.into_string(&marker_path)?,
        None => DEFAULT_FLATMAP.to_string(),
    };

    Ok(Some(BarycentricFrame {
        x: control_points(&x_path, x.into_floats(&x_path)?)?,
        y: control_points(&y_path, y.into_floats(&y_path)?)?,
        base_coord_system,
    }))
}

fn control_points(path: &str, values: Vec<f64>) -> Result<[f64; 3]> {
    let len = values.len();
    values.try_into().map_err(|_| {
        Error::InvalidInput(format!("Dataset {} holds {} values, expected 3", path, len))
    })
}

pub async fn has_source_frame(conn: &mut SqliteConnection, source: &str) -> Result<bool> {
    dataset_exists(conn, &field(&source_group(source), "coordinates/x")).await
}

pub async fn has_target(conn: &mut SqliteConnection, source: &str, target: &str) -> Result<bool> {
    dataset_exists(conn, &field(&target_group(source, target), COMPLETION_MARKER)).await
}

/// Write all fields of a target record, metrics first and the frame last
pub async fn write_target_entry(
    conn: &mut SqliteConnection,
    source: &str,
    target: &str,
    entry: &TargetEntry,
) -> Result<()> {
    let group = target_group(source, target);

    put_dataset(
        conn,
        &field(&group, "mapping_variance"),
        &Dataset::Float(vec![entry.mapping_variance]),
    )
    .await?;
    put_dataset(conn, &field(&group, "error"), &Dataset::Float(vec![entry.error])).await?;
    put_dataset(
        conn,
        &field(&group, "overlaps"),
        &Dataset::Float(entry.overlaps.clone()),
    )
    .await?;
    if let Some(n) = entry.n_experiments {
        put_dataset(conn, &field(&group, "n_experiments"), &Dataset::Int(vec![n])).await?;
    }

    write_frame(conn, &group, &entry.frame).await
}

/// Read a complete target record, `None` if the completion marker is absent
pub async fn read_target_entry(
    conn: &mut SqliteConnection,
    source: &str,
    target: &str,
) -> Result<Option<TargetEntry>> {
    if !has_target(conn, source, target).await? {
        return Ok(None);
    }

    let group = target_group(source, target);
    let Some(frame) = read_frame(conn, &group).await? else {
        return Err(Error::InvalidInput(format!(
            "Record {} is marked complete but has no coordinates",
            group
        )));
    };

    let mapping_variance = read_scalar(conn, &field(&group, "mapping_variance")).await?;
    let error = read_scalar(conn, &field(&group, "error")).await?;

    let overlaps_path = field(&group, "overlaps");
    let overlaps = required(conn, &overlaps_path)
        .await?
        .into_floats(&overlaps_path)?;

    let count_path = field(&group, "n_experiments");
    let n_experiments = match fetch_dataset(conn, &count_path).await? {
        Some(ds) => ds.into_ints(&count_path)?.first().copied(),
        None => None,
    };

    Ok(Some(TargetEntry {
        frame,
        mapping_variance,
        error,
        overlaps,
        n_experiments,
    }))
}

async fn required(conn: &mut SqliteConnection, path: &str) -> Result<Dataset> {
    fetch_dataset(conn, path)
        .await?
        .ok_or_else(|| Error::InvalidInput(format!("Dataset {} missing from complete record", path)))
}

async fn read_scalar(conn: &mut SqliteConnection, path: &str) -> Result<f64> {
    required(conn, path)
        .await?
        .into_floats(path)?
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidInput(format!("Dataset {} is empty", path)))
}

/// Sources whose own frame has been written
pub async fn list_sources(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let paths = paths_with_suffix(conn, "/coordinates/x").await?;
    Ok(paths
        .iter()
        .filter_map(|p| match p.split('/').collect::<Vec<_>>().as_slice() {
            ["", source, "coordinates", "x"] => Some(source.to_string()),
            _ => None,
        })
        .collect())
}

/// Targets of `source` with a complete record
pub async fn list_targets(conn: &mut SqliteConnection, source: &str) -> Result<Vec<String>> {
    let paths = paths_with_suffix(conn, &format!("/{}", COMPLETION_MARKER)).await?;
    Ok(paths
        .iter()
        .filter_map(|p| match p.split('/').collect::<Vec<_>>().as_slice() {
            ["", s, "targets", target, "coordinates", "base_coord_system"] if *s == source => {
                Some(target.to_string())
            }
            _ => None,
        })
        .collect())
}
