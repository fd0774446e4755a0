//! Named dataset rows and their binary encoding
//!
//! Strings are stored as UTF-8 bytes, numeric arrays as consecutive
//! little-endian 8-byte words. Both round-trip exactly (NaN included).

use crate::{Error, Result};
use sqlx::sqlite::SqliteConnection;

const WORD: usize = 8;

/// A single stored value
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Str(String),
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl Dataset {
    /// Type tag persisted in the `dtype` column
    pub fn dtype(&self) -> &'static str {
        match self {
            Dataset::Str(_) => "str",
            Dataset::Float(_) => "f64",
            Dataset::Int(_) => "i64",
        }
    }

    /// Element count persisted in the `len` column (1 for strings)
    pub fn len(&self) -> usize {
        match self {
            Dataset::Str(_) => 1,
            Dataset::Float(v) => v.len(),
            Dataset::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Dataset::Str(s) => s.as_bytes().to_vec(),
            Dataset::Float(v) => v.iter().flat_map(|f| f.to_le_bytes()).collect(),
            Dataset::Int(v) => v.iter().flat_map(|i| i.to_le_bytes()).collect(),
        }
    }

    pub fn decode(dtype: &str, len: i64, value: &[u8]) -> Result<Self> {
        let dataset = match dtype {
            "str" => Dataset::Str(
                String::from_utf8(value.to_vec())
                    .map_err(|e| Error::InvalidInput(format!("Non UTF-8 string dataset: {}", e)))?,
            ),
            "f64" => Dataset::Float(
                words(value)?
                    .map(f64::from_le_bytes)
                    .collect(),
            ),
            "i64" => Dataset::Int(
                words(value)?
                    .map(i64::from_le_bytes)
                    .collect(),
            ),
            other => {
                return Err(Error::InvalidInput(format!("Unknown dataset type '{}'", other)));
            }
        };

        if dataset.len() as i64 != len {
            return Err(Error::InvalidInput(format!(
                "Dataset length mismatch: header says {}, payload holds {}",
                len,
                dataset.len()
            )));
        }

        Ok(dataset)
    }

    pub fn into_string(self, path: &str) -> Result<String> {
        match self {
            Dataset::Str(s) => Ok(s),
            other => Err(type_mismatch(path, "str", other.dtype())),
        }
    }

    pub fn into_floats(self, path: &str) -> Result<Vec<f64>> {
        match self {
            Dataset::Float(v) => Ok(v),
            other => Err(type_mismatch(path, "f64", other.dtype())),
        }
    }

    pub fn into_ints(self, path: &str) -> Result<Vec<i64>> {
        match self {
            Dataset::Int(v) => Ok(v),
            other => Err(type_mismatch(path, "i64", other.dtype())),
        }
    }
}

fn words(value: &[u8]) -> Result<impl Iterator<Item = [u8; WORD]> + '_> {
    if value.len() % WORD != 0 {
        return Err(Error::InvalidInput(format!(
            "Numeric dataset payload of {} bytes is not a multiple of {}",
            value.len(),
            WORD
        )));
    }
    Ok(value.chunks_exact(WORD).map(|chunk| {
        let mut word = [0u8; WORD];
        word.copy_from_slice(chunk);
        word
    }))
}

fn type_mismatch(path: &str, expected: &str, found: &str) -> Error {
    Error::InvalidInput(format!(
        "Dataset {} has type {}, expected {}",
        path, found, expected
    ))
}

/// Write (or replace) one dataset
pub async fn put_dataset(conn: &mut SqliteConnection, path: &str, dataset: &Dataset) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO datasets (path, dtype, len, value, written_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(path)
    .bind(dataset.dtype())
    .bind(dataset.len() as i64)
    .bind(dataset.encode())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Load one dataset, `None` if absent
pub async fn fetch_dataset(conn: &mut SqliteConnection, path: &str) -> Result<Option<Dataset>> {
    let row: Option<(String, i64, Vec<u8>)> =
        sqlx::query_as("SELECT dtype, len, value FROM datasets WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        Some((dtype, len, value)) => Ok(Some(Dataset::decode(&dtype, len, &value)?)),
        None => Ok(None),
    }
}

pub async fn dataset_exists(conn: &mut SqliteConnection, path: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datasets WHERE path = ?")
        .bind(path)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count > 0)
}

/// All dataset paths ending with `suffix`, sorted
pub async fn paths_with_suffix(conn: &mut SqliteConnection, suffix: &str) -> Result<Vec<String>> {
    let paths: Vec<String> = sqlx::query_scalar(
        "SELECT path FROM datasets WHERE substr(path, -?) = ? ORDER BY path",
    )
    .bind(suffix.chars().count() as i64)
    .bind(suffix)
    .fetch_all(&mut *conn)
    .await?;

    Ok(paths)
}
