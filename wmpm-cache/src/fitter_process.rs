//! External fitter process
//!
//! The fitter runs as one long-lived child process per build run so that the
//! state set up by `prepare` carries over to the following `fit` calls. Each
//! request is one JSON line on the child's stdin; each reply is one JSON line
//! on its stdout and echoes the request's `id`, `op` and region names:
//!
//! ```text
//! > {"op":"prepare","id":1,"source":"MOp","args":{...}}
//! < {"ok":true,"id":1,"op":"prepare","source":"MOp","x":[..],"y":[..],
//!    "experiment_columns":[[1.0,null],..]}
//! > {"op":"fit","id":2,"source":"MOp","target":"SSp-bfd","args":{"draw":true,..}}
//! < {"ok":true,"id":2,"op":"fit","source":"MOp","target":"SSp-bfd","x":[..],
//!    "y":[..],"mapping_variance":0.4,"error":0.1,"overlaps":[..],
//!    "figures":[{"name":"data","bytes_b64":".."}]}
//! < {"ok":false,"id":3,"op":"fit","source":"MOp","target":"VISp",
//!    "error":"degenerate triangulation"}
//! ```
//!
//! Stdout lines that do not answer the pending request (library chatter,
//! replies to an earlier request) are logged and skipped. `null` stands for
//! a missing (NaN) value.

use crate::engine::{ControlPoints, FitArgs, FitResult, Figure, FittingEngine, PreparedSource};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use wmpm_common::config::{FitterConfig, ProjectionMappingConfig};
use wmpm_common::{Error, Result};

/// Failure talking to the fitter process
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("fitter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("fitter closed its output")]
    Closed,

    #[error("malformed fitter reply: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid figure encoding: {0}")]
    Figure(#[from] base64::DecodeError),

    #[error("{0}")]
    Rejected(String),
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Fit(e.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub(crate) enum Request<'a> {
    Prepare {
        id: u64,
        source: &'a str,
        args: &'a serde_json::Value,
    },
    Fit {
        id: u64,
        source: &'a str,
        target: &'a str,
        args: &'a FitArgs,
    },
}

impl Request<'_> {
    fn id(&self) -> u64 {
        match self {
            Request::Prepare { id, .. } | Request::Fit { id, .. } => *id,
        }
    }

    /// Whether `reply` echoes this request's id, op and region names
    pub(crate) fn is_answered_by(&self, reply: &serde_json::Value) -> bool {
        let echoes = |key: &str, expected: &str| {
            reply.get(key).and_then(|v| v.as_str()) == Some(expected)
        };
        if reply.get("id").and_then(|v| v.as_u64()) != Some(self.id()) {
            return false;
        }
        match self {
            Request::Prepare { source, .. } => echoes("op", "prepare") && echoes("source", *source),
            Request::Fit { source, target, .. } => {
                echoes("op", "fit") && echoes("source", *source) && echoes("target", *target)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrepareReply {
    x: [f64; 3],
    y: [f64; 3],
    #[serde(default)]
    experiment_columns: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct FitReply {
    x: [f64; 3],
    y: [f64; 3],
    mapping_variance: f64,
    error: f64,
    overlaps: Vec<Option<f64>>,
    #[serde(default)]
    figures: Vec<WireFigure>,
}

#[derive(Debug, Deserialize)]
struct WireFigure {
    name: String,
    bytes_b64: String,
}

fn excerpt(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    }
}

fn or_nan(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

/// Split the `ok` envelope off a reply
fn check_envelope(value: serde_json::Value) -> std::result::Result<serde_json::Value, ProtocolError> {
    match value.get("ok").and_then(|v| v.as_bool()) {
        Some(true) => Ok(value),
        Some(false) => Err(ProtocolError::Rejected(
            value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("fitter reported failure without reason")
                .to_string(),
        )),
        None => Err(ProtocolError::Rejected(
            "fitter reply lacks boolean 'ok' field".to_string(),
        )),
    }
}

pub(crate) fn decode_prepare(value: serde_json::Value) -> std::result::Result<PreparedSource, ProtocolError> {
    let reply: PrepareReply = serde_json::from_value(value)?;
    Ok(PreparedSource {
        coords: ControlPoints {
            x: reply.x,
            y: reply.y,
        },
        experiment_columns: reply.experiment_columns.map(|rows| {
            rows.into_iter()
                .map(|row| row.into_iter().map(or_nan).collect())
                .collect()
        }),
    })
}

pub(crate) fn decode_fit(value: serde_json::Value) -> std::result::Result<FitResult, ProtocolError> {
    let reply: FitReply = serde_json::from_value(value)?;
    let diagnostics = reply
        .figures
        .into_iter()
        .map(|f| {
            Ok(Figure {
                name: f.name,
                bytes: base64::engine::general_purpose::STANDARD.decode(f.bytes_b64)?,
            })
        })
        .collect::<std::result::Result<Vec<_>, ProtocolError>>()?;

    Ok(FitResult {
        coords: ControlPoints {
            x: reply.x,
            y: reply.y,
        },
        variance: reply.mapping_variance,
        overlaps: reply.overlaps.into_iter().map(or_nan).collect(),
        error: reply.error,
        diagnostics,
    })
}

pub struct ExternalFitter {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    /// Source of the last successful `prepare`
    prepared: Option<String>,
}

impl ExternalFitter {
    /// Start the fitter with the engine variant and data manifest on its command line
    pub async fn spawn(fitter: &FitterConfig, pm: &ProjectionMappingConfig) -> Result<Self> {
        let class = pm.mapper_class()?;

        let mut command = Command::new(&fitter.command);
        command
            .args(&fitter.args)
            .arg("--class")
            .arg(class.as_str())
            .arg("--flatmap")
            .arg(&pm.flatmap);
        if let Some(manifest) = &pm.cache_manifest {
            command.arg("--cache-manifest").arg(manifest);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Config(format!(
                    "Cannot start fitter {}: {}",
                    fitter.command.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Config("Fitter stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Config("Fitter stdout not captured".to_string()))?;

        info!(
            "Started fitter {} ({}, pid {:?})",
            fitter.command.display(),
            class,
            child.id()
        );

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            prepared: None,
        })
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn call(&mut self, request: &Request<'_>) -> std::result::Result<serde_json::Value, ProtocolError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let reply = self.stdout.next_line().await?.ok_or(ProtocolError::Closed)?;
            match serde_json::from_str::<serde_json::Value>(&reply) {
                Ok(value) if request.is_answered_by(&value) => {
                    debug!("Fitter answered request {} with {} bytes", request.id(), reply.len());
                    return check_envelope(value);
                }
                Ok(_) => warn!(
                    "Skipping fitter reply that does not answer request {}: {}",
                    request.id(),
                    excerpt(&reply)
                ),
                Err(_) => warn!("Skipping fitter output: {}", excerpt(&reply)),
            }
        }
    }

    /// Close the fitter's stdin and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        drop(self.stdin);
        let status = self.child.wait().await?;
        if !status.success() {
            warn!("Fitter exited with {}", status);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FittingEngine for ExternalFitter {
    async fn prepare_for_source(
        &mut self,
        source: &str,
        args: &serde_json::Value,
    ) -> Result<PreparedSource> {
        self.prepared = None;
        let id = self.take_id();
        let reply = self.call(&Request::Prepare { id, source, args }).await?;
        let prepared = decode_prepare(reply)?;
        self.prepared = Some(source.to_string());
        Ok(prepared)
    }

    async fn fit_target(&mut self, target: &str, args: &FitArgs) -> Result<FitResult> {
        let source = self
            .prepared
            .clone()
            .ok_or_else(|| Error::Fit(format!("fit of {} requested before any prepare", target)))?;
        let id = self.take_id();
        let reply = self
            .call(&Request::Fit {
                id,
                source: &source,
                target,
                args,
            })
            .await?;
        Ok(decode_fit(reply)?)
    }
}
