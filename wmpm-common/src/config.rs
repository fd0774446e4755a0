//! Configuration loading
//!
//! A single TOML file configures logging, the parcellation catalog, the
//! projection-mapping build and the external fitter. Relative paths are
//! resolved against the folder holding the config file.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Complete configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    pub parcellation: ParcellationConfig,

    pub projection_mapping: ProjectionMappingConfig,

    /// Required for building, not for reading
    #[serde(default)]
    pub fitter: Option<FitterConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Region names, inline or from a file with one name per line
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParcellationConfig {
    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub regions_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionMappingConfig {
    /// Fitting-engine variant, see [`MapperClass`]
    pub class: String,

    /// Connectivity data manifest handed to the fitter
    #[serde(default)]
    pub cache_manifest: Option<PathBuf>,

    /// Flatmap label stored with every frame
    #[serde(default = "default_flatmap")]
    pub flatmap: String,

    /// Mapping cache file
    #[serde(alias = "h5_fn")]
    pub store_path: PathBuf,

    /// Diagnostic figure output; figures are discarded when unset
    #[serde(default)]
    pub plot_dir: Option<PathBuf>,

    #[serde(default = "default_plot_extension")]
    pub plot_extension: String,

    /// Hemisphere pivot on the flatmap x axis
    #[serde(default)]
    pub hemi_mirror_at: Option<f64>,

    #[serde(default = "empty_object")]
    pub pp_use: serde_json::Value,

    #[serde(default = "empty_object")]
    pub pp_display: serde_json::Value,

    #[serde(default = "empty_object")]
    pub target_args: serde_json::Value,

    #[serde(default = "empty_object")]
    pub prepare_args: serde_json::Value,

    #[serde(default = "empty_object")]
    pub fit_args: serde_json::Value,
}

/// External fitting process
#[derive(Debug, Clone, Deserialize)]
pub struct FitterConfig {
    pub command: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Supported fitting-engine variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperClass {
    /// Experiment/node based fit; records carry `n_experiments`
    VoxelNode,
    /// Voxel-array based fit
    VoxelArray,
}

impl MapperClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapperClass::VoxelNode => "VoxelNodeBaryMapper",
            MapperClass::VoxelArray => "VoxelArrayBaryMapper",
        }
    }

    pub fn is_node_based(&self) -> bool {
        matches!(self, MapperClass::VoxelNode)
    }
}

impl FromStr for MapperClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VoxelNodeBaryMapper" => Ok(MapperClass::VoxelNode),
            "VoxelArrayBaryMapper" => Ok(MapperClass::VoxelArray),
            other => Err(Error::Config(format!("Unknown mapper class: {}", other))),
        }
    }
}

impl fmt::Display for MapperClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_flatmap() -> String {
    crate::types::DEFAULT_FLATMAP.to_string()
}

fn default_plot_extension() -> String {
    ".png".to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Config {
    /// Load, resolve relative paths and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Self::from_toml_str(&content, &root)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse config text; relative paths resolve against `root`
    pub fn from_toml_str(content: &str, root: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;

        config.resolve_paths(root);
        config.projection_mapping.normalize_prepare_args();
        config.projection_mapping.mapper_class()?;

        Ok(config)
    }

    fn resolve_paths(&mut self, root: &Path) {
        let pm = &mut self.projection_mapping;
        pm.store_path = under_root(root, &pm.store_path);
        if let Some(manifest) = pm.cache_manifest.as_mut() {
            *manifest = under_root(root, manifest);
        }
        if let Some(plot_dir) = pm.plot_dir.as_mut() {
            *plot_dir = under_root(root, plot_dir);
        }
        if let Some(regions_file) = self.parcellation.regions_file.as_mut() {
            *regions_file = under_root(root, regions_file);
        }
        if let Some(fitter) = self.fitter.as_mut() {
            // Bare program names are looked up on PATH
            if fitter.command.components().count() > 1 {
                fitter.command = under_root(root, &fitter.command);
            }
        }
    }

    /// Fitter settings, required for building
    pub fn fitter(&self) -> Result<&FitterConfig> {
        self.fitter
            .as_ref()
            .ok_or_else(|| Error::Config("Missing required section [fitter]".to_string()))
    }
}

impl ProjectionMappingConfig {
    pub fn mapper_class(&self) -> Result<MapperClass> {
        self.class.parse()
    }

    /// Hemisphere pivot, required for reading
    pub fn mirror_at(&self) -> Result<f64> {
        self.hemi_mirror_at.ok_or_else(|| {
            Error::Config(
                "Missing required key projection_mapping.hemi_mirror_at".to_string(),
            )
        })
    }

    /// `cre = "None"` selects both cre-positive and cre-negative experiments
    fn normalize_prepare_args(&mut self) {
        if let Some(args) = self.prepare_args.as_object_mut() {
            if args.get("cre").and_then(|v| v.as_str()) == Some("None") {
                info!("Using both cre positive and negative experiments");
                args.insert("cre".to_string(), serde_json::Value::Null);
            }
        }
    }
}

fn under_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
