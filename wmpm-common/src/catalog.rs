//! Parcellation catalog: the ordered list of region identifiers

use crate::config::ParcellationConfig;
use crate::types::validate_region;
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Ordered region identifiers; drives both the source and the target loops
pub trait RegionCatalog {
    fn region_names(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parcellation {
    names: Vec<String>,
}

impl Parcellation {
    /// Build from names in catalog order; duplicates and invalid names are rejected
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for name in &names {
            validate_region(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("Duplicate region in catalog: {}", name)));
            }
        }
        Ok(Self { names })
    }

    /// Inline regions first, then those of `regions_file`
    pub fn from_config(cfg: &ParcellationConfig) -> Result<Self> {
        let mut names = cfg.regions.clone();
        if let Some(path) = &cfg.regions_file {
            names.extend(read_regions_file(path)?);
        }
        if names.is_empty() {
            return Err(Error::Config(
                "Parcellation lists no regions (set parcellation.regions or parcellation.regions_file)"
                    .to_string(),
            ));
        }
        Self::new(names)
    }

    pub fn contains(&self, region: &str) -> bool {
        self.names.iter().any(|n| n == region)
    }
}

impl RegionCatalog for Parcellation {
    fn region_names(&self) -> &[String] {
        &self.names
    }
}

/// One region per line; blank lines and `#` comments are ignored
fn read_regions_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read regions file {}: {}", path.display(), e))
    })?;
    Ok(parse_region_lines(&content))
}

fn parse_region_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_keeps_order() {
        let p = Parcellation::new(["MOp", "MOs", "SSp-bfd"]).unwrap();
        assert_eq!(p.region_names(), ["MOp", "MOs", "SSp-bfd"]);
        assert!(p.contains("MOs"));
        assert!(!p.contains("VISp"));
    }

    #[test]
    fn test_duplicate_region_rejected() {
        assert!(matches!(
            Parcellation::new(["MOp", "MOp"]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_region_lines() {
        let content = "# motor\nMOp\n  MOs  # secondary\n\nSSp-bfd\n";
        assert_eq!(parse_region_lines(content), ["MOp", "MOs", "SSp-bfd"]);
    }

    #[test]
    fn test_empty_parcellation_is_config_error() {
        let cfg = ParcellationConfig::default();
        assert!(matches!(Parcellation::from_config(&cfg), Err(Error::Config(_))));
    }
}
