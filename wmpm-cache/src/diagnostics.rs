//! Diagnostic figure output

use crate::engine::Figure;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Receives the diagnostic figures of each successful fit
pub trait DiagnosticSink: Send {
    fn render(&mut self, source: &str, target: &str, figures: &[Figure]) -> std::io::Result<()>;
}

/// Saves figures as `<root>/<source>/<target>/<target>_<name><extension>`
pub struct PlotDirWriter {
    root: PathBuf,
    extension: String,
}

impl PlotDirWriter {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn figure_path(&self, source: &str, target: &str, name: &str) -> PathBuf {
        self.root
            .join(source)
            .join(target)
            .join(format!("{}_{}{}", target, name, self.extension))
    }
}

impl DiagnosticSink for PlotDirWriter {
    fn render(&mut self, source: &str, target: &str, figures: &[Figure]) -> std::io::Result<()> {
        if figures.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(self.root.join(source).join(target))?;
        for figure in figures {
            let path = self.figure_path(source, target, &figure.name);
            std::fs::write(&path, &figure.bytes)?;
            debug!("Saved diagnostic figure {}", path.display());
        }
        Ok(())
    }
}

/// Used when no plot folder is configured
pub struct DiscardDiagnostics;

impl DiagnosticSink for DiscardDiagnostics {
    fn render(&mut self, _source: &str, _target: &str, _figures: &[Figure]) -> std::io::Result<()> {
        Ok(())
    }
}
