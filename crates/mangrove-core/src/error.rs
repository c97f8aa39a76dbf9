//! Error taxonomy shared by every pipeline stage.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required parameter combination is missing or contradictory.
    /// Raised before any I/O happens.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input could not be parsed as valid geometry or table data.
    #[error("invalid data in {path}: {reason}")]
    DataFormat { path: PathBuf, reason: String },

    /// Dissolve failed even after the zero-width repair pass.
    #[error("geometry repair failed for '{value}': {reason}")]
    GeometryRepair { value: String, reason: String },

    /// One or more of the inputs a unit needs are absent.
    #[error("missing dependency for {unit}: {missing:?}")]
    MissingDependency { unit: String, missing: Vec<PathBuf> },

    /// Remote job submission was rejected.
    #[error("remote submission of '{job}' failed: {reason}")]
    Remote { job: String, reason: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn data_format(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::DataFormat {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for errors that only affect the unit being processed; the driver
    /// records them and moves on to the next unit.
    pub fn is_unit_local(&self) -> bool {
        matches!(
            self,
            Self::DataFormat { .. } | Self::GeometryRepair { .. } | Self::MissingDependency { .. }
        )
    }
}

/// Attach a path to a raw `std::io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| PipelineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_local_classification() {
        assert!(PipelineError::data_format("a.geojson", "bad").is_unit_local());
        assert!(PipelineError::MissingDependency { unit: "p".into(), missing: vec![] }.is_unit_local());
        assert!(!PipelineError::Configuration("x".into()).is_unit_local());
        assert!(!PipelineError::Remote { job: "j".into(), reason: "down".into() }.is_unit_local());
    }
}
