use std::path::PathBuf;
use thiserror::Error;

/// Failures that terminate a density chain (or abort a workflow build).
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Required simulation output is absent or holds no usable samples.
    #[error("Missing simulation output {path:?}: {reason}")]
    MissingOutput { path: PathBuf, reason: String },

    /// Geometry file unparsable, or the cell has a non-positive volume.
    #[error("Invalid geometry in {path:?}: {reason}")]
    InvalidGeometry { path: PathBuf, reason: String },

    /// Invalid or contradictory setup, raised before any unit of work exists.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external engine failed to complete a run.
    #[error("Simulation failed: {0:#}")]
    Simulation(#[from] anyhow::Error),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    pub fn missing_output(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MissingOutput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_geometry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
