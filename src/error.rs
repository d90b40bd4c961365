//! Central error handling for the tiling pipeline
//!
//! Every stage has its own error type; `TilerError` wraps them so the
//! orchestrator can report a single categorized failure.

use crate::atlas::PackingError;
use crate::config::ConfigError;
use crate::geo::GeoError;
use crate::geometry::GeometryError;
use crate::io::{LoadError, StorageError};
use crate::split::SplitError;
use crate::tiles3d::Tiles3dError;

/// Centralized error type for all pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    #[error("Packing error: {0}")]
    Packing(#[from] PackingError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] Tiles3dError),

    #[error("Geodetic error: {0}")]
    Geo(#[from] GeoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid task state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TilerError {
    /// Short category label used in task failure messages and logs
    pub fn category(&self) -> &'static str {
        match self {
            TilerError::Load(_) => "Load",
            TilerError::Geometry(_) => "Geometry",
            TilerError::Split(_) => "Split",
            TilerError::Packing(_) => "Packing",
            TilerError::Encoding(_) => "Encoding",
            TilerError::Geo(_) => "Geo",
            TilerError::Storage(_) => "Storage",
            TilerError::Config(_) => "Config",
            TilerError::InvalidState(_) => "State",
            TilerError::Cancelled => "Cancelled",
            TilerError::Io(_) => "IO",
        }
    }

    /// True when the error came from a cooperative stop request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TilerError::Cancelled | TilerError::Split(SplitError::Cancelled))
    }

    pub fn invalid_state<T: ToString>(msg: T) -> Self {
        TilerError::InvalidState(msg.to_string())
    }

    /// Format as `[Category] message` for task status reporting
    pub fn to_status_message(&self) -> String {
        format!("[{}] {}", self.category(), self)
    }
}

/// Result type alias for pipeline operations
pub type TilerResult<T> = Result<T, TilerError>;
