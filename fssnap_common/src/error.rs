use crate::report::ComparisonReport;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("There is already a directory with alias '{alias}' for snapshot '{snapshot}'")]
    DuplicateAlias { alias: String, snapshot: String },

    #[error("There is no directory snapshot with alias '{alias}' for snapshot '{snapshot}'")]
    NoSuchDirectoryAlias { alias: String, snapshot: String },

    #[error("You are trying to compare snapshots with same name: {0}")]
    SameSnapshotName(String),

    #[error("Snapshot '{0}' is still not created. Capture it or load it from a file first")]
    NotCaptured(String),

    #[error("Directory '{}' does not exist", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Differences(Box<ComparisonReport>),
}

impl SnapshotError {
    /// The discrepancy report, when this error signals a failed comparison
    pub fn report(&self) -> Option<&ComparisonReport> {
        match self {
            SnapshotError::Differences(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_differences(&self) -> bool {
        matches!(self, SnapshotError::Differences(_))
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
