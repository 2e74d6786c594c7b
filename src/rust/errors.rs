use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Label, ResidueKey};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("NPY write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Structure parsing error in {path:?}: {message}")]
    StructureParse { path: PathBuf, message: String },

    #[error("Structure {structure} has no backbone atoms in chain {chain}")]
    EmptyStructure { structure: String, chain: char },

    #[error("Structure {structure}: residue {residue} atom {atom} has no coordinates")]
    MissingCoordinates { structure: String, residue: usize, atom: String },

    #[error("Malformed record in {file:?} line {line}: {message}")]
    MalformedRecord { file: PathBuf, line: usize, message: String },

    #[error("Queue mismatch for structure {structure}: {message}")]
    QueueMismatch { structure: String, message: String },

    #[error("Structure {structure} row {row}: label {found} popped from the {expected} queue")]
    QueueLabelMismatch { structure: String, row: usize, expected: Label, found: Label },

    #[error("Residue {residue} row {row}: label {found} differs from group label {expected}")]
    LabelMismatch { residue: ResidueKey, row: usize, expected: Label, found: Label },

    #[error("Residue {residue} reappears at row {row} after its group was closed")]
    NonContiguousResidue { residue: ResidueKey, row: usize },

    #[error("Residue {residue} aggregated with label {label} during inference")]
    UnexpectedLabel { residue: ResidueKey, label: Label },

    #[error("Structure {structure} is listed in the split table but has no feature rows")]
    StructureNotInFeatures { structure: String },

    #[error("Invalid split table line {line}: {message}")]
    InvalidSplitTable { line: usize, message: String },

    #[error("Graphlet counter failed for {structure}: {message}")]
    Counter { structure: String, message: String },

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Fold {fold} failed: {source}")]
    Fold {
        fold: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Configuration error: {field} - {message}")]
    ConfigurationError { field: String, message: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Extension trait for Result to add context
pub trait PipelineResultExt<T> {
    /// Add context to an error
    fn with_context<F>(self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String;

    /// Add context with a field name
    fn with_field_context(self, field: &str, message: &str) -> PipelineResult<T>;
}

impl<T, E> PipelineResultExt<T> for Result<T, E>
where
    E: Into<PipelineError>,
{
    fn with_context<F>(self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context = f();
            match e.into() {
                PipelineError::Io(err) => {
                    PipelineError::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err)))
                }
                PipelineError::ValidationError { message } => {
                    PipelineError::ValidationError { message: format!("{}: {}", context, message) }
                }
                other => {
                    PipelineError::ValidationError { message: format!("{}: {}", context, other) }
                }
            }
        })
    }

    fn with_field_context(self, field: &str, message: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::ConfigurationError {
            field: field.to_string(),
            message: format!("{}: {}", message, e.into()),
        })
    }
}
