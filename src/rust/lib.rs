pub mod aggregate;
pub mod aminoacid;
pub mod config;
pub mod contact_graph;
pub mod counter;
pub mod errors;
pub mod folds;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod queues;
pub mod records;
pub mod scorer;
pub mod sparse;
pub mod structure;
pub mod types;

#[cfg(feature = "python")]
mod python;


pub use aggregate::{AggregationMode, ResidueAggregator, ResiduePrediction};
pub use contact_graph::{ContactGraph, ContactGraphBuilder};
pub use counter::{ExternalCounter, GraphletCounter};
pub use pipeline::{InferenceOrchestrator, ModelBundle, TrainingOrchestrator};
pub use scorer::{CalibratedSvm, Scorer};
pub use sparse::{FeatureSet, SparseFeatureAssembler};
