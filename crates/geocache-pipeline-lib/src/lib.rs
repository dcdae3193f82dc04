//! Geocache Pipeline Library - Ordered Transformer Stages over GPX Document Sets
//!
//! This library loads geocache GPX documents, runs a configurable, ordered set of
//! transformers (stages) over them and hands the result to a publisher. The core
//! is a deterministic, sequential scheduler over a shared mutable document set.
//!
//! # Architecture
//!
//! - **[`Document`]** / **[`Waypoint`]**: In-memory GPX model with typed extension slots
//! - **[`Transformer`]**: The unit of work, with three processing granularities
//! - **[`Scheduler`]**: Resolves enablement, orders and runs the stages
//! - **[`stages`]**: Built-in stages (load, dedup, merge, editor backups, disabled caches, publish)
//! - **[`storage`]** / **[`remote`]**: Collaborator contracts for persistence and the web API
//!
//! # Ordering Guarantees
//!
//! - Stages run by ascending [`ExecutionOrder`], ties in registration order
//! - Each stage completes before the next one starts
//! - The same enabled set over the same input always yields the same output

mod document;
pub mod progress;
pub mod remote;
mod scheduler;
pub mod stages;
pub mod storage;
mod transformer;
pub mod utils;

// Public API exports
pub use document::{Attribute, Document, ExtensionData, Geocache, Log, Waypoint};
pub use progress::{CancelToken, ProgressEvent, ProgressSink, Severity, StageContext};
pub use scheduler::{ExecutionPlan, RunOutcome, Scheduler, TransformerRegistry};
pub use transformer::{
    Candidate, CandidateSet, Capabilities, ExecutionOrder, Granularity, RunOptions, Transformer,
    TransformerId, WaypointEditor, for_each_document, for_each_waypoint, run_stage,
};

/// Error types of the pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("GPX error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] remote::RemoteError),

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Stage '{title}' failed: {source}")]
    Stage {
        title: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Execution terminated")]
    Terminated,

    #[error("A pipeline run is already in progress")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> TransformerRegistry = TransformerRegistry::new;
        let _: fn() -> RunOptions = RunOptions::default;
        let _: fn() -> CancelToken = CancelToken::new;
    }

    #[test]
    fn test_stage_error_mentions_title() {
        let err = PipelineError::Stage {
            title: "Merge files".to_string(),
            source: Box::new(PipelineError::Publish("disk full".to_string())),
        };
        assert_eq!(err.to_string(), "Stage 'Merge files' failed: Publish failed: disk full");
    }
}
