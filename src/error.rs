use thiserror::Error;

/// Errors produced by a representation pipeline while computing actors.
///
/// A pipeline failure is always isolated to the (item, position) it was
/// computing; it is recorded on that cache slot and never propagated to
/// sibling entries or into the scheduler's own control flow.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The item handle is no longer resolvable by the external model.
    #[error("Unknown item: {0}")]
    UnknownItem(u64),

    /// The requested position lies outside the item's extent.
    #[error("Position {position} out of bounds for item {item}")]
    PositionOutOfBounds { item: u64, position: i64 },

    /// The pipeline's own computation failed.
    #[error("Compute failed: {0}")]
    Compute(String),
}

/// Errors that terminate a task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Cooperative cancellation was observed. Not a fault; partial results
    /// are discarded and never merged into a cache.
    #[error("Task aborted")]
    Aborted,

    /// A pipeline invocation inside the task failed.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The task body panicked; the panic was caught at the worker boundary.
    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Errors raised while persisting or restoring switch settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A stored value could not be decoded.
    #[error("Invalid setting value for key {key}: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored key does not match any known setting.
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),
}
