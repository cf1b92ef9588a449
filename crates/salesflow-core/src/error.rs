// crates/salesflow-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Config file could not be parsed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Chart rendering failed: {0}")]
    Render(String),

    #[error("Artifact {artifact} is missing column '{column}'")]
    MissingColumn { artifact: String, column: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Dag(#[from] DagError),
}

/// Structural problems with a task graph, raised before anything runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("task '{0}' is declared more than once")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{upstream}'")]
    UnknownDependency { task: String, upstream: String },

    #[error("task graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("no task named '{0}'")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
