//! Error types for the matrix domain layer.

/// Errors produced while validating or expanding a matrix.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("invalid environment spec: fingerprint requires at least one input")]
    InvalidEnvironmentSpec,

    #[error("axis '{axis}' declares no values")]
    EmptyAxis { axis: String },

    #[error("axis '{axis}' declared more than once")]
    DuplicateAxis { axis: String },

    #[error("template '{template}' selects unknown axis '{axis}'")]
    UnknownAxis { template: String, axis: String },

    #[error("template '{template}' declares invalid shard count {shards} (must be >= 1)")]
    InvalidShardCount { template: String, shards: u32 },
}

/// Result type for matrix operations.
pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
