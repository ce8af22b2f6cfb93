use thiserror::Error;

/// Sub-kind for a failed model load (§7.1).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    FileNotFound(String),

    #[error("invalid model format: {0}")]
    InvalidFormat(String),

    #[error("model contains zero layers")]
    EmptyModel,
}

/// Sub-kind for a failure raised while running inference (§7.2).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("no model loaded")]
    NoModelLoaded,

    #[error("internal inference error: {0}")]
    InternalError(String),
}

/// Sub-kind for a request that failed validation before inference ran (§7.3).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("input contains NaN")]
    NanInput,
}

/// Kernel / parser level argument problem (§7.4). Raised by low-level code; the
/// handle façade translates these into `Validation` or `Inference` at the API boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidArgumentError {
    #[error("{0}")]
    Message(String),
}

/// Top-level error taxonomy seen by callers (§7). Each variant wraps a sub-kind so
/// callers can match on the kind first and the specific cause second.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TitanError {
    #[error("model load error: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgumentError),
}

impl TitanError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TitanError::InvalidArgument(InvalidArgumentError::Message(msg.into()))
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        TitanError::Validation(ValidationError::ShapeMismatch(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, TitanError>;
