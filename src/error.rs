//! Unified error handling for dlrmforge
//!
//! This module provides a single error type for the planner, the layer graph,
//! configuration loading and the engine seam. Errors are categorized into:
//! - User errors (bad arguments or configuration, actionable by users)
//! - Graph errors (the layer graph does not describe a valid network)
//! - Engine errors (the training engine refused or was misused)
//! - I/O errors (config files, log files)
//! - Internal errors (bugs)

use std::fmt;

/// Unified error type for dlrmforge
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    // ========== Argument / Configuration Errors ==========
    /// Invalid argument passed to a planner or builder
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid solver, reader, optimizer or fit configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Graph Errors ==========
    /// A layer consumes a tensor nobody produces
    #[error("Layer '{layer}' consumes unknown tensor '{tensor}'")]
    DanglingTensor { layer: String, tensor: String },

    /// Two layers produce the same tensor
    #[error("Tensor '{0}' is produced by more than one layer")]
    DuplicateTensor(String),

    /// The layer graph contains a cycle
    #[error("Layer graph contains a cycle through: {0}")]
    GraphCycle(String),

    /// A layer is malformed for its kind
    #[error("Invalid layer '{layer}': {reason}")]
    InvalidLayer { layer: String, reason: String },

    /// Tensor dimensions do not line up
    #[error("Shape mismatch at '{layer}': {reason}")]
    ShapeMismatch { layer: String, reason: String },

    // ========== Plan / Engine Errors ==========
    /// Sharding plan does not agree with the rest of the model
    #[error("Sharding plan mismatch: {0}")]
    PlanMismatch(String),

    /// Engine used before `compile`
    #[error("Model has not been compiled")]
    EngineNotCompiled,

    /// Engine rejected the model
    #[error("Engine error: {0}")]
    Engine(String),

    // ========== I/O Errors ==========
    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForgeError::InvalidArgument(_) | ForgeError::InvalidConfiguration(_) => {
                ErrorCategory::User
            }

            ForgeError::DanglingTensor { .. }
            | ForgeError::DuplicateTensor(_)
            | ForgeError::GraphCycle(_)
            | ForgeError::InvalidLayer { .. }
            | ForgeError::ShapeMismatch { .. } => ErrorCategory::Graph,

            ForgeError::PlanMismatch(_)
            | ForgeError::EngineNotCompiled
            | ForgeError::Engine(_) => ErrorCategory::Engine,

            ForgeError::Serialization(_) | ForgeError::Io(_) => ErrorCategory::Io,

            ForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User | ErrorCategory::Graph)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - User: fix the arguments or the config file
/// - Graph: fix the layer wiring
/// - Engine: the engine refused the model
/// - Io: file or format problems
/// - Internal: report as bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Graph,
    Engine,
    Io,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Graph => write!(f, "Graph"),
            ErrorCategory::Engine => write!(f, "Engine"),
            ErrorCategory::Io => write!(f, "Io"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Result alias used across the crate
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Create an invalid-argument error with context
///
/// # Examples
/// ```ignore
/// return Err(invalid_arg!("num_gpus must be >= 1, got {}", num_gpus));
/// ```
#[macro_export]
macro_rules! invalid_arg {
    ($msg:expr) => {
        $crate::error::ForgeError::InvalidArgument($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::InvalidArgument(format!($fmt, $($arg)*))
    };
}

/// Create an invalid-configuration error with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::ForgeError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Wrap an IO error with context
///
/// # Examples
/// ```ignore
/// let file = File::open(path).map_err(|e| io_context(e, "opening config"))?;
/// ```
pub fn io_context(err: std::io::Error, msg: &str) -> ForgeError {
    ForgeError::Io(std::io::Error::new(err.kind(), format!("{}: {}", msg, err)))
}
