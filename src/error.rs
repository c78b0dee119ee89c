//! Error taxonomy for the synthesis engine.
//!
//! Load-time failures surface to the caller; per-frame failures are logged by
//! the pipeline and the frame is skipped. Ring overflow is a diagnostic
//! counter, never an error.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Model file unreadable or rejected by the tensor runtime.
    #[error("failed to load model from {path}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    /// A required named tensor is absent from the loaded model.
    #[error("model is missing required tensor '{0}'")]
    TensorShape(String),

    /// Every accelerator delegate failed to initialize. Non-fatal: execution
    /// falls through to plain CPU and this is reported as a warning.
    #[error("accelerator delegates unavailable: {0}")]
    Delegate(String),

    /// A per-frame interpreter invocation failed.
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),

    /// `prepare` was called with an unusable sample rate or block size.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
