use thiserror::Error;

/// Failure taxonomy for the classification core.
///
/// The HTTP boundary maps these onto transport status codes; the core itself
/// knows nothing about transport semantics.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Image bytes could not be decoded, or the decoded image has zero
    /// width or height. Client-side input error, never retried.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// `top_k` outside `[1, label_set_size]`. Client-side input error.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Scorer construction failed (missing weights, unsupported device).
    /// The cell stays empty, so the next request re-attempts the load.
    #[error("model initialization failed: {0}")]
    Initialization(anyhow::Error),

    /// The forward pass failed after a successful load. The loaded scorer
    /// stays valid for subsequent requests.
    #[error("prediction failed: {0}")]
    Prediction(anyhow::Error),
}
