pub mod classifier;
pub mod cli;
pub mod error;
pub mod labels;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod server;

pub use crate::classifier::{ClassifierConfig, ImageClassifier, Prediction, ScorerFactory};
pub use crate::cli::Args;
pub use crate::error::ClassifierError;
pub use crate::labels::LabelSet;
pub use crate::model::{Device, ModelKind, OnnxScorer, Scorer};
pub use crate::preprocess::{PreprocessConfig, Processor, decode_image};
pub use crate::server::{AppState, router};
