pub mod ml_model;
pub mod preprocess;
pub mod training;
pub mod persistence;
pub mod inference;

pub use ml_model::{SpoofClassifier, ModelConfig, argmax_first};
pub use preprocess::{EdgePreprocessor, load_rgb_image};
pub use training::{FaceDataset, FaceBatcher, FaceBatch, EpochReport, TrainingOutcome, build_dataloader, train_model};
pub use persistence::{save_classifier, load_classifier};
pub use inference::InferenceEngine;
