//! Model backends and the two trained models

pub mod backend;
pub mod classifier;
pub mod forecaster;
pub mod loader;

pub use backend::InferenceBackend;
pub use classifier::Classifier;
pub use forecaster::Forecaster;
pub use loader::{load_backends, LoadedBackends};
