//! AQI Forecast Pipeline Library
//!
//! Serves multi-step air-quality forecasts from trained sequence and
//! classification models, with normalized inputs, fingerprint-keyed
//! result caching and request coalescing.

pub mod cache;
pub mod config;
pub mod error;
pub mod experiments;
pub mod fingerprint;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod types;
pub mod weather;

pub use cache::InferenceCache;
pub use config::AppConfig;
pub use error::{PipelineError, PipelineResult};
pub use fingerprint::Fingerprint;
pub use normalizer::{FeatureNormalizer, FeatureVector};
pub use pipeline::Pipeline;
pub use types::{ForecastResult, Reading};
