//! Multi-step AQI sequence forecaster

use crate::config::ForecastConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::backend::InferenceBackend;
use crate::normalizer::FeatureVector;
use std::sync::Arc;
use tracing::debug;

/// Wraps the trained sequence model and owns the output rescaling.
///
/// The model predicts in the normalized [0, 1] range it was trained
/// against; predictions are mapped back onto the AQI scale here.
pub struct Forecaster {
    backend: Option<Arc<dyn InferenceBackend>>,
    aqi_min: f64,
    aqi_max: f64,
    max_horizon: usize,
}

impl Forecaster {
    pub fn new(backend: Option<Arc<dyn InferenceBackend>>, config: &ForecastConfig) -> Self {
        Self {
            backend,
            aqi_min: config.aqi_min,
            aqi_max: config.aqi_max,
            max_horizon: config.max_horizon,
        }
    }

    pub fn available(&self) -> bool {
        self.backend.is_some()
    }

    /// Predict AQI for the next `horizon` steps from a normalized window.
    pub fn forecast(&self, input: &FeatureVector, horizon: usize) -> PipelineResult<Vec<f64>> {
        if horizon == 0 || horizon > self.max_horizon {
            return Err(PipelineError::validation(format!(
                "horizon {horizon} outside 1..={}",
                self.max_horizon
            )));
        }
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| PipelineError::model_unavailable("forecaster", "no backend loaded"))?;

        let (lookback, channels) = input.shape();
        let shape = [1, lookback as i64, channels as i64];
        let output = backend.infer(&shape, input.as_slice())?;

        if output.is_empty() {
            return Err(PipelineError::model_unavailable(
                "forecaster",
                "model returned no output",
            ));
        }
        if output.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::model_unavailable(
                "forecaster",
                "non-finite model output",
            ));
        }

        // A true multi-step head covers the horizon directly; a
        // single-step head repeats its one prediction across it.
        let steps: Vec<f64> = if output.len() >= horizon {
            output[..horizon].iter().map(|v| self.rescale(*v)).collect()
        } else {
            vec![self.rescale(output[0]); horizon]
        };

        debug!(
            horizon = horizon,
            final_aqi = steps[steps.len() - 1],
            "forecast complete"
        );
        Ok(steps)
    }

    /// Map a normalized prediction back onto the AQI scale.
    fn rescale(&self, scaled: f32) -> f64 {
        let aqi = self.aqi_min + scaled as f64 * (self.aqi_max - self.aqi_min);
        aqi.clamp(self.aqi_min, self.aqi_max)
    }
}
