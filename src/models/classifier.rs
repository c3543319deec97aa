//! Air-quality category classifier

use crate::config::ClassifierConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::backend::InferenceBackend;
use crate::types::CategoryPrediction;
use std::sync::Arc;
use tracing::debug;

/// Maps one feature row to a label from the configured closed set.
pub struct Classifier {
    backend: Option<Arc<dyn InferenceBackend>>,
    labels: Vec<String>,
}

impl Classifier {
    pub fn new(backend: Option<Arc<dyn InferenceBackend>>, config: &ClassifierConfig) -> Self {
        Self {
            backend,
            labels: config.labels.clone(),
        }
    }

    pub fn available(&self) -> bool {
        self.backend.is_some()
    }

    /// Classify one normalized feature row.
    ///
    /// The model must emit exactly one score per configured label, in
    /// label order. Argmax decides; ties keep the earliest label.
    pub fn classify(&self, features: &[f32]) -> PipelineResult<CategoryPrediction> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| PipelineError::model_unavailable("classifier", "no backend loaded"))?;

        let shape = [1, features.len() as i64];
        let scores = backend.infer(&shape, features)?;

        if scores.len() != self.labels.len() {
            return Err(PipelineError::model_unavailable(
                "classifier",
                format!(
                    "expected {} class scores, got {}",
                    self.labels.len(),
                    scores.len()
                ),
            ));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(PipelineError::model_unavailable(
                "classifier",
                "non-finite class scores",
            ));
        }

        let mut best = 0usize;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }

        debug!(
            label = %self.labels[best],
            confidence = scores[best],
            "classification complete"
        );
        Ok(CategoryPrediction {
            label: self.labels[best].clone(),
            confidence: Some(scores[best] as f64),
        })
    }
}
