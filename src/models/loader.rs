//! Model artifact loading

use crate::config::ModelsConfig;
use crate::models::backend::InferenceBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Handles to whichever model backends could be brought up.
pub struct LoadedBackends {
    pub forecaster: Option<Arc<dyn InferenceBackend>>,
    pub classifier: Option<Arc<dyn InferenceBackend>>,
}

/// Load both model artifacts. A missing or unreadable file downgrades
/// that model to `None`; it never brings the pipeline down.
pub fn load_backends(config: &ModelsConfig) -> LoadedBackends {
    LoadedBackends {
        forecaster: load_one(config, &config.forecaster_file, "forecaster"),
        classifier: load_one(config, &config.classifier_file, "classifier"),
    }
}

fn load_one(config: &ModelsConfig, file: &str, name: &str) -> Option<Arc<dyn InferenceBackend>> {
    let path = PathBuf::from(&config.models_dir).join(file);

    #[cfg(feature = "onnx")]
    {
        match crate::models::backend::onnx::OnnxBackend::load(&path, name, config.onnx_threads) {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn InferenceBackend>),
            Err(e) => {
                warn!(
                    model = %name,
                    path = %path.display(),
                    error = %e,
                    "model unavailable, continuing degraded"
                );
                None
            }
        }
    }

    #[cfg(not(feature = "onnx"))]
    {
        warn!(
            model = %name,
            path = %path.display(),
            "built without the onnx feature, model not loaded"
        );
        None
    }
}
