//! Model execution backends

use crate::error::PipelineResult;

/// A loaded model that maps one flat f32 input to flat f32 outputs.
///
/// The trait hides the execution engine behind a narrow seam so the
/// forecaster, classifier and their tests can run against stub backends.
pub trait InferenceBackend: Send + Sync {
    /// Run the model on `input` laid out according to `shape` and return
    /// the model's output values in order.
    fn infer(&self, shape: &[i64], input: &[f32]) -> PipelineResult<Vec<f32>>;
}

#[cfg(feature = "onnx")]
pub mod onnx {
    //! ONNX Runtime backed implementation, behind the `onnx` feature.

    use super::InferenceBackend;
    use crate::error::{PipelineError, PipelineResult};
    use ort::memory::Allocator;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
    use parking_lot::Mutex;
    use std::path::Path;
    use tracing::{debug, info};

    /// One ONNX session plus the metadata needed to drive it.
    pub struct OnnxBackend {
        name: String,
        session: Mutex<Session>,
        input_name: String,
    }

    impl OnnxBackend {
        /// Load a model file into a ready session.
        pub fn load<P: AsRef<Path>>(path: P, name: &str, threads: usize) -> PipelineResult<Self> {
            let path = path.as_ref();
            ort::init()
                .commit()
                .map_err(|e| PipelineError::model_unavailable(name, e.to_string()))?;

            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(threads))
                .and_then(|b| b.commit_from_file(path))
                .map_err(|e| PipelineError::model_unavailable(name, e.to_string()))?;

            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .unwrap_or_else(|| "float_input".to_string());

            info!(
                model = %name,
                path = %path.display(),
                input = %input_name,
                threads = threads,
                "ONNX model loaded"
            );

            Ok(Self {
                name: name.to_string(),
                session: Mutex::new(session),
                input_name,
            })
        }

        /// Pull f32 values out of a seq(map(int64, float)) output, ordered
        /// by class id. Tree ensemble exports use this shape for their
        /// probability output.
        fn extract_from_sequence_map(
            &self,
            output: &ort::value::DynValue,
        ) -> PipelineResult<Vec<f32>> {
            let allocator = Allocator::default();

            let sequence = output.downcast_ref::<DynSequenceValueType>().map_err(|e| {
                PipelineError::model_unavailable(&self.name, format!("not a sequence: {e}"))
            })?;
            let maps = sequence
                .try_extract_sequence::<DynMapValueType>(&allocator)
                .map_err(|e| PipelineError::model_unavailable(&self.name, e.to_string()))?;
            let first = maps.first().ok_or_else(|| {
                PipelineError::model_unavailable(&self.name, "empty sequence output")
            })?;

            let mut pairs = first
                .try_extract_key_values::<i64, f32>()
                .map_err(|e| PipelineError::model_unavailable(&self.name, e.to_string()))?;
            pairs.sort_by_key(|(class_id, _)| *class_id);

            debug!(model = %self.name, classes = pairs.len(), "extracted seq(map) output");
            Ok(pairs.into_iter().map(|(_, score)| score).collect())
        }
    }

    impl InferenceBackend for OnnxBackend {
        fn infer(&self, shape: &[i64], input: &[f32]) -> PipelineResult<Vec<f32>> {
            let tensor = Tensor::from_array((shape.to_vec(), input.to_vec())).map_err(|e| {
                PipelineError::model_unavailable(&self.name, format!("bad input tensor: {e}"))
            })?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![&self.input_name => tensor])
                .map_err(|e| PipelineError::model_unavailable(&self.name, e.to_string()))?;

            // Class labels come out as an int64 tensor we do not want;
            // everything useful is either a plain f32 tensor or a
            // seq(map) of per-class scores.
            for (output_name, output) in outputs.iter() {
                if output_name.contains("label") {
                    continue;
                }
                if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
                    return Ok(data.to_vec());
                }
                if DynSequenceValueType::can_downcast(&output.dtype()) {
                    if let Ok(scores) = self.extract_from_sequence_map(&output) {
                        return Ok(scores);
                    }
                }
            }

            Err(PipelineError::model_unavailable(
                &self.name,
                "no extractable f32 output",
            ))
        }
    }
}
