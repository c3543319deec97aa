//! Pipeline orchestration
//!
//! Wires the normalizer, fingerprint cache and the two models into the
//! public prediction surface. A missing model degrades the result; it
//! never takes the pipeline down.

use crate::cache::{CacheSnapshot, InferenceCache};
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fingerprint::Fingerprint;
use crate::metrics::PipelineMetrics;
use crate::models::{load_backends, Classifier, Forecaster, InferenceBackend};
use crate::normalizer::{FeatureNormalizer, FeatureVector};
use crate::types::{AqiBands, CategoryPrediction, ForecastResult, Reading};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Pipeline {
    normalizer: FeatureNormalizer,
    forecaster: Forecaster,
    classifier: Classifier,
    cache: InferenceCache,
    bands: AqiBands,
    fallback_to_bands: bool,
    max_horizon: usize,
    version_tag: String,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Build a pipeline from configuration, loading whatever model
    /// artifacts are present on disk.
    pub fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        let backends = load_backends(&config.models);
        Self::with_backends(config, backends.forecaster, backends.classifier)
    }

    /// Build a pipeline with explicit backends. Embedders and tests use
    /// this to supply their own model implementations.
    pub fn with_backends(
        config: &AppConfig,
        forecaster_backend: Option<Arc<dyn InferenceBackend>>,
        classifier_backend: Option<Arc<dyn InferenceBackend>>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let normalizer = FeatureNormalizer::new(config.forecast.lookback, &config.normalization)?;
        let forecaster = Forecaster::new(forecaster_backend, &config.forecast);
        let classifier = Classifier::new(classifier_backend, &config.classifier);
        let cache = InferenceCache::from_config(&config.cache);

        info!(
            forecaster_available = forecaster.available(),
            classifier_available = classifier.available(),
            version = %config.version_tag(),
            lookback = config.forecast.lookback,
            "pipeline initialized"
        );

        Ok(Self {
            normalizer,
            forecaster,
            classifier,
            cache,
            bands: config.classifier.bands.clone(),
            fallback_to_bands: config.classifier.fallback_to_bands,
            max_horizon: config.forecast.max_horizon,
            version_tag: config.version_tag(),
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Serve a forecast for a reading window, consulting the cache first.
    ///
    /// Identical windows (after normalization) requesting the same horizon
    /// share one model run; repeated requests are answered from cache
    /// until the TTL lapses.
    pub fn predict(&self, window: &[Reading], horizon: usize) -> PipelineResult<ForecastResult> {
        let started = Instant::now();

        if horizon == 0 || horizon > self.max_horizon {
            return Err(PipelineError::validation(format!(
                "horizon {horizon} outside 1..={}",
                self.max_horizon
            )));
        }

        let input = self.normalizer.normalize(window)?;
        let fingerprint = Fingerprint::of(&input, &self.version_tag, horizon);

        let result = self
            .cache
            .get_or_compute(fingerprint, || self.run_models(&input, horizon));

        if let Ok(value) = &result {
            self.metrics
                .record_prediction(started.elapsed(), value.final_aqi(), value.degraded);
            if let Some(category) = &value.category {
                self.metrics.record_band(&category.label);
                if let Some(band) = &value.band {
                    self.metrics.record_band_agreement(category.label == *band);
                }
            }
            debug!(
                fingerprint = %fingerprint.short(),
                horizon = horizon,
                degraded = value.degraded,
                elapsed_us = started.elapsed().as_micros() as u64,
                "prediction served"
            );
        }
        result
    }

    /// Classify a single reading's current conditions.
    ///
    /// This path needs the classifier; with no forecast there is no band
    /// to fall back on, so an unavailable classifier is an error. Results
    /// are not cached.
    pub fn classify_reading(&self, reading: &Reading) -> PipelineResult<CategoryPrediction> {
        let features = self.normalizer.normalize_latest(reading)?;
        let started = Instant::now();
        let prediction = self.classifier.classify(&features)?;
        self.metrics
            .record_model_time("classifier", started.elapsed());
        Ok(prediction)
    }

    /// Run both models on a normalized input. Called at most once per
    /// in-flight fingerprint; the cache holds no lock while this runs.
    fn run_models(&self, input: &FeatureVector, horizon: usize) -> PipelineResult<ForecastResult> {
        let mut result = ForecastResult::new(&self.version_tag);

        let forecast_started = Instant::now();
        match self.forecaster.forecast(input, horizon) {
            Ok(steps) => {
                self.metrics
                    .record_model_time("forecaster", forecast_started.elapsed());
                result = result.with_forecast(steps);
            }
            Err(PipelineError::ModelUnavailable { reason, .. }) => {
                warn!(model = "forecaster", reason = %reason, "continuing without forecast");
                result = result.mark_degraded(format!("forecaster: {reason}"));
            }
            Err(e) => return Err(e),
        }

        if let Some(final_aqi) = result.final_aqi() {
            result = result.with_band(self.bands.band_for(final_aqi).to_string());
        }

        let classify_started = Instant::now();
        match self.classifier.classify(input.latest_step()) {
            Ok(prediction) => {
                self.metrics
                    .record_model_time("classifier", classify_started.elapsed());
                result.category = Some(prediction);
            }
            Err(PipelineError::ModelUnavailable { reason, .. }) => {
                warn!(model = "classifier", reason = %reason, "continuing without classifier");
                if self.fallback_to_bands {
                    if let Some(band) = result.band.clone() {
                        result = result.with_derived_category(band);
                    }
                }
                result = result.mark_degraded(format!("classifier: {reason}"));
            }
            Err(e) => return Err(e),
        }

        if result.forecast.is_empty() && result.category.is_none() {
            return Err(PipelineError::model_unavailable(
                "pipeline",
                "no model could produce output",
            ));
        }
        Ok(result)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    /// Drop all cached results, forcing fresh model runs.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    /// Window length `predict` expects.
    pub fn lookback(&self) -> usize {
        self.normalizer.lookback()
    }

    pub fn max_horizon(&self) -> usize {
        self.max_horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::POLLUTANT_CHANNELS;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        output: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    impl CountingBackend {
        fn new(output: Vec<f32>) -> (Arc<dyn InferenceBackend>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Arc::new(Self {
                output,
                calls: Arc::clone(&calls),
            });
            (backend, calls)
        }
    }

    impl InferenceBackend for CountingBackend {
        fn infer(&self, _shape: &[i64], _input: &[f32]) -> PipelineResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.forecast.lookback = 4;
        config
    }

    fn window(len: usize) -> Vec<Reading> {
        (0..len)
            .map(|t| {
                let mut reading = Reading::new("Bangalore");
                for (c, channel) in POLLUTANT_CHANNELS.iter().enumerate() {
                    reading.set_pollutant(channel, Some(40.0 + t as f64 + c as f64));
                }
                reading
            })
            .collect()
    }

    /// Scores whose argmax is "Poor" under the default label set.
    fn poor_scores() -> Vec<f32> {
        vec![0.05, 0.05, 0.1, 0.6, 0.1, 0.1]
    }

    #[test]
    fn test_predict_end_to_end() {
        // 0.5 scaled onto [0, 500] is exactly 250, which bands as "Poor".
        let (forecaster, _) = CountingBackend::new(vec![0.5]);
        let (classifier, _) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        let result = pipeline.predict(&window(4), 6).unwrap();

        assert_eq!(result.forecast, vec![250.0; 6]);
        assert_eq!(result.band.as_deref(), Some("Poor"));
        let category = result.category.unwrap();
        assert_eq!(category.label, "Poor");
        assert!(category.confidence.is_some());
        assert!(!result.degraded);
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.model_version, "f=lstm-v1;c=gbt-v1");
    }

    #[test]
    fn test_identical_requests_run_models_once() {
        let (forecaster, forecaster_calls) = CountingBackend::new(vec![0.5]);
        let (classifier, classifier_calls) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        let readings = window(4);
        let first = pipeline.predict(&readings, 6).unwrap();
        let second = pipeline.predict(&readings, 6).unwrap();

        assert_eq!(forecaster_calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.forecast, second.forecast);
        assert_eq!(pipeline.metrics().predictions_served.load(Ordering::Relaxed), 2);
        assert_eq!(pipeline.cache_snapshot().hits, 1);
    }

    #[test]
    fn test_distinct_horizons_are_distinct_cache_keys() {
        let (forecaster, forecaster_calls) = CountingBackend::new(vec![0.5]);
        let (classifier, _) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        let readings = window(4);
        assert_eq!(pipeline.predict(&readings, 6).unwrap().forecast.len(), 6);
        assert_eq!(pipeline.predict(&readings, 12).unwrap().forecast.len(), 12);
        assert_eq!(forecaster_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_forecaster_down_degrades_and_is_not_cached() {
        let (classifier, classifier_calls) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), None, Some(classifier)).unwrap();

        for _ in 0..2 {
            let result = pipeline.predict(&window(4), 6).unwrap();
            assert!(result.degraded);
            assert!(result.forecast.is_empty());
            assert!(result.band.is_none());
            assert_eq!(result.category.as_ref().unwrap().label, "Poor");
            assert!(result.diagnostics.iter().any(|d| d.contains("forecaster")));
        }
        // Degraded results are never cached, so the classifier ran twice.
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_classifier_down_falls_back_to_band() {
        let (forecaster, _) = CountingBackend::new(vec![0.5]);
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), None).unwrap();

        let result = pipeline.predict(&window(4), 3).unwrap();

        assert!(result.degraded);
        assert_eq!(result.forecast, vec![250.0; 3]);
        let category = result.category.unwrap();
        assert_eq!(category.label, "Poor");
        assert!(category.confidence.is_none());
    }

    #[test]
    fn test_both_models_down_is_an_error() {
        let pipeline = Pipeline::with_backends(&config(), None, None).unwrap();
        let err = pipeline.predict(&window(4), 6).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_invalid_window_never_reaches_models() {
        let (forecaster, forecaster_calls) = CountingBackend::new(vec![0.5]);
        let (classifier, classifier_calls) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        // Wrong length.
        assert!(matches!(
            pipeline.predict(&window(3), 6),
            Err(PipelineError::Validation(_))
        ));

        // A window with no pollutant observations at all.
        let mut readings = window(4);
        for reading in &mut readings {
            for channel in POLLUTANT_CHANNELS {
                reading.set_pollutant(channel, None);
            }
        }
        assert!(matches!(
            pipeline.predict(&readings, 6),
            Err(PipelineError::InsufficientData(_))
        ));

        // Out-of-range horizon.
        assert!(matches!(
            pipeline.predict(&window(4), 0),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            pipeline.predict(&window(4), 25),
            Err(PipelineError::Validation(_))
        ));

        assert_eq!(forecaster_calls.load(Ordering::SeqCst), 0);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_cache_forces_recompute() {
        let (forecaster, forecaster_calls) = CountingBackend::new(vec![0.5]);
        let (classifier, _) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        let readings = window(4);
        pipeline.predict(&readings, 6).unwrap();
        pipeline.invalidate_cache();
        pipeline.predict(&readings, 6).unwrap();

        assert_eq!(forecaster_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_classify_reading_bypasses_forecaster() {
        let (forecaster, forecaster_calls) = CountingBackend::new(vec![0.5]);
        let (classifier, _) = CountingBackend::new(poor_scores());
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), Some(classifier)).unwrap();

        let prediction = pipeline.classify_reading(&window(1)[0]).unwrap();

        assert_eq!(prediction.label, "Poor");
        assert_eq!(forecaster_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classify_reading_requires_classifier() {
        let (forecaster, _) = CountingBackend::new(vec![0.5]);
        let pipeline = Pipeline::with_backends(&config(), Some(forecaster), None).unwrap();

        let err = pipeline.classify_reading(&window(1)[0]).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
    }
}
