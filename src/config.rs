//! Configuration management for the AQI forecast pipeline

use crate::error::{PipelineError, PipelineResult};
use crate::types::{AqiBands, POLLUTANT_CHANNELS};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Missing-value imputation strategy for the normalizer.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputePolicy {
    /// Carry the last observed value forward; leading gaps take the first
    /// observed value
    #[default]
    ForwardFill,
    /// Replace gaps with the mean of the observed values in the window
    FieldMean,
}

/// Per-field scaling transform. Parameters must match the ones persisted
/// at training time or serving silently diverges from training.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldScale {
    Zscore { mean: f64, std: f64 },
    Minmax { min: f64, max: f64 },
}

impl FieldScale {
    /// Apply the transform to a clipped raw value.
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            // Degenerate std falls back to centering only, matching the
            // training pipeline's guard.
            FieldScale::Zscore { mean, std } => {
                if std > 0.0 {
                    (value - mean) / std
                } else {
                    value - mean
                }
            }
            FieldScale::Minmax { min, max } => {
                if max > min {
                    (value - min) / (max - min)
                } else {
                    0.0
                }
            }
        }
    }
}

/// Scaling plus plausibility bounds for one pollutant channel.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct FieldParams {
    pub scale: FieldScale,
    /// Values below this are clipped up, not rejected
    #[serde(default)]
    pub plausible_min: f64,
    /// Values above this are clipped down, not rejected
    #[serde(default = "default_plausible_max")]
    pub plausible_max: f64,
}

impl FieldParams {
    /// Clip a raw value into the physically plausible range.
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.plausible_min, self.plausible_max)
    }
}

fn default_plausible_max() -> f64 {
    1000.0
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub runlog: RunLogConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Parallel prediction workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds between metrics summaries
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_report_interval_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

/// Trained model artifacts configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing exported model files
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    /// Sequence forecaster file name within `models_dir`
    #[serde(default = "default_forecaster_file")]
    pub forecaster_file: String,
    /// Version tag of the loaded forecaster; part of the cache fingerprint
    #[serde(default = "default_forecaster_version")]
    pub forecaster_version: String,
    /// Category classifier file name within `models_dir`
    #[serde(default = "default_classifier_file")]
    pub classifier_file: String,
    /// Version tag of the loaded classifier; part of the cache fingerprint
    #[serde(default = "default_classifier_version")]
    pub classifier_version: String,
    /// Number of threads for ONNX inference per model
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_forecaster_file() -> String {
    "lstm_aqi_model.onnx".to_string()
}

fn default_forecaster_version() -> String {
    "lstm-v1".to_string()
}

fn default_classifier_file() -> String {
    "classifier.onnx".to_string()
}

fn default_classifier_version() -> String {
    "gbt-v1".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            forecaster_file: default_forecaster_file(),
            forecaster_version: default_forecaster_version(),
            classifier_file: default_classifier_file(),
            classifier_version: default_classifier_version(),
            onnx_threads: default_onnx_threads(),
        }
    }
}

/// Forecast shape configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    /// Number of past readings the sequence model requires
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Largest number of future steps a caller may request
    #[serde(default = "default_max_horizon")]
    pub max_horizon: usize,
    /// Lower bound of the AQI range the model output is scaled against
    #[serde(default)]
    pub aqi_min: f64,
    /// Upper bound of the AQI range the model output is scaled against
    #[serde(default = "default_aqi_max")]
    pub aqi_max: f64,
}

fn default_lookback() -> usize {
    24
}

fn default_max_horizon() -> usize {
    24
}

fn default_aqi_max() -> f64 {
    500.0
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            max_horizon: default_max_horizon(),
            aqi_min: 0.0,
            aqi_max: default_aqi_max(),
        }
    }
}

/// Normalizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizationConfig {
    /// Missing-value policy
    #[serde(default)]
    pub impute: ImputePolicy,
    /// Optional JSON file of per-channel scale parameters exported by
    /// training; overrides the inline `fields` scales when present
    #[serde(default)]
    pub params_file: Option<PathBuf>,
    /// Per-channel scaling and plausibility parameters; channels the file
    /// does not list keep the built-in defaults
    #[serde(default = "default_field_params")]
    pub fields: HashMap<String, FieldParams>,
}

fn default_field_params() -> HashMap<String, FieldParams> {
    let field = |mean: f64, std: f64, max: f64| FieldParams {
        scale: FieldScale::Zscore { mean, std },
        plausible_min: 0.0,
        plausible_max: max,
    };
    let mut fields = HashMap::new();
    fields.insert("pm2.5".to_string(), field(60.0, 45.0, 1000.0));
    fields.insert("co".to_string(), field(1.2, 0.9, 50.0));
    fields.insert("pm10".to_string(), field(110.0, 70.0, 1000.0));
    fields.insert("no2".to_string(), field(35.0, 25.0, 500.0));
    fields.insert("o3".to_string(), field(50.0, 35.0, 600.0));
    fields.insert("so2".to_string(), field(18.0, 14.0, 500.0));
    fields
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            impute: ImputePolicy::default(),
            params_file: None,
            fields: default_field_params(),
        }
    }
}

/// Inference cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Seconds before a cached result becomes stale
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of cached results before LRU eviction
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

/// Classifier label-set configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Closed label set, in the class order the model was trained with
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    /// AQI band breakpoints for derived bands and the degraded fallback
    #[serde(default)]
    pub bands: AqiBands,
    /// Derive the category from AQI bands when the classifier is down but a
    /// forecast exists
    #[serde(default = "default_true")]
    pub fallback_to_bands: bool,
}

fn default_labels() -> Vec<String> {
    ["Good", "Satisfactory", "Moderate", "Poor", "Very Poor", "Severe"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
            bands: AqiBands::default(),
            fallback_to_bands: true,
        }
    }
}

/// Experiment run-log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RunLogConfig {
    /// Path to the persisted run summary CSV
    #[serde(default = "default_runlog_path")]
    pub path: String,
    /// Metric used to pick the best run
    #[serde(default = "default_primary_metric")]
    pub primary_metric: String,
    /// Whether a smaller primary metric is better
    #[serde(default = "default_true")]
    pub lower_is_better: bool,
}

fn default_runlog_path() -> String {
    "mlruns/mlflow_summary.csv".to_string()
}

fn default_primary_metric() -> String {
    "rmse".to_string()
}

impl Default for RunLogConfig {
    fn default() -> Self {
        Self {
            path: default_runlog_path(),
            primary_metric: default_primary_metric(),
            lower_is_better: true,
        }
    }
}

/// Live weather collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    /// WeatherAPI-compatible base URL
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// API key; leave this empty and set AQI__WEATHER__API_KEY instead of
    /// committing a key to the config file
    #[serde(default)]
    pub api_key: String,
    /// Request timeout in seconds
    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
    /// City queried when the caller does not name one
    #[serde(default = "default_city")]
    pub default_city: String,
}

fn default_weather_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_weather_timeout_secs() -> u64 {
    10
}

fn default_city() -> String {
    "Bangalore".to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_base_url(),
            api_key: String::new(),
            timeout_secs: default_weather_timeout_secs(),
            default_city: default_city(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    pub fn load() -> PipelineResult<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, layering `AQI__*`
    /// environment variables on top of the file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("AQI").separator("__"))
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;
        app.fill_field_defaults();
        app.apply_params_file()?;
        app.validate()?;
        Ok(app)
    }

    /// Add built-in parameters for channels the file left out. A partial
    /// `[normalization.fields]` table replaces the whole map during
    /// deserialization, so the missing channels are restored here.
    fn fill_field_defaults(&mut self) {
        for (channel, params) in default_field_params() {
            self.normalization.fields.entry(channel).or_insert(params);
        }
    }

    /// Merge training-exported scale parameters over the inline field
    /// configuration.
    fn apply_params_file(&mut self) -> PipelineResult<()> {
        let Some(path) = self.normalization.params_file.clone() else {
            return Ok(());
        };
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::config(format!("params file {}: {e}", path.display())))?;
        let scales: HashMap<String, FieldScale> = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::config(format!("params file {}: {e}", path.display())))?;
        for (channel, scale) in scales {
            if let Some(params) = self.normalization.fields.get_mut(&channel) {
                params.scale = scale;
            }
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.forecast.lookback == 0 {
            return Err(PipelineError::config("forecast.lookback must be at least 1"));
        }
        if self.forecast.max_horizon == 0 {
            return Err(PipelineError::config("forecast.max_horizon must be at least 1"));
        }
        if self.forecast.aqi_max <= self.forecast.aqi_min {
            return Err(PipelineError::config("forecast.aqi_max must exceed aqi_min"));
        }
        if self.cache.capacity == 0 {
            return Err(PipelineError::config("cache.capacity must be at least 1"));
        }
        if self.service.workers == 0 {
            return Err(PipelineError::config("service.workers must be at least 1"));
        }
        if self.classifier.labels.is_empty() {
            return Err(PipelineError::config("classifier.labels must not be empty"));
        }
        for channel in POLLUTANT_CHANNELS {
            if !self.normalization.fields.contains_key(channel) {
                return Err(PipelineError::config(format!(
                    "normalization.fields missing channel {channel:?}"
                )));
            }
        }
        Ok(())
    }

    /// Combined model version tag carried in every fingerprint.
    pub fn version_tag(&self) -> String {
        format!(
            "f={};c={}",
            self.models.forecaster_version, self.models.classifier_version
        )
    }
}
