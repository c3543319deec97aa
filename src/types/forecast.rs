//! Forecast result data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One AQI band: readings up to `upto` (inclusive) carry `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub upto: f64,
    pub label: String,
}

/// AQI band breakpoints, ascending. Values above the last bound get
/// `overflow`. Defaults follow the CPCB scale the models were trained
/// against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqiBands {
    pub bands: Vec<Band>,
    pub overflow: String,
}

impl AqiBands {
    /// Band label for an AQI value.
    pub fn band_for(&self, aqi: f64) -> &str {
        for band in &self.bands {
            if aqi <= band.upto {
                return &band.label;
            }
        }
        &self.overflow
    }
}

impl Default for AqiBands {
    fn default() -> Self {
        let band = |upto: f64, label: &str| Band {
            upto,
            label: label.to_string(),
        };
        Self {
            bands: vec![
                band(50.0, "Good"),
                band(100.0, "Satisfactory"),
                band(200.0, "Moderate"),
                band(300.0, "Poor"),
                band(400.0, "Very Poor"),
            ],
            overflow: "Severe".to_string(),
        }
    }
}

/// A category prediction and the score behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    /// Label from the configured closed set
    pub label: String,

    /// Classifier probability for the label; `None` when the label was
    /// derived from AQI bands in degraded mode
    pub confidence: Option<f64>,
}

/// Composite prediction assembled by the orchestrator.
///
/// Immutable once created; cached by fingerprint unless degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Predicted AQI per future step; empty when the forecaster was unavailable
    pub forecast: Vec<f64>,

    /// Predicted air-quality category
    pub category: Option<CategoryPrediction>,

    /// AQI band of the final forecast step
    pub band: Option<String>,

    /// True when one or more sub-models could not contribute
    pub degraded: bool,

    /// Diagnostics describing degraded parts
    pub diagnostics: Vec<String>,

    /// Version tag of the models that produced this result
    pub model_version: String,

    /// Result creation time
    pub generated_at: DateTime<Utc>,
}

impl ForecastResult {
    /// Create an empty, non-degraded result for a model version.
    pub fn new(model_version: impl Into<String>) -> Self {
        Self {
            forecast: Vec::new(),
            category: None,
            band: None,
            degraded: false,
            diagnostics: Vec::new(),
            model_version: model_version.into(),
            generated_at: Utc::now(),
        }
    }

    /// Attach the forecast steps.
    pub fn with_forecast(mut self, steps: Vec<f64>) -> Self {
        self.forecast = steps;
        self
    }

    /// Attach a classifier-produced category.
    pub fn with_category(mut self, label: impl Into<String>, confidence: f64) -> Self {
        self.category = Some(CategoryPrediction {
            label: label.into(),
            confidence: Some(confidence),
        });
        self
    }

    /// Attach a band-derived category (degraded fallback, no confidence).
    pub fn with_derived_category(mut self, label: impl Into<String>) -> Self {
        self.category = Some(CategoryPrediction {
            label: label.into(),
            confidence: None,
        });
        self
    }

    /// Attach the AQI band of the final forecast step.
    pub fn with_band(mut self, band: impl Into<String>) -> Self {
        self.band = Some(band.into());
        self
    }

    /// Mark the result degraded and record why.
    pub fn mark_degraded(mut self, diagnostic: impl Into<String>) -> Self {
        self.degraded = true;
        self.diagnostics.push(diagnostic.into());
        self
    }

    /// Final forecast step, if any.
    pub fn final_aqi(&self) -> Option<f64> {
        self.forecast.last().copied()
    }
}
