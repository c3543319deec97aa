//! Feature normalization for model input windows
//!
//! Turns raw reading windows into the fixed-shape, scaled feature vectors
//! the sequence forecaster was trained on. Channel order and scaling
//! parameters are fixed by training and must never drift at serving time.

use crate::config::{FieldParams, ImputePolicy, NormalizationConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{Reading, POLLUTANT_CHANNELS};
use tracing::debug;

/// Normalized model input, time-major: `values[t * channels + c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    lookback: usize,
    channels: usize,
    values: Vec<f32>,
}

impl FeatureVector {
    /// (lookback, channels)
    pub fn shape(&self) -> (usize, usize) {
        (self.lookback, self.channels)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// The most recent normalized step, one value per channel.
    pub fn latest_step(&self) -> &[f32] {
        &self.values[(self.lookback - 1) * self.channels..]
    }
}

#[cfg(test)]
impl FeatureVector {
    pub(crate) fn from_raw(lookback: usize, channels: usize, values: Vec<f32>) -> Self {
        Self {
            lookback,
            channels,
            values,
        }
    }
}

/// Stateless normalizer configured once from training parameters.
pub struct FeatureNormalizer {
    lookback: usize,
    impute: ImputePolicy,
    /// Per-channel parameters in `POLLUTANT_CHANNELS` order
    fields: Vec<(&'static str, FieldParams)>,
}

impl FeatureNormalizer {
    pub fn new(lookback: usize, config: &NormalizationConfig) -> PipelineResult<Self> {
        let mut fields = Vec::with_capacity(POLLUTANT_CHANNELS.len());
        for channel in POLLUTANT_CHANNELS {
            let params = config.fields.get(channel).ok_or_else(|| {
                PipelineError::config(format!("no normalization parameters for {channel:?}"))
            })?;
            fields.push((channel, *params));
        }
        Ok(Self {
            lookback,
            impute: config.impute,
            fields,
        })
    }

    /// Normalize a chronological window of readings into model input.
    ///
    /// The window length must equal the configured lookback exactly.
    /// Missing values (absent, NaN or infinite) are imputed per channel;
    /// a channel with no observed value at all is unrecoverable.
    pub fn normalize(&self, window: &[Reading]) -> PipelineResult<FeatureVector> {
        if window.len() != self.lookback {
            return Err(PipelineError::validation(format!(
                "window length {} does not match lookback {}",
                window.len(),
                self.lookback
            )));
        }

        let channels = self.fields.len();
        let mut values = vec![0.0f32; self.lookback * channels];
        let mut imputed_total = 0usize;

        for (c, (channel, params)) in self.fields.iter().enumerate() {
            let column: Vec<Option<f64>> = window
                .iter()
                .map(|reading| reading.pollutant(channel).filter(|v| v.is_finite()))
                .collect();

            let missing = column.iter().filter(|v| v.is_none()).count();
            let filled = impute(&column, self.impute).ok_or_else(|| {
                PipelineError::insufficient_data(format!(
                    "channel {channel:?} has no observed values in the window"
                ))
            })?;
            imputed_total += missing;

            for (t, raw) in filled.into_iter().enumerate() {
                let scaled = params.scale.apply(params.clip(raw));
                values[t * channels + c] = scaled as f32;
            }
        }

        if imputed_total > 0 {
            debug!(
                imputed = imputed_total,
                policy = ?self.impute,
                "imputed missing values in input window"
            );
        }

        Ok(FeatureVector {
            lookback: self.lookback,
            channels,
            values,
        })
    }

    /// Normalize a single reading into one feature row for the classifier.
    ///
    /// With no surrounding window there is nothing to impute from, so
    /// every channel must be present and finite.
    pub fn normalize_latest(&self, reading: &Reading) -> PipelineResult<Vec<f32>> {
        let mut row = Vec::with_capacity(self.fields.len());
        for (channel, params) in &self.fields {
            let raw = reading
                .pollutant(channel)
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    PipelineError::insufficient_data(format!(
                        "channel {channel:?} missing from reading"
                    ))
                })?;
            row.push(params.scale.apply(params.clip(raw)) as f32);
        }
        Ok(row)
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn channels(&self) -> usize {
        self.fields.len()
    }
}

/// Fill gaps in one channel column. Returns None when nothing was observed.
fn impute(column: &[Option<f64>], policy: ImputePolicy) -> Option<Vec<f64>> {
    let first_observed = column.iter().flatten().next().copied()?;
    match policy {
        ImputePolicy::ForwardFill => {
            // Leading gaps take the first observed value, later gaps carry
            // the last one forward.
            let mut last = first_observed;
            Some(
                column
                    .iter()
                    .map(|v| {
                        if let Some(v) = v {
                            last = *v;
                        }
                        last
                    })
                    .collect(),
            )
        }
        ImputePolicy::FieldMean => {
            let observed: Vec<f64> = column.iter().flatten().copied().collect();
            let mean = observed.iter().sum::<f64>() / observed.len() as f64;
            Some(column.iter().map(|v| v.unwrap_or(mean)).collect())
        }
    }
}
