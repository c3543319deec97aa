//! Live weather collaborator
//!
//! Thin client for a WeatherAPI-compatible `current.json` endpoint, used
//! to enrich readings with the weather fields the models were trained
//! alongside. Entirely optional: no API key means no client.

use crate::config::WeatherConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::Reading;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Current conditions for one city.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConditions {
    pub city: String,
    pub temperature_c: f64,
    pub humidity: f64,
    pub wind_kph: f64,
    pub condition: String,
}

impl LiveConditions {
    /// Copy the weather fields onto a reading, leaving pollutants alone.
    pub fn apply_to(&self, reading: &mut Reading) {
        reading.temperature = Some(self.temperature_c);
        reading.humidity = Some(self.humidity);
        reading.wind_speed = Some(self.wind_kph);
    }
}

// The parts of the WeatherAPI response this client reads.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    location: ApiLocation,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    temp_c: f64,
    humidity: f64,
    wind_kph: f64,
    condition: ApiCondition,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    text: String,
}

pub struct WeatherClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_city: String,
}

impl WeatherClient {
    pub fn from_config(config: &WeatherConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::weather(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_city: config.default_city.clone(),
        })
    }

    /// Whether the client is usable at all.
    pub fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Fetch current conditions for `city`, or the configured default.
    pub async fn current(&self, city: Option<&str>) -> PipelineResult<LiveConditions> {
        if self.api_key.is_empty() {
            return Err(PipelineError::weather("no API key configured"));
        }
        let city = city.unwrap_or(&self.default_city);
        let url = format!("{}/current.json", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", city)])
            .send()
            .await
            .map_err(|e| PipelineError::weather(format!("{city}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::weather(format!("{city}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::weather(format!("{city}: {e}")))?;
        let conditions = parse_current(&body)?;
        debug!(
            city = %conditions.city,
            temp_c = conditions.temperature_c,
            "fetched live weather"
        );
        Ok(conditions)
    }
}

/// Parse a `current.json` body into conditions.
fn parse_current(body: &str) -> PipelineResult<LiveConditions> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::weather(format!("unexpected response shape: {e}")))?;
    Ok(LiveConditions {
        city: response.location.name,
        temperature_c: response.current.temp_c,
        humidity: response.current.humidity,
        wind_kph: response.current.wind_kph,
        condition: response.current.condition.text,
    })
}
