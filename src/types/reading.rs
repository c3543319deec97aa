//! Pollutant and weather reading records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pollutant channels in the exact order the models were trained with.
///
/// The normalizer builds feature vectors in this order; reordering it would
/// silently desynchronize serving from training.
pub const POLLUTANT_CHANNELS: [&str; 6] = ["pm2.5", "co", "pm10", "no2", "o3", "so2"];

/// A timestamped pollutant/weather observation for one city.
///
/// Immutable once recorded. Each concentration is either a non-negative
/// float or missing; field names accept the source dataset's column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// City the observation belongs to
    #[serde(default)]
    pub city: String,

    /// Observation timestamp
    #[serde(default = "Utc::now", alias = "datetime")]
    pub timestamp: DateTime<Utc>,

    /// PM2.5 concentration (µg/m³)
    #[serde(default, rename = "pm2.5", alias = "pm25")]
    pub pm25: Option<f64>,

    /// CO concentration (mg/m³)
    #[serde(default)]
    pub co: Option<f64>,

    /// PM10 concentration (µg/m³)
    #[serde(default)]
    pub pm10: Option<f64>,

    /// NO2 concentration (µg/m³)
    #[serde(default)]
    pub no2: Option<f64>,

    /// Ozone concentration (µg/m³)
    #[serde(default)]
    pub o3: Option<f64>,

    /// SO2 concentration (µg/m³)
    #[serde(default)]
    pub so2: Option<f64>,

    /// Air temperature (°C)
    #[serde(default, alias = "temp")]
    pub temperature: Option<f64>,

    /// Relative humidity (%)
    #[serde(default)]
    pub humidity: Option<f64>,

    /// Wind speed (kph)
    #[serde(default, alias = "wind")]
    pub wind_speed: Option<f64>,
}

impl Reading {
    /// Create an empty reading for a city, stamped now.
    pub fn new(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            timestamp: Utc::now(),
            pm25: None,
            co: None,
            pm10: None,
            no2: None,
            o3: None,
            so2: None,
            temperature: None,
            humidity: None,
            wind_speed: None,
        }
    }

    /// Look up a pollutant by its training-time channel name.
    pub fn pollutant(&self, channel: &str) -> Option<f64> {
        match channel {
            "pm2.5" => self.pm25,
            "co" => self.co,
            "pm10" => self.pm10,
            "no2" => self.no2,
            "o3" => self.o3,
            "so2" => self.so2,
            _ => None,
        }
    }

    /// Set a pollutant by its training-time channel name.
    ///
    /// Unknown channel names are ignored.
    pub fn set_pollutant(&mut self, channel: &str, value: Option<f64>) {
        match channel {
            "pm2.5" => self.pm25 = value,
            "co" => self.co = value,
            "pm10" => self.pm10 = value,
            "no2" => self.no2 = value,
            "o3" => self.o3 = value,
            "so2" => self.so2 = value,
            _ => {}
        }
    }
}
