//! Type definitions for the AQI forecast pipeline

pub mod forecast;
pub mod reading;

pub use forecast::{AqiBands, Band, CategoryPrediction, ForecastResult};
pub use reading::{Reading, POLLUTANT_CHANNELS};
