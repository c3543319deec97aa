//! Synthetic Reading Generator
//!
//! Emits hourly pollutant readings as JSON lines on stdout, one random
//! walk per city, for feeding the pipeline during development:
//!
//!   reading-generator 96 Bangalore,Delhi 0.15 | aqi-pipeline -

use aqi_forecast_pipeline::types::Reading;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::io::Write as _;
use std::time::Duration;
use tracing::info;

/// Per-channel walk parameters: (channel, base, calm step, episode step,
/// floor, ceiling)
const CHANNEL_WALKS: [(&str, f64, f64, f64, f64, f64); 6] = [
    ("pm2.5", 60.0, 6.0, 25.0, 1.0, 1000.0),
    ("co", 1.2, 0.08, 0.5, 0.1, 50.0),
    ("pm10", 110.0, 9.0, 40.0, 1.0, 1000.0),
    ("no2", 35.0, 4.0, 15.0, 1.0, 500.0),
    ("o3", 50.0, 5.0, 18.0, 1.0, 600.0),
    ("so2", 18.0, 2.5, 8.0, 1.0, 500.0),
];

/// Reading generator maintaining one pollutant walk per city
struct ReadingGenerator {
    rng: rand::rngs::ThreadRng,
    levels: HashMap<String, Vec<f64>>,
}

impl ReadingGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            levels: HashMap::new(),
        }
    }

    /// Generate a reading under ordinary conditions
    fn generate_calm(&mut self, city: &str, timestamp: DateTime<Utc>) -> Reading {
        self.step(city, timestamp, false)
    }

    /// Generate a reading during a pollution episode: bigger steps with
    /// an upward bias
    fn generate_episode(&mut self, city: &str, timestamp: DateTime<Utc>) -> Reading {
        self.step(city, timestamp, true)
    }

    fn step(&mut self, city: &str, timestamp: DateTime<Utc>, episode: bool) -> Reading {
        let levels = self
            .levels
            .entry(city.to_string())
            .or_insert_with(|| CHANNEL_WALKS.iter().map(|walk| walk.1).collect());

        let mut reading = Reading::new(city);
        reading.timestamp = timestamp;

        for (i, (channel, _, calm_step, episode_step, floor, ceiling)) in
            CHANNEL_WALKS.iter().enumerate()
        {
            let delta = if episode {
                self.rng.gen_range(-0.3 * episode_step..*episode_step)
            } else {
                self.rng.gen_range(-calm_step..*calm_step)
            };
            levels[i] = (levels[i] + delta).clamp(*floor, *ceiling);
            reading.set_pollutant(channel, Some(levels[i]));
        }

        reading.temperature = Some(self.rng.gen_range(18.0..34.0));
        reading.humidity = Some(self.rng.gen_range(40.0..95.0));
        reading.wind_speed = Some(self.rng.gen_range(2.0..20.0));
        reading
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout carries the JSONL stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Synthetic Reading Generator");

    // Usage: reading-generator [hours] [cities] [episode_rate] [delay_ms]
    let args: Vec<String> = std::env::args().collect();
    let hours: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(96);
    let cities: Vec<String> = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("Bangalore")
        .split(',')
        .map(|city| city.trim().to_string())
        .filter(|city| !city.is_empty())
        .collect();
    let episode_rate: f64 = args
        .get(3)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.15)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);

    info!(
        hours = hours,
        cities = ?cities,
        episode_rate = episode_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let mut generator = ReadingGenerator::new();
    let mut rng = rand::thread_rng();
    let start = Utc::now() - ChronoDuration::hours(hours.saturating_sub(1) as i64);

    let mut calm_count = 0u64;
    let mut episode_count = 0u64;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for hour in 0..hours {
        let timestamp = start + ChronoDuration::hours(hour as i64);

        for city in &cities {
            let reading = if rng.gen_bool(episode_rate) {
                episode_count += 1;
                generator.generate_episode(city, timestamp)
            } else {
                calm_count += 1;
                generator.generate_calm(city, timestamp)
            };
            writeln!(out, "{}", serde_json::to_string(&reading)?)?;
        }

        if (hour + 1) % 24 == 0 {
            info!(
                "Emitted {}/{} hours ({} calm, {} episode readings)",
                hour + 1,
                hours,
                calm_count,
                episode_count
            );
        }

        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
    }

    info!(
        "Completed! Emitted {} readings ({} calm, {} episode)",
        calm_count + episode_count,
        calm_count,
        episode_count
    );

    Ok(())
}
