//! AQI Forecast Pipeline - Main Entry Point
//!
//! Reads pollutant readings as JSON lines (file or stdin), maintains a
//! sliding window per city and serves forecasts through the cached
//! pipeline. Supports parallel prediction for high throughput.

use anyhow::{Context, Result};
use aqi_forecast_pipeline::{
    config::AppConfig,
    experiments::ExperimentAggregator,
    metrics::MetricsReporter,
    pipeline::Pipeline,
    types::Reading,
    weather::{LiveConditions, WeatherClient},
};
use std::collections::{HashMap, VecDeque};
use std::io::Read as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Usage: aqi-pipeline [readings.jsonl|-] [horizon]
    let args: Vec<String> = std::env::args().collect();
    let input = args.get(1).cloned().unwrap_or_else(|| "-".to_string());
    let horizon: usize = match args.get(2) {
        Some(raw) => raw.parse().context("horizon must be a positive integer")?,
        None => 6,
    };

    // A missing config file falls back to built-in defaults; a broken one
    // should not be silently papered over.
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) if !std::path::Path::new("config/config.toml").exists() => {
            eprintln!("no config/config.toml ({e}), using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.validate()?;

    init_tracing(&config);
    info!("Starting AQI Forecast Pipeline");
    info!(
        lookback = config.forecast.lookback,
        max_horizon = config.forecast.max_horizon,
        cache_ttl_secs = config.cache.ttl_secs,
        cache_capacity = config.cache.capacity,
        "Configuration loaded"
    );

    // Initialize the pipeline; missing model files degrade, they do not
    // abort startup.
    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    let metrics = pipeline.metrics();

    report_run_log(&config);

    // Live weather is optional enrichment for readings that arrive
    // without weather fields.
    let conditions = fetch_weather(&config).await;

    // Start metrics reporter
    let reporter = MetricsReporter::new(metrics.clone(), config.service.report_interval_secs);
    tokio::spawn(reporter.start());

    let num_workers = config.service.workers;
    info!(workers = num_workers, horizon = horizon, input = %input, "Starting prediction loop");

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let served_count = Arc::new(AtomicU64::new(0));
    let lookback = pipeline.lookback();
    let mut windows: HashMap<String, VecDeque<Reading>> = HashMap::new();

    for line in read_lines(&input)? {
        let mut reading = match serde_json::from_str::<Reading>(&line) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Failed to deserialize reading");
                continue;
            }
        };
        if reading.temperature.is_none() {
            if let Some(conditions) = &conditions {
                conditions.apply_to(&mut reading);
            }
        }

        let window = windows.entry(reading.city.clone()).or_default();
        window.push_back(reading);
        if window.len() > lookback {
            window.pop_front();
        }
        if window.len() < lookback {
            continue;
        }
        let window: Vec<Reading> = window.iter().cloned().collect();

        // Acquire permit (limits concurrent predictions)
        let permit = semaphore.clone().acquire_owned().await?;
        let pipeline = pipeline.clone();
        let metrics = metrics.clone();
        let served_count = served_count.clone();

        tokio::spawn(async move {
            let request_id = Uuid::new_v4();
            let start_time = Instant::now();
            let city = window
                .last()
                .map(|r| r.city.clone())
                .unwrap_or_default();

            match pipeline.predict(&window, horizon) {
                Ok(result) => {
                    let elapsed = start_time.elapsed();
                    if result.degraded {
                        warn!(
                            request_id = %request_id,
                            city = %city,
                            diagnostics = ?result.diagnostics,
                            "Forecast served degraded"
                        );
                    } else {
                        debug!(
                            request_id = %request_id,
                            city = %city,
                            final_aqi = result.final_aqi(),
                            category = result.category.as_ref().map(|c| c.label.as_str()),
                            processing_time_us = elapsed.as_micros() as u64,
                            "Forecast served"
                        );
                    }

                    let count = served_count.fetch_add(1, Ordering::Relaxed) + 1;

                    // Log progress every 100 predictions
                    if count % 100 == 0 {
                        let throughput = metrics.get_throughput();
                        let processing_stats = metrics.get_processing_stats();
                        info!(
                            served = count,
                            throughput = format!("{:.1} rq/s", throughput),
                            avg_latency_us = processing_stats.mean_us,
                            "Processing milestone"
                        );
                    }
                }
                Err(e) => {
                    error!(request_id = %request_id, city = %city, error = %e, "Prediction failed");
                }
            }

            // Release permit when done
            drop(permit);
        });
    }

    // Wait for in-flight predictions before the final summary.
    let _ = semaphore.acquire_many(num_workers as u32).await?;

    info!("Pipeline shutting down...");
    metrics.print_summary();
    let cache = pipeline.cache_snapshot();
    info!(
        hits = cache.hits,
        misses = cache.misses,
        coalesced = cache.coalesced,
        evictions = cache.evictions,
        expirations = cache.expirations,
        hit_rate = format!("{:.1}%", cache.hit_rate() * 100.0),
        "Cache summary"
    );

    Ok(())
}

/// Initialize logging per config; RUST_LOG still wins when set.
fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Log where training stands according to the persisted run log.
fn report_run_log(config: &AppConfig) {
    let aggregator = ExperimentAggregator::from_config(&config.runlog);
    match aggregator.summarize() {
        Ok(summary) if summary.is_empty() => {
            info!(path = %aggregator.path().display(), "No training runs recorded yet");
        }
        Ok(summary) => {
            if let Some(latest) = summary.latest() {
                info!(
                    experiment = %latest.experiment,
                    run_id = %latest.run_id,
                    metrics = ?latest.metrics,
                    "Latest training run"
                );
            }
            if let Some(best) = &summary.best {
                info!(
                    run_id = %best.run_id,
                    metric = %config.runlog.primary_metric,
                    value = best.metrics.get(&config.runlog.primary_metric),
                    "Best training run"
                );
            }
            if !summary.warnings.is_empty() {
                warn!(
                    skipped = summary.warnings.len(),
                    "Run log contained malformed rows"
                );
            }
        }
        Err(e) => warn!(error = %e, "Could not summarize run log"),
    }
}

/// Fetch current conditions once at startup, if a key is configured.
async fn fetch_weather(config: &AppConfig) -> Option<LiveConditions> {
    let client = match WeatherClient::from_config(&config.weather) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Weather client unavailable");
            return None;
        }
    };
    if !client.available() {
        debug!("No weather API key configured, skipping live enrichment");
        return None;
    }
    match client.current(None).await {
        Ok(conditions) => {
            info!(
                city = %conditions.city,
                temp_c = conditions.temperature_c,
                humidity = conditions.humidity,
                wind_kph = conditions.wind_kph,
                condition = %conditions.condition,
                "Live weather fetched"
            );
            Some(conditions)
        }
        Err(e) => {
            warn!(error = %e, "Live weather fetch failed, continuing without it");
            None
        }
    }
}

/// Read input lines from a file, or stdin for "-".
fn read_lines(input: &str) -> Result<Vec<String>> {
    let raw = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))?
    };
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.to_string())
        .collect())
}
