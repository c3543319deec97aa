//! Performance metrics and statistics tracking for the forecast pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Total prediction requests served
    pub predictions_served: AtomicU64,
    /// Requests answered without every model contributing
    pub degraded_results: AtomicU64,
    /// Results by predicted category
    results_by_band: RwLock<HashMap<String, u64>>,
    /// End-to-end processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Model inference times (in microseconds)
    model_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Final-AQI distribution in 50-point buckets
    aqi_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
    /// How often the classifier label matches the forecast's AQI band
    band_agreements: RwLock<Vec<f64>>,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            degraded_results: AtomicU64::new(0),
            results_by_band: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            model_times: RwLock::new(HashMap::new()),
            aqi_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
            band_agreements: RwLock::new(Vec::with_capacity(1000)),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(&self, processing_time: Duration, final_aqi: Option<f64>, degraded: bool) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_results.fetch_add(1, Ordering::Relaxed);
        }

        // Record processing time
        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        // Record AQI bucket
        if let Some(aqi) = final_aqi {
            let bucket = ((aqi / 50.0).max(0.0)).min(9.0) as usize;
            if let Ok(mut buckets) = self.aqi_buckets.write() {
                buckets[bucket] += 1;
            }
        }
    }

    /// Record a result's predicted category
    pub fn record_band(&self, band: &str) {
        if let Ok(mut by_band) = self.results_by_band.write() {
            *by_band.entry(band.to_string()).or_insert(0) += 1;
        }
    }

    /// Record model inference time
    pub fn record_model_time(&self, model_name: &str, duration: Duration) {
        if let Ok(mut times) = self.model_times.write() {
            let model_times = times.entry(model_name.to_string()).or_insert_with(Vec::new);
            model_times.push(duration.as_micros() as u64);
            // Keep only last 1000 per model
            if model_times.len() > 1000 {
                model_times.drain(0..500);
            }
        }
    }

    /// Record whether the classifier's label agreed with the AQI band
    /// derived from the forecast
    pub fn record_band_agreement(&self, agreed: bool) {
        if let Ok(mut agreements) = self.band_agreements.write() {
            agreements.push(if agreed { 1.0 } else { 0.0 });
            if agreements.len() > 1000 {
                agreements.drain(0..500);
            }
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self.processing_times.read().unwrap();
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get model performance stats
    pub fn get_model_stats(&self) -> HashMap<String, ModelStats> {
        let times = self.model_times.read().unwrap();
        let mut stats = HashMap::new();

        for (model, model_times) in times.iter() {
            if model_times.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = model_times.clone();
            sorted.sort();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                model.clone(),
                ModelStats {
                    calls: count as u64,
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p99_us: sorted[(count as f64 * 0.99) as usize],
                },
            );
        }

        stats
    }

    /// Get the average classifier/band agreement
    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = self.band_agreements.read().unwrap();
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Get current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get the final-AQI distribution
    pub fn get_aqi_distribution(&self) -> [u64; 10] {
        *self.aqi_buckets.read().unwrap()
    }

    /// Get results by predicted category
    pub fn get_results_by_band(&self) -> HashMap<String, u64> {
        self.results_by_band.read().unwrap().clone()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let served = self.predictions_served.load(Ordering::Relaxed);
        let degraded = self.degraded_results.load(Ordering::Relaxed);
        let degraded_rate = if served > 0 {
            (degraded as f64 / served as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let agreement = self.get_avg_agreement();
        let results_by_band = self.get_results_by_band();
        let aqi_dist = self.get_aqi_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           AQI FORECAST PIPELINE - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions Served:     {:>8}  │  Throughput: {:>6.1} rq/s ║",
            served, throughput
        );
        info!(
            "║ Degraded Results:       {:>8}  │  Degraded:   {:>6.1}%     ║",
            degraded, degraded_rate
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Classifier/Band Agreement: {:>5.1}%                            ║",
            agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Results by Category:                                         ║");
        for (band, count) in &results_by_band {
            let pct = if served > 0 {
                (*count as f64 / served as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:12}: {:>6} ({:>5.1}%)                              ║", band, count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Final AQI Distribution:                                      ║");
        let total: u64 = aqi_dist.iter().sum();
        for (i, &count) in aqi_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:>3}-{:>3}: {:>6} ({:>5.1}%) {}",
                i * 50,
                (i + 1) * 50,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        // Model-specific stats
        let model_stats = self.get_model_stats();
        if !model_stats.is_empty() {
            info!("Model Inference Times (μs):");
            for (model, stats) in &model_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={})",
                    model, stats.mean_us, stats.p50_us, stats.p99_us, stats.calls
                );
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Model-specific statistics
#[derive(Debug)]
pub struct ModelStats {
    pub calls: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), Some(120.0), false);
        metrics.record_prediction(Duration::from_micros(200), Some(80.0), true);
        metrics.record_band("Moderate");
        metrics.record_band("Satisfactory");

        assert_eq!(metrics.predictions_served.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.degraded_results.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_results_by_band().len(), 2);
    }

    #[test]
    fn test_aqi_buckets() {
        let metrics = PipelineMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), Some(10.0), false);
        metrics.record_prediction(Duration::from_micros(100), Some(130.0), false);
        metrics.record_prediction(Duration::from_micros(100), Some(500.0), false);
        metrics.record_prediction(Duration::from_micros(100), None, true);

        let dist = metrics.get_aqi_distribution();
        assert_eq!(dist[0], 1);
        assert_eq!(dist[2], 1);
        assert_eq!(dist[9], 1);
        assert_eq!(dist.iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_band_agreement() {
        let metrics = PipelineMetrics::new();

        metrics.record_band_agreement(true);
        metrics.record_band_agreement(true);
        metrics.record_band_agreement(false);
        metrics.record_band_agreement(true);

        assert!((metrics.get_avg_agreement() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        for i in 1..=100u64 {
            metrics.record_prediction(Duration::from_micros(i), Some(50.0), false);
        }

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.max_us, 100);
    }
}
