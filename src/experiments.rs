//! Experiment run-log aggregation
//!
//! Parses the CSV summary that training appends a row to after every run
//! (newest run first) and condenses it for dashboards: latest run, best
//! run by the primary metric, and per-metric history with a trend.

use crate::config::RunLogConfig;
use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One parsed training run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRun {
    pub experiment: String,
    pub run_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Metric name (lowercased) to value
    pub metrics: HashMap<String, f64>,
}

/// A row the parser skipped or partially ignored, with enough context to
/// find it in the file. Collected, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecordWarning {
    /// 1-based line in the CSV, counting the header as line 1
    pub line: u64,
    pub reason: String,
}

/// Direction of the most recent change in a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

/// History of one metric across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    /// Values oldest to newest
    pub values: Vec<f64>,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
    pub trend: Trend,
}

/// Condensed view of the run log.
#[derive(Debug, Clone, Default)]
pub struct RunLogSummary {
    /// All parsed runs in file order, newest first
    pub runs: Vec<ExperimentRun>,
    /// Best run by the aggregator's primary metric
    pub best: Option<ExperimentRun>,
    /// Per-metric history
    pub series: HashMap<String, MetricSeries>,
    pub warnings: Vec<MalformedRecordWarning>,
}

impl RunLogSummary {
    /// The most recent run, if any.
    pub fn latest(&self) -> Option<&ExperimentRun> {
        self.runs.first()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

pub struct ExperimentAggregator {
    path: PathBuf,
    primary_metric: String,
    lower_is_better: bool,
}

impl ExperimentAggregator {
    pub fn from_config(config: &RunLogConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            primary_metric: config.primary_metric.to_ascii_lowercase(),
            lower_is_better: config.lower_is_better,
        }
    }

    /// Summarize the configured run log.
    ///
    /// No training having happened yet is normal, so a missing file is an
    /// empty summary, not an error.
    pub fn summarize(&self) -> PipelineResult<RunLogSummary> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "run log not found, reporting empty summary");
            return Ok(RunLogSummary::default());
        }
        let file = std::fs::File::open(&self.path)?;
        self.summarize_reader(file)
    }

    /// Summarize run-log CSV from any reader.
    pub fn summarize_reader<R: Read>(&self, reader: R) -> PipelineResult<RunLogSummary> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
            warn!("run log has no header row, reporting empty summary");
            return Ok(RunLogSummary::default());
        }

        let layout = ColumnLayout::from_headers(&headers)?;
        let mut runs = Vec::new();
        let mut warnings = Vec::new();

        for (index, record) in csv_reader.records().enumerate() {
            // Header is line 1.
            let line = index as u64 + 2;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warnings.push(MalformedRecordWarning {
                        line,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            match layout.parse_row(&record, line, &mut warnings) {
                Some(run) => runs.push(run),
                None => continue,
            }
        }

        let best = self.best_run(&runs);
        let series = build_series(&runs);

        debug!(
            runs = runs.len(),
            warnings = warnings.len(),
            metrics = series.len(),
            "run log summarized"
        );

        Ok(RunLogSummary {
            runs,
            best,
            series,
            warnings,
        })
    }

    /// Pick the winning run by the primary metric. Runs without the
    /// metric do not compete; ties keep the newer run.
    fn best_run(&self, runs: &[ExperimentRun]) -> Option<ExperimentRun> {
        let mut best: Option<&ExperimentRun> = None;
        for run in runs {
            let Some(value) = run.metrics.get(&self.primary_metric) else {
                continue;
            };
            let better = match best.and_then(|b| b.metrics.get(&self.primary_metric)) {
                None => true,
                Some(current) => {
                    if self.lower_is_better {
                        value < current
                    } else {
                        value > current
                    }
                }
            };
            if better {
                best = Some(run);
            }
        }
        best.cloned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Where each column lives in this particular file.
struct ColumnLayout {
    experiment: usize,
    run_id: usize,
    timestamp: Option<usize>,
    /// (column index, lowercased metric name)
    metrics: Vec<(usize, String)>,
}

impl ColumnLayout {
    fn from_headers(headers: &csv::StringRecord) -> PipelineResult<Self> {
        let mut experiment = None;
        let mut run_id = None;
        let mut timestamp = None;
        let mut metrics = Vec::new();

        for (index, name) in headers.iter().enumerate() {
            let key = name.trim().to_ascii_lowercase().replace(' ', "_");
            match key.as_str() {
                "experiment" => experiment = Some(index),
                "run_id" => run_id = Some(index),
                "timestamp" | "datetime" | "date" => timestamp = Some(index),
                "" => {}
                _ => metrics.push((index, key)),
            }
        }

        let experiment = experiment
            .ok_or_else(|| PipelineError::run_log("missing required column \"Experiment\""))?;
        let run_id =
            run_id.ok_or_else(|| PipelineError::run_log("missing required column \"Run ID\""))?;

        Ok(Self {
            experiment,
            run_id,
            timestamp,
            metrics,
        })
    }

    /// Parse one row. Returns None (after recording a warning) when the
    /// row cannot stand as a run.
    fn parse_row(
        &self,
        record: &csv::StringRecord,
        line: u64,
        warnings: &mut Vec<MalformedRecordWarning>,
    ) -> Option<ExperimentRun> {
        let experiment = record.get(self.experiment).unwrap_or("").to_string();
        let run_id = record.get(self.run_id).unwrap_or("").to_string();
        if experiment.is_empty() || run_id.is_empty() {
            warnings.push(MalformedRecordWarning {
                line,
                reason: "empty experiment or run id".to_string(),
            });
            return None;
        }

        let timestamp = match self.timestamp.and_then(|i| record.get(i)) {
            None | Some("") => None,
            Some(raw) => match parse_timestamp(raw) {
                Some(ts) => Some(ts),
                None => {
                    // Timestamps are metadata; a bad one does not sink
                    // the run.
                    warnings.push(MalformedRecordWarning {
                        line,
                        reason: format!("unparseable timestamp {raw:?}"),
                    });
                    None
                }
            },
        };

        let mut metrics = HashMap::new();
        for (index, name) in &self.metrics {
            let raw = record.get(*index).unwrap_or("");
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    metrics.insert(name.clone(), value);
                }
                _ => {
                    warnings.push(MalformedRecordWarning {
                        line,
                        reason: format!("non-numeric value {raw:?} for metric {name:?}"),
                    });
                    return None;
                }
            }
        }

        Some(ExperimentRun {
            experiment,
            run_id,
            timestamp,
            metrics,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Build per-metric histories. Runs arrive newest first; series run
/// oldest to newest.
fn build_series(runs: &[ExperimentRun]) -> HashMap<String, MetricSeries> {
    let mut by_metric: HashMap<String, Vec<f64>> = HashMap::new();
    for run in runs.iter().rev() {
        for (name, value) in &run.metrics {
            by_metric.entry(name.clone()).or_default().push(*value);
        }
    }

    by_metric
        .into_iter()
        .map(|(name, values)| {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let latest = values[values.len() - 1];
            let trend = if values.len() < 2 {
                Trend::Flat
            } else {
                let previous = values[values.len() - 2];
                if (latest - previous).abs() < 1e-9 {
                    Trend::Flat
                } else if latest > previous {
                    Trend::Rising
                } else {
                    Trend::Falling
                }
            };
            (
                name,
                MetricSeries {
                    values,
                    min,
                    max,
                    latest,
                    trend,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ExperimentAggregator {
        ExperimentAggregator::from_config(&RunLogConfig::default())
    }

    const RUN_LOG: &str = "\
Experiment,Run ID,Timestamp,RMSE,MSE
aqi-lstm,run-c,2026-08-03 10:00:00,0.42,0.1764
aqi-lstm,run-b,2026-08-02 10:00:00,0.55,0.3025
aqi-lstm,run-a,2026-08-01 10:00:00,0.61,0.3721
";

    #[test]
    fn test_runs_are_newest_first() {
        let summary = aggregator().summarize_reader(RUN_LOG.as_bytes()).unwrap();

        assert_eq!(summary.runs.len(), 3);
        assert_eq!(summary.latest().unwrap().run_id, "run-c");
        assert_eq!(summary.runs[2].run_id, "run-a");
        assert!(summary.warnings.is_empty());

        let latest = summary.latest().unwrap();
        assert_eq!(latest.metrics["rmse"], 0.42);
        assert!(latest.timestamp.is_some());
    }

    #[test]
    fn test_best_run_by_primary_metric() {
        let summary = aggregator().summarize_reader(RUN_LOG.as_bytes()).unwrap();
        assert_eq!(summary.best.unwrap().run_id, "run-c");

        // With higher-is-better the worst RMSE would win instead.
        let config = RunLogConfig {
            lower_is_better: false,
            ..RunLogConfig::default()
        };
        let summary = ExperimentAggregator::from_config(&config)
            .summarize_reader(RUN_LOG.as_bytes())
            .unwrap();
        assert_eq!(summary.best.unwrap().run_id, "run-a");
    }

    #[test]
    fn test_series_and_trend() {
        let summary = aggregator().summarize_reader(RUN_LOG.as_bytes()).unwrap();

        let rmse = &summary.series["rmse"];
        assert_eq!(rmse.values, vec![0.61, 0.55, 0.42]);
        assert_eq!(rmse.latest, 0.42);
        assert_eq!(rmse.min, 0.42);
        assert_eq!(rmse.max, 0.61);
        assert_eq!(rmse.trend, Trend::Falling);
    }

    #[test]
    fn test_malformed_row_is_skipped_with_warning() {
        let csv = "\
Experiment,Run ID,RMSE
aqi-lstm,run-b,not-a-number
aqi-lstm,run-a,0.5
";
        let summary = aggregator().summarize_reader(csv.as_bytes()).unwrap();

        assert_eq!(summary.runs.len(), 1);
        assert_eq!(summary.runs[0].run_id, "run-a");
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.warnings[0].line, 2);
        assert!(summary.warnings[0].reason.contains("not-a-number"));
    }

    #[test]
    fn test_empty_run_id_is_skipped_with_warning() {
        let csv = "\
Experiment,Run ID,RMSE
aqi-lstm,,0.5
";
        let summary = aggregator().summarize_reader(csv.as_bytes()).unwrap();
        assert!(summary.runs.is_empty());
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn test_bad_timestamp_keeps_the_run() {
        let csv = "\
Experiment,Run ID,Timestamp,RMSE
aqi-lstm,run-a,yesterday,0.5
";
        let summary = aggregator().summarize_reader(csv.as_bytes()).unwrap();
        assert_eq!(summary.runs.len(), 1);
        assert!(summary.runs[0].timestamp.is_none());
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn test_sparse_metric_cells_are_not_malformed() {
        let csv = "\
Experiment,Run ID,RMSE,MSE
aqi-lstm,run-b,0.5,
aqi-lstm,run-a,,0.36
";
        let summary = aggregator().summarize_reader(csv.as_bytes()).unwrap();

        assert_eq!(summary.runs.len(), 2);
        assert!(summary.warnings.is_empty());
        assert_eq!(summary.series["rmse"].values, vec![0.5]);
        assert_eq!(summary.series["mse"].values, vec![0.36]);
    }

    #[test]
    fn test_missing_required_column_is_an_error() {
        let csv = "Experiment,RMSE\naqi-lstm,0.5\n";
        let err = aggregator().summarize_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::RunLog(_)));
    }

    #[test]
    fn test_missing_file_is_an_empty_summary() {
        let config = RunLogConfig {
            path: "does/not/exist.csv".to_string(),
            ..RunLogConfig::default()
        };
        let summary = ExperimentAggregator::from_config(&config)
            .summarize()
            .unwrap();
        assert!(summary.is_empty());
        assert!(summary.best.is_none());
    }

    #[test]
    fn test_summarize_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        std::fs::write(&path, RUN_LOG).unwrap();

        let config = RunLogConfig {
            path: path.to_string_lossy().into_owned(),
            ..RunLogConfig::default()
        };
        let summary = ExperimentAggregator::from_config(&config)
            .summarize()
            .unwrap();
        assert_eq!(summary.runs.len(), 3);
    }
}
