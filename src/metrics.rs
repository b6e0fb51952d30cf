use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use prometheus::{IntCounter, IntGauge};
use tokio::time::Duration;

static METRIC_COUNT: &str = "discovery_count";
static METRIC_ERROR_COUNT: &str = "discovery_error_count";
static METRIC_COLLECTING_COUNT: &str = "discovery_collecting_count";
static METRIC_DURATION_AVG: &str = "discovery_duration_avg";

const DURATION_WINDOW: usize = 5;

/// Process-wide collection counters, shared between the collector and the
/// metrics endpoint.
pub struct Metrics {
    collecting_count: IntCounter,
    error_count: IntGauge,
    durations: Mutex<VecDeque<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub collecting_count: u64,
    pub error_count: i64,
    /// Mean of the last five cycle durations in seconds, rounded to two
    /// decimals. Zero until a cycle has completed.
    pub duration_avg: f64,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            collecting_count: IntCounter::new(
                METRIC_COLLECTING_COUNT,
                "Collection cycles started since the process came up",
            )?,
            error_count: IntGauge::new(
                METRIC_ERROR_COUNT,
                "Sources or files that failed in the current cycle",
            )?,
            durations: Mutex::new(VecDeque::with_capacity(DURATION_WINDOW)),
        })
    }

    /// Counts a new cycle and clears the error count of the previous one.
    pub fn start_cycle(&self) {
        self.error_count.set(0);
        self.collecting_count.inc();
    }

    pub fn record_error(&self) {
        self.error_count.inc();
    }

    pub fn record_duration(&self, duration: Duration) {
        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        if durations.len() == DURATION_WINDOW {
            durations.pop_front();
        }
        durations.push_back(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let duration_avg = {
            let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
            if durations.is_empty() {
                0.0
            } else {
                let mean = durations.iter().sum::<f64>() / durations.len() as f64;
                (mean * 100.0).round() / 100.0
            }
        };

        MetricsSnapshot {
            collecting_count: self.collecting_count.get(),
            error_count: self.error_count.get(),
            duration_avg,
        }
    }
}

impl MetricsSnapshot {
    /// One `<name> <value>` line per metric.
    pub fn render(&self, source_count: usize) -> Vec<String> {
        vec![
            format!("{} {}", METRIC_COUNT, source_count),
            format!("{} {}", METRIC_ERROR_COUNT, self.error_count),
            format!("{} {}", METRIC_COLLECTING_COUNT, self.collecting_count),
            format!("{} {:.2}", METRIC_DURATION_AVG, self.duration_avg),
        ]
    }
}
