//! Prometheus metrics for the run pipeline

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Outcome label recorded on `coderipper_runs_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Fail,
    RateLimited,
    BadRequest,
    Error,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Fail => "fail",
            RunStatus::RateLimited => "rate_limited",
            RunStatus::BadRequest => "bad_request",
            RunStatus::Error => "error",
            RunStatus::Timeout => "timeout",
        }
    }
}

/// Run counters and latency histogram, shared across handlers.
///
/// All metrics use interior mutability and are safe to share across tasks.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    runs_total: CounterVec,
    run_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = CounterVec::new(
            Opts::new("runs_total", "Number of run requests").namespace("coderipper"),
            &["mode", "status"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let run_duration = HistogramVec::new(
            HistogramOpts::new("run_duration_seconds", "Run duration seconds")
                .namespace("coderipper"),
            &["mode"],
        )?;
        registry.register(Box::new(run_duration.clone()))?;

        Ok(Self { registry, runs_total, run_duration })
    }

    pub fn record_run(&self, mode: &str, status: RunStatus) {
        self.runs_total
            .with_label_values(&[mode, status.as_str()])
            .inc();
    }

    pub fn observe_duration(&self, mode: &str, seconds: f64) {
        self.run_duration.with_label_values(&[mode]).observe(seconds);
    }

    /// Encode the registry in Prometheus text format for scraping
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("failed to encode metrics: {err}");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_appear_in_rendered_output() {
        let metrics = Metrics::new().unwrap();
        metrics.record_run("native", RunStatus::Ok);
        metrics.record_run("native", RunStatus::Timeout);
        metrics.observe_duration("native", 0.25);

        let text = metrics.render();
        assert!(text.contains("coderipper_runs_total"));
        assert!(text.contains("status=\"ok\""));
        assert!(text.contains("status=\"timeout\""));
        assert!(text.contains("coderipper_run_duration_seconds"));
    }

    #[test]
    fn status_labels_are_the_closed_set() {
        let labels: Vec<&str> = [
            RunStatus::Ok,
            RunStatus::Fail,
            RunStatus::RateLimited,
            RunStatus::BadRequest,
            RunStatus::Error,
            RunStatus::Timeout,
        ]
        .iter()
        .map(RunStatus::as_str)
        .collect();
        assert_eq!(labels, ["ok", "fail", "rate_limited", "bad_request", "error", "timeout"]);
    }
}
