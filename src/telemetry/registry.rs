//! Global metrics registry and metric handle definitions.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, GaugeVec, Opts, Registry,
};

use std::sync::LazyLock;

/// Global metrics instance. Initialized once, accessed from any call site.
static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// All Prometheus metric handles for the Chadburn process.
///
/// Access via `Metrics::global()`. Metric handles are cheap to clone (Arc
/// internally) so call sites can grab references without threading state.
pub struct Metrics {
    pub(crate) registry: Registry,

    /// Active job count registered on the scheduler.
    pub scheduler_jobs: IntGauge,

    /// Total number of failed scheduler registrations.
    pub register_errors_total: IntCounter,

    /// Total number of completed job runs. Label: job.
    pub runs_total: IntCounterVec,

    /// Total number of completed job runs that resulted in an error.
    /// Label: job.
    pub run_errors_total: IntCounterVec,

    /// Unix timestamp of the last completed run. Label: job.
    pub run_latest_timestamp: GaugeVec,

    /// Duration of all runs in seconds. Label: job.
    pub run_duration_seconds: HistogramVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let scheduler_jobs = IntGauge::new(
            "chadburn_scheduler_jobs",
            "Active job count registered on the scheduler",
        )
        .expect("hardcoded metric descriptor");

        let register_errors_total = IntCounter::new(
            "chadburn_scheduler_register_errors_total",
            "Total number of failed scheduler registrations",
        )
        .expect("hardcoded metric descriptor");

        let runs_total = IntCounterVec::new(
            Opts::new("chadburn_run_total", "Total number of completed job runs"),
            &["job"],
        )
        .expect("hardcoded metric descriptor");

        let run_errors_total = IntCounterVec::new(
            Opts::new(
                "chadburn_run_errors_total",
                "Total number of completed job runs that resulted in an error",
            ),
            &["job"],
        )
        .expect("hardcoded metric descriptor");

        let run_latest_timestamp = GaugeVec::new(
            Opts::new(
                "chadburn_run_latest_timestamp",
                "Last time a job run completed",
            ),
            &["job"],
        )
        .expect("hardcoded metric descriptor");

        let run_duration_seconds = HistogramVec::new(
            HistogramOpts::new("chadburn_run_duration_seconds", "Duration of all runs"),
            &["job"],
        )
        .expect("hardcoded metric descriptor");

        registry
            .register(Box::new(scheduler_jobs.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(register_errors_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(runs_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(run_errors_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(run_latest_timestamp.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(run_duration_seconds.clone()))
            .expect("hardcoded metric");

        Self {
            registry,
            scheduler_jobs,
            register_errors_total,
            runs_total,
            run_errors_total,
            run_latest_timestamp,
            run_duration_seconds,
        }
    }

    /// Access the global metrics instance.
    pub fn global() -> &'static Self {
        &METRICS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_counters_are_labelled_by_job() {
        let metrics = Metrics::global();
        let before = metrics.runs_total.with_label_values(&["metric-test"]).get();
        metrics.runs_total.with_label_values(&["metric-test"]).inc();
        let after = metrics.runs_total.with_label_values(&["metric-test"]).get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn registry_encodes_to_text() {
        use prometheus::Encoder as _;

        let metrics = Metrics::global();
        metrics.scheduler_jobs.set(3);

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("chadburn_scheduler_jobs"));
    }
}
