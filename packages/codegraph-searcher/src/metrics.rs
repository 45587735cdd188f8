//! Prometheus metrics for the searcher cache

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

#[derive(Clone)]
pub struct SearcherCacheMetrics {
    pub managers_opened: IntCounter,
    pub managers: IntGauge,
    pub fetches: IntCounter,
    pub fetch_failures: IntCounter,
    pub refreshes: IntCounter,
    pub release_failures: IntCounter,
    pub open_sessions: IntGauge,
}

impl SearcherCacheMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            managers_opened: register_int_counter_with_registry!(
                Opts::new("searcher_managers_opened_total", "Index managers opened"),
                registry
            )?,
            managers: register_int_gauge_with_registry!(
                Opts::new("searcher_managers", "Index managers currently registered"),
                registry
            )?,
            fetches: register_int_counter_with_registry!(
                Opts::new("searcher_fetches_total", "Sessions requested (single + federated)"),
                registry
            )?,
            fetch_failures: register_int_counter_with_registry!(
                Opts::new("searcher_fetch_failures_total", "Fetches that returned no session"),
                registry
            )?,
            refreshes: register_int_counter_with_registry!(
                Opts::new(
                    "searcher_refreshes_total",
                    "Refreshes that moved a manager to a new generation"
                ),
                registry
            )?,
            release_failures: register_int_counter_with_registry!(
                Opts::new("searcher_release_failures_total", "View releases that reported an error"),
                registry
            )?,
            open_sessions: register_int_gauge_with_registry!(
                Opts::new("searcher_open_sessions", "Sessions fetched and not yet closed"),
                registry
            )?,
        })
    }

    pub fn fetch_failure_rate(&self) -> f64 {
        let total = self.fetches.get() as f64;
        if total > 0.0 {
            self.fetch_failures.get() as f64 / total
        } else {
            0.0
        }
    }
}
