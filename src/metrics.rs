//! Metrics aggregation backing spec.md §6.3's `/metrics` endpoint.
//!
//! Uses the `metrics` facade with a Prometheus recorder/exporter, the same
//! pairing used across the reference pack for exactly this purpose. The
//! exporter's `PrometheusHandle` is installed once at startup and held as
//! managed state; `GET /metrics` renders its text exposition directly.

use once_cell::sync::OnceCell;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::cache::CacheLayer;
use crate::rate_limit::RateLimitDimension;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Installs the global recorder exactly once per process; any later
    /// call (a second managed-state build, or a test module that also needs
    /// a registry) reuses the same handle rather than re-registering a
    /// recorder with the `metrics` facade, which only accepts one.
    pub fn install() -> Self {
        let handle = HANDLE
            .get_or_init(|| {
                let builder = PrometheusBuilder::new().set_buckets_for_metric(
                    metrics_exporter_prometheus::Matcher::Full("request_latency_seconds".to_string()),
                    &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0, 60.0, 90.0],
                );
                let builder = match builder {
                    Ok(b) => b,
                    Err(_) => PrometheusBuilder::new(),
                };
                builder
                    .install_recorder()
                    .expect("failed to install Prometheus recorder")
            })
            .clone();
        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn record_request(&self, status_label: &str, seconds: f64) {
        counter!("requests_total", "status" => status_label.to_string()).increment(1);
        histogram!("request_latency_seconds").record(seconds);
    }

    pub fn record_cache_hit(&self, layer: CacheLayer) {
        counter!("cache_hit_total", "layer" => layer.as_str()).increment(1);
    }

    pub fn record_cache_miss(&self, layer: CacheLayer) {
        counter!("cache_miss_total", "layer" => layer.as_str()).increment(1);
    }

    pub fn record_rate_limit_deny(&self, dimension: RateLimitDimension) {
        counter!("rate_limit_deny_total", "dimension" => dimension.to_string()).increment(1);
    }

    pub fn record_llm_tokens(&self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) {
        counter!("llm_tokens_total", "kind" => "prompt").increment(prompt_tokens);
        counter!("llm_tokens_total", "kind" => "completion").increment(completion_tokens);
        gauge!("llm_estimated_cost_usd_total").increment(cost_usd);
    }

    pub fn record_persistence_failure(&self) {
        counter!("persistence_failure_total").increment(1);
    }
}
