//! `GET /metrics` (spec.md §6.3) — Prometheus text exposition via
//! `metrics-exporter-prometheus`'s `PrometheusHandle::render`.

use rocket::{get, State};

use crate::orchestrator::Orchestrator;

#[get("/metrics")]
pub fn metrics(orchestrator: &State<Orchestrator>) -> String {
    orchestrator.services().metrics.render()
}
