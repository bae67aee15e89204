//! orderdesk-engine — the request-handling engine behind the B2B
//! order-taking chat assistant (spec.md §1–§2): input validation, rate
//! limiting, a four-tier cache hierarchy, LLM-backed intent classification
//! and response generation, knowledge retrieval, and order dispatch,
//! composed by an `Orchestrator` state machine and exposed over a small
//! Rocket HTTP surface (spec.md §6).

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod routes;
pub mod service_container;
pub mod session;
pub mod validation;

use std::sync::Arc;

use rocket_cors::CorsOptions;

use config::AppConfig;
use error::EngineError;
use orchestrator::Orchestrator;
use service_container::ServiceContainer;

/// Builds the Rocket instance from environment configuration (spec.md
/// §6.4). Fails fast — before any route is mounted — if a required
/// environment variable is missing.
pub fn rocket() -> Result<rocket::Rocket<rocket::Build>, EngineError> {
    logging::init();
    let config = AppConfig::from_env()?;
    let services = Arc::new(ServiceContainer::build(config)?);
    Ok(rocket_with_services(services))
}

/// Builds the Rocket instance from an already-constructed `ServiceContainer`
/// — the seam integration tests use to inject deterministic fakes for the
/// LLM/embedding clients in place of real network calls (spec.md §8).
pub fn rocket_with_services(services: Arc<ServiceContainer>) -> rocket::Rocket<rocket::Build> {
    let retention_days = services.config.retention_days;
    let retention_sweep_interval_secs = services.config.retention_sweep_interval_secs;
    let retention_sessions = services.sessions.clone();
    let retention_cache = services.cache.clone();

    let orchestrator = Orchestrator::new(services);

    let cors = CorsOptions::default()
        .to_cors()
        .expect("failed to construct CORS fairing");

    rocket::build()
        .manage(orchestrator)
        .attach(cors)
        .attach(rocket::fairing::AdHoc::on_liftoff("Retention Sweeper", move |_rocket| {
            Box::pin(async move {
                // Spawned from an `on_liftoff` fairing so `tokio::spawn`
                // inside `spawn_retention` runs under Rocket's own runtime,
                // same as the teacher's `Message Retention` fairing.
                retention_sessions.spawn_retention(retention_cache, retention_days, retention_sweep_interval_secs);
            })
        }))
        .register("/", rocket::catchers![routes::too_many_requests, routes::not_found])
        .mount("/", rocket::routes![routes::chat, routes::health, routes::metrics])
}
