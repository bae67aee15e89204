//! `POST /api/chatbot` (spec.md §6.1).

use rocket::serde::json::Json;
use rocket::{post, State};

use crate::error::EngineError;
use crate::models::ChatRequest;
use crate::orchestrator::Orchestrator;
use crate::rate_limit::RateLimited;
use crate::routes::ClientIp;

/// End-user authentication is an explicit non-goal (spec.md §1); the
/// client's address is the pragmatic identity boundary for rate-limiting
/// and session grouping in its absence.
#[post("/api/chatbot", format = "json", data = "<body>")]
pub async fn chat(
    orchestrator: &State<Orchestrator>,
    ip: ClientIp,
    body: Json<ChatRequest>,
) -> Result<RateLimited<crate::models::ChatResponse>, EngineError> {
    let (response, rate_limit_headers) = orchestrator.handle(body.into_inner(), &ip.0, &ip.0).await?;
    Ok(RateLimited::new(response, rate_limit_headers))
}
