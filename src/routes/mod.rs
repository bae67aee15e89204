//! HTTP surface (spec.md §6). Grounded on the teacher's `src/routes.rs`
//! request-guard/handler shape — `ClientIp` is carried over verbatim; route
//! bodies are new, calling into the `Orchestrator` instead of `Db` directly.

mod chat;
mod health;
mod metrics;

pub use chat::chat;
pub use health::health;
pub use metrics::metrics;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": false, "message": "rate limited"}))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": false, "message": "not found"}))
}
