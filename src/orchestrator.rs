//! Orchestrator — the request state machine of spec.md §4.9, composing
//! every capability `ServiceContainer` builds into one entry point that
//! `routes::chat` calls.
//!
//! ```text
//! received → validated → admitted → session-bound → cache-checked
//!          → {cache-hit → persisted → responded}
//!          | {classified → retrieved → generated → [dispatched] → persisted → cached → responded}
//!          → [error → degraded-responded → persisted]
//! ```

use std::sync::Arc;

use crate::cache::{conversation_context_digest, l1_key};
use crate::dispatch::should_dispatch;
use crate::error::EngineError;
use crate::logging::{log_info, log_warn};
use crate::models::{ChatRequest, ChatResponse, Intent, Language, Role};
use crate::rate_limit::RateLimitHeaders;
use crate::service_container::ServiceContainer;
use crate::validation::InputValidator;

/// L2's similarity floor (spec.md §4.3: "cosine similarity ≥ 0.95").
const L2_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Nominal blended per-token rate used only to surface an estimated-cost
/// gauge in `/metrics` (spec.md §6.3); spec.md names no vendor pricing.
const ESTIMATED_USD_PER_TOKEN: f64 = 0.000002;

pub struct Orchestrator {
    services: Arc<ServiceContainer>,
}

impl Orchestrator {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }

    /// Exposes the underlying capability bundle for the health and metrics
    /// endpoints (spec.md §6.2, §6.3), which sit outside the chat request
    /// path proper.
    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    /// Handles one chat turn end-to-end. Only a `Fatal`/`Validation`/
    /// `RateLimited` error ever escapes this call — every other dependency
    /// failure is absorbed into a degraded-but-successful `ChatResponse`.
    /// Also returns the admitted `RateLimitHeaders` so the route can surface
    /// `X-RateLimit-*` on the success path, not just on deny (spec.md §4.2).
    pub async fn handle(
        &self,
        request: ChatRequest,
        user_id: &str,
        ip: &str,
    ) -> Result<(ChatResponse, RateLimitHeaders), EngineError> {
        let started = std::time::Instant::now();
        let overall = tokio::time::timeout(
            self.services.config.deadlines.overall_request,
            self.handle_inner(request, user_id, ip),
        )
        .await;

        let result = match overall {
            Ok(result) => result,
            Err(_) => {
                log_warn!("orchestrator: overall request deadline exceeded");
                Err(EngineError::UpstreamDegraded {
                    reason: "overall request deadline exceeded".to_string(),
                })
            }
        };

        let status_label = match &result {
            Ok((response, _)) if response.metadata["degraded"].as_bool().unwrap_or(false) => "degraded",
            Ok(_) => "ok",
            Err(e) => match e.category() {
                crate::error::ErrorCategory::Client => "client_error",
                crate::error::ErrorCategory::RateLimit => "rate_limited",
                crate::error::ErrorCategory::Degraded => "degraded",
                crate::error::ErrorCategory::Persistence => "persistence_degraded",
                crate::error::ErrorCategory::Internal => "internal_error",
            },
        };
        self.services
            .metrics
            .record_request(status_label, started.elapsed().as_secs_f64());

        result
    }

    async fn handle_inner(
        &self,
        request: ChatRequest,
        user_id: &str,
        ip: &str,
    ) -> Result<(ChatResponse, RateLimitHeaders), EngineError> {
        // validated
        let validated = InputValidator::validate(&request.message)?;
        if validated.has_sql_injection() {
            return Err(EngineError::Validation {
                kind: crate::error::ValidationErrorKind::BadEncoding,
                detail: "message rejected: sql injection pattern detected".to_string(),
            });
        }

        // admitted
        let rate_limit_headers = match self
            .services
            .rate_limiter
            .check_with_metrics(user_id, ip, Some(&self.services.metrics))
        {
            crate::models::Decision::Admit {
                limit,
                remaining,
                reset_at,
            } => RateLimitHeaders { limit, remaining, reset_at },
            crate::models::Decision::Deny {
                limit_type,
                limit,
                retry_after_secs,
            } => {
                return Err(EngineError::RateLimited {
                    dimension: limit_type,
                    limit,
                    retry_after_secs,
                });
            }
        };

        let language = request.language.unwrap_or_default();
        let outlet_id = request.outlet_name.as_deref();

        // session-bound: honor a caller-supplied session_id that still
        // exists; otherwise fall back to EnsureSession's inactivity-window
        // lookup-or-create (spec.md §4.4).
        let existing = request
            .session_id
            .as_deref()
            .and_then(|id| self.services.sessions.get_session(id).ok().flatten());
        let session_id = match existing {
            Some(session) => session.session_id,
            None => self.services.sessions.ensure_session(user_id, outlet_id, language)?,
        };

        let recent_turns = self.services.sessions.recent_turns(&session_id, 3).unwrap_or_default();
        let normalized = InputValidator::normalize_for_cache_key(&validated.text);
        let context_digest = conversation_context_digest(
            &recent_turns
                .iter()
                .map(|t| (format!("{:?}", t.role), t.content.clone()))
                .collect::<Vec<_>>(),
        );

        // cache-checked: L1 then L2
        let cache_key = l1_key(&normalized, &context_digest, outlet_id, language);
        let (l1_hit, used_fallback) = self.services.cache.l1_get(&cache_key).await;
        if let Some(hit) = l1_hit {
            if let Ok(response) = serde_json::from_value::<ChatResponse>(hit.value) {
                let response = self
                    .finish_from_cache(&session_id, &validated.text, language, response, used_fallback)
                    .await?;
                return Ok((response, rate_limit_headers));
            }
        }

        let message_embedding = self.services.embedding.embed(&validated.text).await.ok();
        if let Some(embedding) = message_embedding.as_ref() {
            if let Some((entry, similarity)) = self.services.cache.l2_get(embedding) {
                if similarity >= L2_SIMILARITY_THRESHOLD {
                    if let Ok(response) = serde_json::from_value::<ChatResponse>(entry.value) {
                        let response = self
                            .finish_from_cache(&session_id, &validated.text, language, response, used_fallback)
                            .await?;
                        return Ok((response, rate_limit_headers));
                    }
                }
            }
        }

        // classified
        let intent_result = self.services.intent_classifier.classify(&validated.text, &recent_turns).await;

        // retrieved (only for policy_question / product_inquiry)
        let chunks = if matches!(intent_result.intent, Intent::PolicyQuestion | Intent::ProductInquiry) {
            tokio::time::timeout(
                self.services.config.deadlines.knowledge_retrieval,
                self.services.knowledge_retriever.retrieve(&validated.text, language),
            )
            .await
            .unwrap_or_else(|_| {
                log_warn!("orchestrator: knowledge retrieval deadline exceeded");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        // generated
        let generated = self
            .services
            .response_generator
            .generate(&validated.text, intent_result.intent, &chunks, &recent_turns, language)
            .await;

        if generated.prompt_tokens > 0 || generated.completion_tokens > 0 {
            let cost = (generated.prompt_tokens + generated.completion_tokens) as f64 * ESTIMATED_USD_PER_TOKEN;
            self.services
                .metrics
                .record_llm_tokens(generated.prompt_tokens, generated.completion_tokens, cost);
        }

        // dispatched
        let (order_id, agent_timeline, final_text) = if should_dispatch(
            intent_result.intent.as_str(),
            intent_result.confidence,
            &intent_result.entities,
        ) {
            let outcome = self
                .services
                .dispatcher
                .dispatch(&validated.text, &intent_result.entities, outlet_id);
            if outcome.aborted {
                (None, Some(outcome.timeline), outcome.user_message.unwrap_or(generated.text.clone()))
            } else {
                (outcome.order_id, Some(outcome.timeline), generated.text.clone())
            }
        } else {
            (None, None, generated.text.clone())
        };

        // persisted: user turn, then assistant turn
        let persistence_degraded = self
            .services
            .sessions
            .append_turn(&session_id, Role::User, &validated.text, language, None, None)
            .is_err();
        let persistence_degraded = self
            .services
            .sessions
            .append_turn(
                &session_id,
                Role::Assistant,
                &final_text,
                language,
                Some(intent_result.intent.as_str()),
                Some(intent_result.confidence),
            )
            .is_err()
            || persistence_degraded;

        if persistence_degraded {
            self.services.metrics.record_persistence_failure();
        }

        let response = ChatResponse {
            success: true,
            session_id: session_id.clone(),
            message: final_text,
            intent: intent_result.intent.as_str().to_string(),
            confidence: intent_result.confidence,
            language: language.as_str().to_string(),
            citations: generated.citations.clone(),
            mode: request.mode.unwrap_or_else(|| "chat".to_string()),
            metadata: serde_json::json!({
                "degraded": intent_result.degraded || generated.degraded,
                "requires_escalation": generated.requires_escalation,
                "persistence_degraded": persistence_degraded,
                "cache_backend": if used_fallback { "fallback" } else { "remote" },
            }),
            agent_timeline,
            order_id,
        };

        // cached: L1 write-back (L2 write-back alongside, if we have an embedding)
        if !intent_result.degraded && !generated.degraded {
            if let Ok(value) = serde_json::to_value(&response) {
                let cost = generated.prompt_tokens + generated.completion_tokens;
                self.services.cache.l1_put(&cache_key, value.clone(), cost).await;
                if let Some(embedding) = message_embedding {
                    self.services.cache.l2_put(embedding, value, cost);
                }
            }
        }

        Ok((response, rate_limit_headers))
    }

    /// Shared tail for both cache-hit paths: still persists the turn (the
    /// user's repeat question and the cached answer) before responding —
    /// spec.md §4.9's `cache-hit → persisted → responded` transition.
    async fn finish_from_cache(
        &self,
        session_id: &str,
        message: &str,
        language: Language,
        mut cached: ChatResponse,
        used_fallback: bool,
    ) -> Result<ChatResponse, EngineError> {
        log_info!(session_id = %session_id, "orchestrator: served from cache");
        let persistence_degraded = self
            .services
            .sessions
            .append_turn(session_id, Role::User, message, language, None, None)
            .is_err();
        let persistence_degraded = self
            .services
            .sessions
            .append_turn(
                session_id,
                Role::Assistant,
                &cached.message,
                language,
                Some(cached.intent.as_str()),
                Some(cached.confidence),
            )
            .is_err()
            || persistence_degraded;

        if persistence_degraded {
            self.services.metrics.record_persistence_failure();
        }

        cached.session_id = session_id.to_string();
        if let Some(obj) = cached.metadata.as_object_mut() {
            obj.insert("from_cache".to_string(), serde_json::json!(true));
            obj.insert("persistence_degraded".to_string(), serde_json::json!(persistence_degraded));
            if used_fallback {
                obj.insert("cache_backend".to_string(), serde_json::json!("fallback"));
            }
        }
        Ok(cached)
    }
}
