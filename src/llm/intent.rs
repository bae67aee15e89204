//! IntentClassifier (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{l3_key, CacheHierarchy};
use crate::llm::provider::{CompletionRequest, LlmProvider};
use crate::llm::retry::RetryExecutor;
use crate::logging::log_warn;
use crate::models::{ExtractedEntities, Intent, IntentResult, Language, StoredMessage};
use crate::validation::InputValidator;

const TAXONOMY_PROMPT: &str = r#"Classify the user's message into exactly one of:
- order_placement: the user wants to place or modify an order for products.
  e.g. "I'd like to order 50 cases of sparkling water", "add 10 more units to my last order"
- order_status: the user is asking about an existing order's status.
  e.g. "where is order 4821", "has my delivery shipped yet"
- product_inquiry: the user asks about a specific product (price, availability, specs).
  e.g. "do you carry the 1L glass bottles", "what's the unit price on SKU-2201"
- policy_question: the user asks about a general policy, including bulk pricing.
  e.g. "what's your return policy", "do you offer volume discounts over 1000 units"
- complaint: the user reports a problem or expresses dissatisfaction.
  e.g. "my last shipment arrived damaged", "this is the third late delivery this month"
- greeting: a conversational opener with no business content.
  e.g. "hello", "good morning"
- general_query: anything else.

Disambiguation: a specific-product question is product_inquiry, not policy_question.
A general pricing/policy question, including bulk pricing, is policy_question.
Identity-of-business signals combined with supply language in later turns indicate
order_placement.

Respond with JSON: {"intent": string, "confidence": number 0-1, "reasoning": string,
"secondary_intent": string | null, "entities": {"order_ids": [string], "product_names": [string],
"outlet_names": [string], "quantities": [number]}}"#;

pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
    retry: RetryExecutor,
    model: String,
    cache: Arc<CacheHierarchy>,
    deadline: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, cache: Arc<CacheHierarchy>, deadline: Duration) -> Self {
        Self {
            llm,
            retry: RetryExecutor::new("intent_classifier", Default::default()),
            model,
            cache,
            deadline,
        }
    }

    pub async fn classify(&self, message: &str, recent_turns: &[StoredMessage]) -> IntentResult {
        let cache_key = l3_key(&InputValidator::normalize_for_cache_key(message));
        if let Some(entry) = self.cache.l3_get(&cache_key).await {
            if let Ok(cached) = serde_json::from_value::<IntentResult>(entry.value) {
                return cached;
            }
        }

        let result = self.classify_uncached(message, recent_turns).await;
        if !result.degraded {
            if let Ok(value) = serde_json::to_value(&result) {
                self.cache.l3_put(&cache_key, value, result_tokens(&result)).await;
            }
        }
        result
    }

    async fn classify_uncached(&self, message: &str, recent_turns: &[StoredMessage]) -> IntentResult {
        let history = recent_turns
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|t| format!("{:?}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!("Recent turns:\n{history}\n\nUser message: {message}");

        let outcome = tokio::time::timeout(
            self.deadline,
            self.retry.run(|| {
                let request = CompletionRequest {
                    system_prompt: TAXONOMY_PROMPT.to_string(),
                    user_prompt: user_prompt.clone(),
                    model: self.model.clone(),
                    temperature: 0.0,
                    json_schema: Some(serde_json::json!({"type": "json_object"})),
                };
                self.llm.complete(request)
            }),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => parse_intent_response(&response.text).unwrap_or_else(|| {
                log_warn!("intent classifier: malformed JSON from LLM, falling back to general_query");
                degraded_fallback()
            }),
            Ok(Err(e)) => {
                log_warn!(error = %e, "intent classifier: LLM call failed, falling back to general_query");
                degraded_fallback()
            }
            Err(_) => {
                log_warn!("intent classifier: deadline exceeded, falling back to general_query");
                degraded_fallback()
            }
        }
    }
}

fn result_tokens(result: &IntentResult) -> u64 {
    (result.reasoning.len() / 4) as u64
}

fn degraded_fallback() -> IntentResult {
    IntentResult {
        intent: Intent::GeneralQuery,
        confidence: 0.0,
        reasoning: "classification unavailable".to_string(),
        secondary_intent: None,
        entities: ExtractedEntities::default(),
        degraded: true,
    }
}

fn parse_intent_response(text: &str) -> Option<IntentResult> {
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    let intent = Intent::parse(parsed["intent"].as_str()?)?;
    let confidence = parsed["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    let reasoning = parsed["reasoning"].as_str().unwrap_or("").to_string();
    let secondary_intent = parsed["secondary_intent"].as_str().and_then(Intent::parse);
    let entities = serde_json::from_value(parsed["entities"].clone()).unwrap_or_default();

    Some(IntentResult {
        intent,
        confidence,
        reasoning,
        secondary_intent,
        entities,
        degraded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_intent_json() {
        let text = r#"{"intent": "order_placement", "confidence": 0.92, "reasoning": "wants to order",
            "secondary_intent": null, "entities": {"order_ids": [], "product_names": ["sparkling water"],
            "outlet_names": [], "quantities": [50.0]}}"#;
        let result = parse_intent_response(text).unwrap();
        assert_eq!(result.intent, Intent::OrderPlacement);
        assert_eq!(result.confidence, 0.92);
        assert_eq!(result.entities.product_names, vec!["sparkling water"]);
    }

    #[test]
    fn malformed_json_returns_none() {
        assert!(parse_intent_response("not json").is_none());
    }

    #[test]
    fn unknown_intent_name_returns_none() {
        let text = r#"{"intent": "not_a_real_intent", "confidence": 0.5, "reasoning": "", "secondary_intent": null, "entities": {}}"#;
        assert!(parse_intent_response(text).is_none());
    }

    #[test]
    fn degraded_fallback_has_zero_confidence_and_general_query() {
        let fallback = degraded_fallback();
        assert_eq!(fallback.intent, Intent::GeneralQuery);
        assert_eq!(fallback.confidence, 0.0);
        assert!(fallback.degraded);
    }
}
