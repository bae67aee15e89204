//! LLM adapter layer: provider abstractions plus the three business-logic
//! callers that sit on top of them (spec.md §4.5–§4.7). Grounded on
//! darval-multi-llm's `core_types::provider`/`internals::retry` shapes.

pub mod generation;
pub mod intent;
pub mod knowledge;
pub mod provider;
pub mod retry;

pub use generation::ResponseGenerator;
pub use intent::IntentClassifier;
pub use knowledge::KnowledgeRetriever;
pub use provider::{EmbeddingClient, HttpEmbeddingClient, HttpLlmProvider, LlmProvider, LocalVectorStoreClient, VectorStoreClient};
