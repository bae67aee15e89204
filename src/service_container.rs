//! ServiceContainer (SPEC_FULL.md §4.10) — the redesign spec.md §9 asks
//! for: a set of capability objects constructed once at startup and handed
//! to the Orchestrator, replacing the teacher's per-type `.manage(...)`
//! globals with one composed bundle. LLM/embedding/vector-store clients are
//! built behind `LazySingleton`s so the first request to need one pays
//! init cost and every concurrent/later caller reuses it (spec.md §5, §9).

use std::sync::Arc;

use crate::cache::{CacheBackend, CacheHierarchy, RemoteKvBackend};
use crate::config::AppConfig;
use crate::dispatch::OrderDispatcher;
use crate::error::EngineError;
use crate::llm::provider::{EmbeddingClient, HttpEmbeddingClient, HttpLlmProvider, LazySingleton, LlmProvider, VectorStoreClient};
use crate::llm::{IntentClassifier, KnowledgeRetriever, ResponseGenerator};
use crate::metrics::MetricsRegistry;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;

pub struct ServiceContainer {
    pub config: AppConfig,
    pub rate_limiter: RateLimiter,
    pub sessions: Arc<SessionStore>,
    pub cache: Arc<CacheHierarchy>,
    pub metrics: Arc<MetricsRegistry>,
    pub intent_classifier: IntentClassifier,
    pub knowledge_retriever: KnowledgeRetriever,
    pub response_generator: ResponseGenerator,
    pub dispatcher: OrderDispatcher,

    /// Shared with `KnowledgeRetriever`; the orchestrator also embeds the
    /// raw message directly against this client for the L2 paraphrase-cache
    /// lookup (spec.md §4.3), which operates on the message, not a query.
    pub embedding: Arc<dyn EmbeddingClient>,

    /// Shared with `KnowledgeRetriever`: lazily built on the first
    /// `policy_question`/`product_inquiry` request that needs it, under a
    /// one-shot lock (spec.md §5, §9 — the named `'RustBindingsAPI'`
    /// concurrent-init bug). The LLM and embedding clients, by contrast,
    /// are thin HTTP wrappers with no fallible native-binding init, so
    /// `build()` constructs those eagerly.
    vector_store_cell: Arc<LazySingleton<Arc<dyn VectorStoreClient>>>,
}

impl ServiceContainer {
    pub fn build(config: AppConfig) -> Result<Self, EngineError> {
        let llm: Arc<dyn LlmProvider> =
            Arc::new(HttpLlmProvider::new(config.llm_base_url.clone(), config.llm_api_key.clone()));
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(HttpEmbeddingClient::new(
            config.embedding_base_url.clone(),
            config.llm_api_key.clone(),
        ));
        Self::build_with_clients(config, llm, embedding)
    }

    /// Same as `build`, but with the LLM/embedding clients supplied by the
    /// caller rather than constructed as `Http*` wrappers. Used by
    /// integration tests to swap in deterministic fakes without any
    /// network access (spec.md §8's scenarios are all reachable this way).
    pub fn build_with_clients(
        config: AppConfig,
        llm: Arc<dyn LlmProvider>,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, EngineError> {
        let metrics = Arc::new(MetricsRegistry::install());
        let rate_limiter = RateLimiter::new(&config.rate_limits);
        let sessions = Arc::new(SessionStore::new(
            &config.database_url,
            config.session_inactivity_minutes,
        )?);
        // `CACHE_URL` is optional (spec.md §6.4); when absent, every layer
        // runs on its in-process fallback only (spec.md §8 scenario 5).
        let remote_cache: Option<Arc<dyn CacheBackend>> = config
            .cache_url
            .clone()
            .map(|url| Arc::new(RemoteKvBackend::new(url)) as Arc<dyn CacheBackend>);
        let cache = Arc::new(CacheHierarchy::new(config.cache_ttls.clone(), remote_cache, metrics.clone()));
        let vector_store_cell: Arc<LazySingleton<Arc<dyn VectorStoreClient>>> = Arc::new(LazySingleton::new());

        let intent_classifier = IntentClassifier::new(
            llm.clone(),
            config.llm_model_intent.clone(),
            cache.clone(),
            config.deadlines.intent_classification,
        );
        let knowledge_retriever = KnowledgeRetriever::new(
            embedding.clone(),
            vector_store_cell.clone(),
            config.vector_store_path.clone(),
            cache.clone(),
        );
        let response_generator = ResponseGenerator::new(
            llm,
            config.llm_model_generation.clone(),
            config.deadlines.response_generation,
        );

        Ok(Self {
            config,
            rate_limiter,
            sessions,
            cache,
            metrics,
            intent_classifier,
            knowledge_retriever,
            response_generator,
            dispatcher: OrderDispatcher::new(),
            vector_store_cell,
            embedding,
        })
    }

    /// `true` once the first `policy_question`/`product_inquiry` request
    /// has initialized the vector store client; used by the health endpoint
    /// to report `vector_store: ok` only once it is actually live.
    pub fn vector_store_initialized(&self) -> bool {
        self.vector_store_cell.get_if_init().is_some()
    }
}
