//! Core data types shared across the request-handling engine (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
    Ms,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
            Language::Ms => "ms",
        }
    }
}

/// A user utterance arriving at the chat endpoint (spec.md §3 Message).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub outlet_name: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub policy_id: String,
    pub policy_name: String,
    pub section: String,
    pub relevance_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
    pub intent: String,
    pub confidence: f64,
    pub language: String,
    pub citations: Vec<Citation>,
    pub mode: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_timeline: Option<Vec<AgentStageRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

/// A conversation (spec.md §3 Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlet_id: Option<String>,
    pub language: Language,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub message_count: i64,
    pub intents: HashMap<String, IntentAggregate>,
    pub context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentAggregate {
    pub count: i64,
    pub confidence_sum: f64,
}

impl IntentAggregate {
    pub fn average_confidence(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.confidence_sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A persisted conversational turn (spec.md §3 StoredMessage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub pii_scrubbed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The seven-way intent taxonomy of spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    OrderPlacement,
    OrderStatus,
    ProductInquiry,
    PolicyQuestion,
    Complaint,
    Greeting,
    GeneralQuery,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::OrderPlacement => "order_placement",
            Intent::OrderStatus => "order_status",
            Intent::ProductInquiry => "product_inquiry",
            Intent::PolicyQuestion => "policy_question",
            Intent::Complaint => "complaint",
            Intent::Greeting => "greeting",
            Intent::GeneralQuery => "general_query",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "order_placement" => Intent::OrderPlacement,
            "order_status" => Intent::OrderStatus,
            "product_inquiry" => Intent::ProductInquiry,
            "policy_question" => Intent::PolicyQuestion,
            "complaint" => Intent::Complaint,
            "greeting" => Intent::Greeting,
            "general_query" => Intent::GeneralQuery,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub order_ids: Vec<String>,
    #[serde(default)]
    pub product_names: Vec<String>,
    #[serde(default)]
    pub outlet_names: Vec<String>,
    #[serde(default)]
    pub quantities: Vec<f64>,
}

/// Result of intent classification (spec.md §3 IntentResult / §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_intent: Option<Intent>,
    pub entities: ExtractedEntities,
    /// True when the LLM call failed or returned malformed JSON and the
    /// classifier fell back to `general_query` with confidence 0.0.
    #[serde(default)]
    pub degraded: bool,
}

/// A retrieved policy/FAQ chunk (spec.md §3 KnowledgeChunk / §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub policy_id: String,
    pub policy_name: String,
    pub section: String,
    pub content: String,
    /// Cosine similarity, surfaced in [0, 1] per spec.md §3.
    pub relevance_score: f64,
    pub language: Language,
}

/// A generated response plus provenance (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct GeneratedResponse {
    pub text: String,
    pub citations: Vec<Citation>,
    pub degraded: bool,
    pub requires_escalation: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One stage of the order-fulfillment agent timeline (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStageRecord {
    pub stage_name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub summary: String,
    pub details: serde_json::Value,
}

pub type AgentTimeline = Vec<AgentStageRecord>;

/// A cache entry, shared across all four layers (spec.md §3 CacheEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub generation_cost_tokens: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Admission decision from the rate limiter (spec.md §4.2 Decision).
///
/// Both variants carry the numeric limit of the dimension they were decided
/// on, so callers can surface `X-RateLimit-Limit` on every response, not
/// just denies (spec.md §4.2 "response headers surfaced to §6").
#[derive(Debug, Clone)]
pub enum Decision {
    Admit {
        limit: u32,
        remaining: u32,
        reset_at: chrono::DateTime<chrono::Utc>,
    },
    Deny {
        limit_type: String,
        limit: u32,
        retry_after_secs: u64,
    },
}
