//! ResponseGenerator (spec.md §4.7).

use std::sync::Arc;
use std::time::Duration;

use crate::llm::provider::{CompletionRequest, LlmProvider};
use crate::llm::retry::RetryExecutor;
use crate::logging::log_warn;
use crate::models::{Citation, GeneratedResponse, Intent, KnowledgeChunk, Language, StoredMessage};

const PERSONA: &str = "You are a precise, courteous assistant for a B2B order-taking \
chat service. Answer only in the requested language. Ground factual claims in the \
supplied reference chunks when present and cite them; never invent policy details.";

pub struct ResponseGenerator {
    llm: Arc<dyn LlmProvider>,
    retry: RetryExecutor,
    model: String,
    deadline: Duration,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, deadline: Duration) -> Self {
        Self {
            llm,
            retry: RetryExecutor::new("response_generator", Default::default()),
            model,
            deadline,
        }
    }

    pub async fn generate(
        &self,
        message: &str,
        intent: Intent,
        chunks: &[KnowledgeChunk],
        recent_turns: &[StoredMessage],
        language: Language,
    ) -> GeneratedResponse {
        let task_directive = task_directive_for(intent);
        let history = recent_turns
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|t| format!("{:?}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let chunk_block = if chunks.is_empty() {
            "No reference chunks retrieved.".to_string()
        } else {
            chunks
                .iter()
                .take(3)
                .map(|c| format!("[{} / {}] {}", c.policy_name, c.section, c.content))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let user_prompt = format!(
            "Respond in language: {}\n\n{task_directive}\n\nReference chunks:\n{chunk_block}\n\n\
             Recent turns:\n{history}\n\nUser message: {message}",
            language.as_str()
        );

        let outcome = tokio::time::timeout(
            self.deadline,
            self.retry.run(|| {
                let request = CompletionRequest {
                    system_prompt: PERSONA.to_string(),
                    user_prompt: user_prompt.clone(),
                    model: self.model.clone(),
                    temperature: 0.3,
                    json_schema: None,
                };
                self.llm.complete(request)
            }),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => GeneratedResponse {
                text: response.text,
                citations: citations_for(chunks),
                degraded: false,
                requires_escalation: false,
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
            },
            Ok(Err(e)) => {
                log_warn!(error = %e, "response generator: LLM call failed, returning apology");
                degraded_response(intent)
            }
            Err(_) => {
                log_warn!("response generator: deadline exceeded, returning apology");
                degraded_response(intent)
            }
        }
    }
}

fn task_directive_for(intent: Intent) -> &'static str {
    match intent {
        Intent::OrderPlacement => "Task: confirm understanding of the order and the items requested.",
        Intent::OrderStatus => "Task: answer the order-status question; ask for an order ID if missing.",
        Intent::ProductInquiry => "Task: answer the specific-product question grounded in the chunks.",
        Intent::PolicyQuestion => "Task: answer the policy question grounded in the chunks.",
        Intent::Complaint => "Task: acknowledge the complaint empathetically and note it will be escalated.",
        Intent::Greeting => "Task: greet the user briefly and ask how you can help.",
        Intent::GeneralQuery => "Task: answer helpfully; if out of scope, say so plainly.",
    }
}

fn citations_for(chunks: &[KnowledgeChunk]) -> Vec<Citation> {
    chunks
        .iter()
        .take(3)
        .map(|c| Citation {
            policy_id: c.policy_id.clone(),
            policy_name: c.policy_name.clone(),
            section: c.section.clone(),
            relevance_score: c.relevance_score,
            content: Some(c.content.clone()),
        })
        .collect()
}

fn degraded_response(intent: Intent) -> GeneratedResponse {
    GeneratedResponse {
        text: "We're having trouble reaching one of our services right now; here's our best \
               answer for the moment — please try again shortly if this doesn't fully address \
               your question."
            .to_string(),
        citations: Vec::new(),
        degraded: true,
        requires_escalation: matches!(intent, Intent::Complaint),
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}
