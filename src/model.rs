//! Text-generation collaborator used by the summary provenance builder.

use std::borrow::Cow;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::error::DrugFactsError;

const MODEL_BASE: &str = "https://api.groq.com/openai/v1";
const MODEL_API: &str = "chat-model";
const MODEL_BASE_ENV: &str = "DRUGFACTS_MODEL_BASE";
const MODEL_KEY_ENV: &str = "DRUGFACTS_MODEL_API_KEY";
const MODEL_KEY_FALLBACK_ENV: &str = "GROQ_API_KEY";
const MODEL_NAME_ENV: &str = "DRUGFACTS_MODEL_NAME";
const DEFAULT_MODEL_NAME: &str = "llama-3.3-70b-versatile";

const SUMMARY_MAX_TOKENS: u32 = 150;
const STRUCTURED_MAX_TOKENS: u32 = 180;

/// Parsed structured reply: a short summary plus the 1-based evidence
/// indices the model claims to have used.
#[derive(Debug, Clone, Default)]
pub struct StructuredSummary {
    pub summary: String,
    pub evidence_indices: Vec<usize>,
}

/// Abstract text-generation collaborator. The provenance cascade treats any
/// error from either call as "no result" and moves on.
#[async_trait]
pub trait SummaryModel: Send + Sync {
    async fn generate_text(&self, system: &str, user: &str) -> Result<String, DrugFactsError>;

    async fn generate_structured_summary(
        &self,
        prompt: &str,
    ) -> Result<StructuredSummary, DrugFactsError>;
}

/// Client for an OpenAI-compatible chat-completions endpoint (Groq by
/// default), configured entirely from the environment.
pub struct ChatModelClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
    model_name: String,
}

impl ChatModelClient {
    pub fn from_env() -> Result<Self, DrugFactsError> {
        let api_key = std::env::var(MODEL_KEY_ENV)
            .or_else(|_| std::env::var(MODEL_KEY_FALLBACK_ENV))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let model_name = std::env::var(MODEL_NAME_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());

        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(MODEL_BASE, MODEL_BASE_ENV),
            api_key,
            model_name,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String, api_key: Option<String>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key,
            model_name: "test-model".to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base.as_ref().trim_end_matches('/'))
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, DrugFactsError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(DrugFactsError::ModelUnavailable {
                env_var: MODEL_KEY_ENV.to_string(),
            });
        };

        let body = json!({
            "model": self.model_name,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.0,
            "max_tokens": max_tokens,
            "top_p": 1.0
        });

        let resp: ChatCompletionResponse = crate::sources::get_json(
            MODEL_API,
            self.client
                .post(self.endpoint())
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(DrugFactsError::Api {
                api: MODEL_API.to_string(),
                message: "Model returned no choices".into(),
            });
        }
        Ok(content)
    }
}

#[async_trait]
impl SummaryModel for ChatModelClient {
    async fn generate_text(&self, system: &str, user: &str) -> Result<String, DrugFactsError> {
        self.chat(system, user, SUMMARY_MAX_TOKENS).await
    }

    async fn generate_structured_summary(
        &self,
        prompt: &str,
    ) -> Result<StructuredSummary, DrugFactsError> {
        let raw = self
            .chat(
                "You are a helpful, concise medical summarization assistant.",
                prompt,
                STRUCTURED_MAX_TOKENS,
            )
            .await?;
        parse_structured_reply(&raw).ok_or_else(|| DrugFactsError::Api {
            api: MODEL_API.to_string(),
            message: "Structured summary reply was not parseable JSON".into(),
        })
    }
}

fn embedded_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

/// Parses the `{"summary": ..., "evidence_indices": [...]}` reply shape.
/// Models often wrap the object in prose or code fences, so a failed direct
/// parse falls back to the first braced span in the text. Non-numeric
/// indices are dropped rather than failing the reply.
pub(crate) fn parse_structured_reply(raw: &str) -> Option<StructuredSummary> {
    let parsed: StructuredReply = serde_json::from_str(raw.trim())
        .ok()
        .or_else(|| {
            let m = embedded_json_regex().find(raw)?;
            serde_json::from_str(m.as_str()).ok()
        })?;

    let evidence_indices = parsed
        .evidence_indices
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
            serde_json::Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        })
        .collect();

    Some(StructuredSummary {
        summary: parsed.summary.trim().to_string(),
        evidence_indices,
    })
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    evidence_indices: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
