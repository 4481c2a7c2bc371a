//! External conversational agent seam. The chat pipeline only sees
//! [`Agent::reply`]: one instruction, a bounded history, one textual reply.
//! [`OpenAiAgent`] speaks to any OpenAI-compatible chat-completions endpoint
//! and resolves tool calls through the [`Toolset`] before returning.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::AgentConfig;
use crate::store::Role;
use crate::tools::Toolset;

pub const INSTRUCTIONS: &str = "\
You are an AI assistant that helps manage student records. You can perform the following actions:
- Add a new student record.
- Read existing student records.
- Update student records.
- Delete student records.
For student-related info, use student tools.
For general campus-related questions, use campus_faq.
Also, if the user shares their name or profession, remember it for future context.";

const MAX_TOOL_ROUNDS: usize = 5;

#[derive(Clone, Debug)]
pub struct AgentMessage {
    pub role: Role,
    pub content: String,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a single reply given the immediate instruction and the
    /// chronological history window. The only suspension point of a chat
    /// turn; no timeout is enforced here.
    async fn reply(&self, instruction: &str, history: &[AgentMessage]) -> Result<String>;
}

pub struct OpenAiAgent {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    tools: Toolset,
}

impl OpenAiAgent {
    pub fn new(cfg: &AgentConfig, tools: Toolset) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            tools,
        }
    }

    async fn completion(&self, messages: &[Value]) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "tools": self.tools.definitions(),
            "temperature": 0.7,
            "max_tokens": 1000,
        });
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("agent request failed")?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("agent HTTP {}: {}", status.as_u16(), text));
        }
        let parsed: Value = serde_json::from_str(&text).context("agent returned non-JSON body")?;
        parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .ok_or_else(|| anyhow!("agent reply missing choices"))
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    async fn reply(&self, instruction: &str, history: &[AgentMessage]) -> Result<String> {
        let mut messages = vec![json!({"role": "system", "content": INSTRUCTIONS})];
        for msg in history {
            messages.push(json!({"role": msg.role, "content": msg.content}));
        }
        messages.push(json!({"role": "user", "content": instruction}));

        for _ in 0..MAX_TOOL_ROUNDS {
            let message = self.completion(&messages).await?;
            let calls = message
                .get("tool_calls")
                .and_then(|c| c.as_array())
                .filter(|c| !c.is_empty())
                .cloned();
            let Some(calls) = calls else {
                let content = message
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Ok(content);
            };
            messages.push(message);
            for call in &calls {
                let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let args: Value = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| json!({}));
                tracing::debug!(tool = name, "agent tool call");
                let result = match self.tools.dispatch(name, &args) {
                    Ok(v) => v,
                    Err(e) => json!({"error": e.to_string()}),
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": result.to_string(),
                }));
            }
        }
        Err(anyhow!("agent exceeded tool-call budget"))
    }
}
