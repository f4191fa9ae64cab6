use std::thread;

use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::errors::{classify_provider_error, OrchestratorError};
use super::prompt::{build_prompt, build_system_instruction};
use super::response::{first_message_text, translate_output, OutputItem};
use super::token::mint_turn_token;
use super::types::{ChatTurn, OrchestratorConfig, UserContext};

/// Returned when the provider produced no plain-text assistant message.
pub const FALLBACK_REPLY: &str = "No response generated.";

pub struct Orchestrator {
    config: OrchestratorConfig,
    http: Client,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, http }
    }

    pub fn from_env() -> Result<Self, String> {
        Ok(Self::new(OrchestratorConfig::from_env()?))
    }

    /// Run one tool-calling turn and return the assistant's reply text.
    ///
    /// Tool-validation failures are retried up to `max_retries` extra times
    /// with linearly growing backoff; every other failure propagates to the
    /// caller untouched.
    pub fn respond(
        &self,
        text: &str,
        history: &[ChatTurn],
        context: &UserContext,
    ) -> Result<String, OrchestratorError> {
        let token = mint_turn_token(
            &self.config.token_secret,
            context,
            self.config.token_ttl_minutes,
        )?;
        let system_instruction = build_system_instruction(context, Utc::now());
        let prompt = build_prompt(&system_instruction, history, text);

        let mut attempt: u32 = 0;
        let items = loop {
            match self.invoke_provider(&prompt, &token) {
                Ok(items) => break items,
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.backoff_step * attempt;
                    warn!(
                        "transient tool failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.config.max_retries, backoff, err
                    );
                    thread::sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        };

        let tool_calls = items
            .iter()
            .filter(|item| matches!(item, OutputItem::ToolUse { .. }))
            .count();
        if tool_calls > 0 {
            debug!("turn for user {} used {} tool call(s)", context.user_id, tool_calls);
        }

        Ok(first_message_text(&items).unwrap_or_else(|| {
            info!("provider response had no text output, using fallback reply");
            FALLBACK_REPLY.to_string()
        }))
    }

    fn invoke_provider(
        &self,
        prompt: &str,
        token: &str,
    ) -> Result<Vec<OutputItem>, OrchestratorError> {
        let body = json!({
            "model": self.config.model,
            "input": prompt,
            "tools": [{
                "type": "mcp",
                "server_label": self.config.mcp_server_label,
                "server_url": self.config.mcp_server_url,
                "headers": {"Authorization": format!("Bearer {token}")},
                "require_approval": "never",
            }],
        });

        let response = self
            .http
            .post(format!("{}/responses", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_provider_error(status.as_u16(), &body));
        }

        let payload: Value = response.json()?;
        let output = payload
            .get("output")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(translate_output(&output))
    }
}
