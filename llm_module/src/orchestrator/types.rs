use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible API URL (Groq).
const DEFAULT_LLM_API_URL: &str = "https://api.groq.com/openai/v1";

/// Default model served through the provider.
const DEFAULT_LLM_MODEL: &str = "openai/gpt-oss-20b";

/// Timeout for a single provider request.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

/// One prior message in the rolling conversation window, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// The acting identity for one orchestration turn.
///
/// A fresh backend token is minted from this context on every call; nothing
/// here outlives the turn.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: i64,
    pub org_id: Option<i64>,
    pub name: String,
    pub role: String,
    pub department: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    /// MCP server exposing the backend task tools.
    pub mcp_server_url: String,
    pub mcp_server_label: String,
    /// Shared secret for minting the per-turn backend token.
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    /// Additional attempts after the first, on tool-validation failures only.
    pub max_retries: u32,
    /// Backoff grows linearly: `backoff_step * attempt`.
    pub backoff_step: Duration,
    pub request_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, String> {
        let api_key = env::var("LLM_API_KEY").map_err(|_| "missing LLM_API_KEY".to_string())?;
        let token_secret =
            env::var("TOKEN_SECRET").map_err(|_| "missing TOKEN_SECRET".to_string())?;
        let mcp_server_url =
            env::var("MCP_SERVER_URL").map_err(|_| "missing MCP_SERVER_URL".to_string())?;

        Ok(Self {
            api_key,
            api_url: resolve_str_env("LLM_API_URL", DEFAULT_LLM_API_URL),
            model: resolve_str_env("LLM_MODEL", DEFAULT_LLM_MODEL),
            mcp_server_url,
            mcp_server_label: resolve_str_env("MCP_SERVER_LABEL", "task backend"),
            token_secret,
            token_ttl_minutes: 5,
            max_retries: resolve_u32_env("LLM_MAX_RETRIES", 2),
            backoff_step: Duration::from_millis(500),
            request_timeout: Duration::from_secs(resolve_u64_env(
                "LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )),
        })
    }
}

fn resolve_str_env(key: &str, default_value: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_value.to_string())
}

fn resolve_u32_env(key: &str, default_value: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default_value)
}

fn resolve_u64_env(key: &str, default_value: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}
