use thiserror::Error;

/// Failures surfaced by the orchestrator, normalized at the provider
/// boundary so callers never match on raw provider error strings.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The provider rejected a malformed tool invocation. These usually
    /// succeed on a retry, so the orchestrator retries them with backoff.
    #[error("tool validation failed: {0}")]
    ToolValidation(String),
    /// Transport-level failure reaching the provider.
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Minting the per-turn backend token failed.
    #[error("token minting failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    /// Any other failure the provider reported.
    #[error("llm provider error (status {status:?}): {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::ToolValidation(_))
    }
}

/// Substrings the provider uses for the retryable tool-validation class.
///
/// The provider raises one broad error shape, so status codes are checked
/// first and this message inspection stays confined to this adapter.
const TOOL_VALIDATION_MARKERS: &[&str] = &[
    "tool call validation failed",
    "tool_use_failed",
    "failed to call a function",
];

/// Normalize a non-success provider response into the error taxonomy.
pub(super) fn classify_provider_error(status: u16, body: &str) -> OrchestratorError {
    let lowered = body.to_ascii_lowercase();
    if TOOL_VALIDATION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return OrchestratorError::ToolValidation(truncate(body, 300));
    }
    OrchestratorError::Provider {
        status: Some(status),
        message: truncate(body, 300),
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        value.to_string()
    } else {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &value[..end])
    }
}
