use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

/// Matches a delimiter-bracketed special token and everything after it,
/// e.g. the `<|channel|>commentary` tail that leaks out of the model's
/// token vocabulary and corrupts tool names.
fn token_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|[A-Za-z0-9_]+\|>.*$").expect("valid regex"))
}

/// Strip a corrupted special-token suffix from a tool name.
///
/// Clean names pass through unchanged, so the function is idempotent.
pub fn sanitize_tool_name(name: &str) -> String {
    let cleaned = token_suffix_re().replace(name, "");
    if cleaned != name {
        warn!("corrected corrupted tool name {:?} -> {:?}", name, cleaned);
    }
    cleaned.into_owned()
}
