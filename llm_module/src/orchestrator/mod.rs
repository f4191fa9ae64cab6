mod core;
mod errors;
mod prompt;
mod response;
mod sanitize;
mod token;
mod types;

pub use self::core::{Orchestrator, FALLBACK_REPLY};
pub use errors::OrchestratorError;
pub use response::OutputItem;
pub use sanitize::sanitize_tool_name;
pub use types::{ChatTurn, OrchestratorConfig, UserContext};
