pub mod orchestrator;

pub use orchestrator::{
    ChatTurn, Orchestrator, OrchestratorConfig, OrchestratorError, OutputItem, UserContext,
    FALLBACK_REPLY,
};
