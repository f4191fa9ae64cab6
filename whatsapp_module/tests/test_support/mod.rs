#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use llm_module::{Orchestrator, OrchestratorConfig};
use whatsapp_module::backend::BackendClient;
use whatsapp_module::send::WhatsAppSender;
use whatsapp_module::WorkerConfig;

pub fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    match std::panic::catch_unwind(mockito::Server::new) {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!("Skipping {test_name}; unable to start mockito server in this environment.");
            None
        }
    }
}

pub const TEST_PHONE_NUMBER_ID: &str = "98765";
pub const TEST_API_VERSION: &str = "v22.0";

/// Graph API messages path for the test phone number id.
pub fn messages_path() -> String {
    format!("/{TEST_API_VERSION}/{TEST_PHONE_NUMBER_ID}/messages")
}

pub fn test_config(backend_url: &str, graph_url: &str) -> Arc<WorkerConfig> {
    Arc::new(WorkerConfig {
        access_token: "test-access-token".to_string(),
        graph_api_version: TEST_API_VERSION.to_string(),
        phone_number_id: TEST_PHONE_NUMBER_ID.to_string(),
        graph_base_url: graph_url.to_string(),
        backend_base_url: backend_url.to_string(),
        speech_api_key: Some("speech-key".to_string()),
        speech_base_url: graph_url.to_string(),
        history_limit: 15,
        audio_max_concurrency: 4,
        queue_error_cooldown: Duration::from_millis(10),
        queue_idle_wait: Duration::from_millis(10),
        reminder_check_interval: Duration::from_secs(60),
        reminder_warning_minutes: 60,
        reminder_imminent_minutes: 10,
        daily_report_hour: 17,
        daily_report_minute: 0,
    })
}

pub fn test_backend(server: &mockito::ServerGuard) -> Arc<BackendClient> {
    Arc::new(BackendClient::new(&server.url()))
}

pub fn test_sender(server: &mockito::ServerGuard) -> Arc<WhatsAppSender> {
    Arc::new(WhatsAppSender::new(
        "test-access-token",
        TEST_API_VERSION,
        TEST_PHONE_NUMBER_ID,
        &server.url(),
    ))
}

pub fn test_orchestrator(server: &mockito::ServerGuard) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(OrchestratorConfig {
        api_key: "llm-key".to_string(),
        api_url: server.url(),
        model: "openai/gpt-oss-20b".to_string(),
        mcp_server_url: "https://mcp.example.com/sse".to_string(),
        mcp_server_label: "task backend".to_string(),
        token_secret: "token-secret".to_string(),
        token_ttl_minutes: 5,
        max_retries: 2,
        backoff_step: Duration::from_millis(0),
        request_timeout: Duration::from_secs(5),
    }))
}
