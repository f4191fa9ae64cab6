//! Worker binary: queue consumer plus the reminder/report scheduler.

use std::sync::Arc;

use tokio::task;
use tracing::info;

use llm_module::Orchestrator;
use whatsapp_module::backend::BackendClient;
use whatsapp_module::event_queue::build_queue_from_env;
use whatsapp_module::scheduler::start_scheduler_threads;
use whatsapp_module::send::WhatsAppSender;
use whatsapp_module::transcribe::TranscriptionClient;
use whatsapp_module::worker::{spawn_worker, Worker};
use whatsapp_module::WorkerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = Arc::new(WorkerConfig::from_env()?);
    let queue = task::spawn_blocking(build_queue_from_env)
        .await
        .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { err.into() })??;

    let backend = Arc::new(BackendClient::new(&config.backend_base_url));
    let sender = Arc::new(WhatsAppSender::from_config(&config));
    let orchestrator = Arc::new(Orchestrator::from_env()?);
    let transcriber = Arc::new(TranscriptionClient::from_config(&config));

    let worker = Arc::new(Worker::new(
        config.clone(),
        queue,
        backend.clone(),
        sender.clone(),
        orchestrator,
        transcriber,
    ));
    let _consumer = spawn_worker(worker);

    let mut scheduler = start_scheduler_threads(config, backend, sender);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping scheduler");
    scheduler.stop_and_join();

    Ok(())
}
