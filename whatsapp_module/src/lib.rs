pub mod backend;
pub mod config;
pub mod event_queue;
pub mod scheduler;
pub mod send;
pub mod service_bus_queue;
pub mod transcribe;
pub mod verify;
pub mod webhook;
pub mod worker;

pub use config::WorkerConfig;
pub use event_queue::{build_queue_from_env, EventQueue, EventQueueError, QueuedEvent};
pub use scheduler::{start_scheduler_threads, ReminderTier, SchedulerControl};
pub use worker::{spawn_worker, Worker};
