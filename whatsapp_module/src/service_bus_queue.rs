//! Durable queue backend over Azure Service Bus peek-lock semantics.
//!
//! `receive` takes a peek-lock whose duration is the visibility timeout;
//! `ack` deletes the locked message and `nack` releases the lock so the
//! broker redelivers it.

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Duration;

use azure_core::{auth::Secret, error::Error as AzureError, HttpClient, StatusCode};
use azure_messaging_servicebus::prelude::QueueClient;
use azure_messaging_servicebus::service_bus::{PeekLockResponse, SendMessageOptions};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::event_queue::{EventQueue, EventQueueError, QueuedEvent};

#[derive(Debug, Clone)]
pub struct ServiceBusConfig {
    pub namespace: String,
    pub policy_name: String,
    pub policy_key: String,
    pub queue_name: String,
    /// Peek-lock duration; the message becomes visible again when it lapses.
    pub lock_timeout: Duration,
}

pub struct ServiceBusEventQueue {
    http_client: std::sync::Arc<dyn HttpClient>,
    config: ServiceBusConfig,
    runtime: Option<Runtime>,
    client: Mutex<Option<QueueClient>>,
    pending: Mutex<HashMap<Uuid, PeekLockResponse>>,
}

impl ServiceBusEventQueue {
    pub fn from_env() -> Result<Self, EventQueueError> {
        Self::new(resolve_service_bus_config_from_env()?)
    }

    pub fn new(config: ServiceBusConfig) -> Result<Self, EventQueueError> {
        let runtime = Runtime::new().map_err(|err| EventQueueError::ServiceBus(err.to_string()))?;
        Ok(Self {
            http_client: azure_core::new_http_client(),
            config,
            runtime: Some(runtime),
            client: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn runtime(&self) -> Result<&Runtime, EventQueueError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| EventQueueError::ServiceBus("service bus runtime dropped".to_string()))
    }

    fn client(&self) -> Result<QueueClient, EventQueueError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = QueueClient::new(
            self.http_client.clone(),
            self.config.namespace.clone(),
            self.config.queue_name.clone(),
            self.config.policy_name.clone(),
            Secret::new(self.config.policy_key.clone()),
        )
        .map_err(map_service_bus_error)?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn take_pending(&self, id: &Uuid) -> Result<PeekLockResponse, EventQueueError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        pending.remove(id).ok_or(EventQueueError::MissingLock(*id))
    }
}

impl EventQueue for ServiceBusEventQueue {
    fn enqueue(&self, body: &str) -> Result<(), EventQueueError> {
        let client = self.client()?;
        let options = SendMessageOptions {
            content_type: Some("application/json".to_string()),
            broker_properties: None,
            custom_properties: None,
        };
        self.runtime()?
            .block_on(client.send_message(body, Some(options)))
            .map_err(map_service_bus_error)
    }

    fn receive(&self) -> Result<Option<QueuedEvent>, EventQueueError> {
        let client = self.client()?;
        let response = self
            .runtime()?
            .block_on(client.peek_lock_message2(Some(self.config.lock_timeout)))
            .map_err(map_service_bus_error)?;

        if *response.status() == StatusCode::NoContent {
            return Ok(None);
        }
        if *response.status() != StatusCode::Ok && *response.status() != StatusCode::Created {
            return Err(EventQueueError::ServiceBus(format!(
                "unexpected service bus status {}",
                response.status()
            )));
        }

        let body = response.body();
        let id = Uuid::new_v4();
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        pending.insert(id, response);
        Ok(Some(QueuedEvent { id, body }))
    }

    fn ack(&self, id: &Uuid) -> Result<(), EventQueueError> {
        let response = self.take_pending(id)?;
        self.runtime()?
            .block_on(response.delete_message())
            .map(|_| ())
            .map_err(map_service_bus_error)
    }

    fn nack(&self, id: &Uuid) -> Result<(), EventQueueError> {
        let response = self.take_pending(id)?;
        self.runtime()?
            .block_on(response.unlock_message())
            .map_err(map_service_bus_error)
    }
}

impl Drop for ServiceBusEventQueue {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn map_service_bus_error(err: AzureError) -> EventQueueError {
    EventQueueError::ServiceBus(err.to_string())
}

pub fn resolve_service_bus_config_from_env() -> Result<ServiceBusConfig, EventQueueError> {
    let lock_timeout =
        Duration::from_secs(crate::config::resolve_u64_env("SERVICE_BUS_LOCK_TIMEOUT_SECS", 30));

    if let Ok(conn_str) = env::var("SERVICE_BUS_CONNECTION_STRING") {
        let parts = parse_service_bus_connection_string(&conn_str)?;
        let queue_name = env::var("SERVICE_BUS_QUEUE_NAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or(parts.entity_path)
            .ok_or_else(|| EventQueueError::Config("missing SERVICE_BUS_QUEUE_NAME".to_string()))?;
        return Ok(ServiceBusConfig {
            namespace: parts.namespace,
            policy_name: parts.policy_name,
            policy_key: parts.policy_key,
            queue_name,
            lock_timeout,
        });
    }

    Ok(ServiceBusConfig {
        namespace: require_env("SERVICE_BUS_NAMESPACE")?,
        policy_name: require_env("SERVICE_BUS_POLICY_NAME")?,
        policy_key: require_env("SERVICE_BUS_POLICY_KEY")?,
        queue_name: require_env("SERVICE_BUS_QUEUE_NAME")?,
        lock_timeout,
    })
}

fn require_env(key: &str) -> Result<String, EventQueueError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| EventQueueError::Config(format!("missing {key}")))
}

struct ParsedConnectionString {
    namespace: String,
    policy_name: String,
    policy_key: String,
    entity_path: Option<String>,
}

fn parse_service_bus_connection_string(
    conn_str: &str,
) -> Result<ParsedConnectionString, EventQueueError> {
    let mut namespace = None;
    let mut policy_name = None;
    let mut policy_key = None;
    let mut entity_path = None;
    for part in conn_str.split(';') {
        let mut iter = part.splitn(2, '=');
        let key = iter.next().unwrap_or("").trim();
        let value = iter.next().unwrap_or("").trim();
        match key {
            "Endpoint" => {
                if let Some(value) = value.strip_prefix("sb://") {
                    let host = value.trim_end_matches('/');
                    let ns = host.split('.').next().unwrap_or("").to_string();
                    if !ns.is_empty() {
                        namespace = Some(ns);
                    }
                }
            }
            "SharedAccessKeyName" if !value.is_empty() => {
                policy_name = Some(value.to_string());
            }
            "SharedAccessKey" if !value.is_empty() => {
                policy_key = Some(value.to_string());
            }
            "EntityPath" if !value.is_empty() => {
                entity_path = Some(value.to_string());
            }
            _ => {}
        }
    }

    Ok(ParsedConnectionString {
        namespace: namespace.ok_or_else(|| {
            EventQueueError::Config("missing namespace in connection string".to_string())
        })?,
        policy_name: policy_name.ok_or_else(|| {
            EventQueueError::Config("missing policy name in connection string".to_string())
        })?,
        policy_key: policy_key.ok_or_else(|| {
            EventQueueError::Config("missing policy key in connection string".to_string())
        })?,
        entity_path,
    })
}
