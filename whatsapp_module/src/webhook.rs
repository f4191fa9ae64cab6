//! Meta Cloud API webhook payload model and event classification.

use serde::Deserialize;

/// Root webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub value: ChangeValue,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Option<Vec<WebhookContact>>,
    #[serde(default)]
    pub messages: Option<Vec<WebhookMessage>>,
    #[serde(default)]
    pub statuses: Option<Vec<WebhookStatus>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookContact {
    pub wa_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    pub id: String,
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WebhookText>,
    #[serde(default)]
    pub audio: Option<WebhookMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMedia {
    pub id: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookStatus {
    pub id: String,
    pub status: String,
}

/// One user message extracted from the webhook envelope.
///
/// `message_id` is the transport-assigned id used as the idempotency key.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message_id: String,
    pub sender: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Text(String),
    Audio { media_id: String },
    Unsupported(String),
}

/// What a dequeued payload turned out to contain.
#[derive(Debug, Clone)]
pub enum InboundClassification {
    /// Delivery-status metadata only, no user message.
    StatusOnly,
    /// Envelope carried no messages at all.
    Empty,
    Message(InboundEvent),
}

/// Parse and classify the verbatim webhook JSON that came off the queue.
///
/// Parse failures are the caller's poison-message signal; everything else is
/// a valid classification, including unsupported message types.
pub fn classify_payload(raw: &str) -> Result<InboundClassification, serde_json::Error> {
    let payload: WebhookPayload = serde_json::from_str(raw)?;

    let value = payload
        .entry
        .first()
        .and_then(|entry| entry.changes.first())
        .map(|change| change.value.clone())
        .unwrap_or_default();

    if value
        .statuses
        .as_ref()
        .is_some_and(|statuses| !statuses.is_empty())
    {
        return Ok(InboundClassification::StatusOnly);
    }

    let Some(message) = value
        .messages
        .as_ref()
        .and_then(|messages| messages.first())
    else {
        return Ok(InboundClassification::Empty);
    };

    // Contacts carry the canonical wa_id; fall back to the message sender.
    let sender = value
        .contacts
        .as_ref()
        .and_then(|contacts| contacts.first())
        .map(|contact| contact.wa_id.clone())
        .or_else(|| message.from.clone())
        .unwrap_or_default();

    let kind = match message.message_type.as_str() {
        "text" => match &message.text {
            Some(text) => EventKind::Text(text.body.clone()),
            None => EventKind::Unsupported("text".to_string()),
        },
        "audio" => match &message.audio {
            Some(audio) => EventKind::Audio {
                media_id: audio.id.clone(),
            },
            None => EventKind::Unsupported("audio".to_string()),
        },
        other => EventKind::Unsupported(other.to_string()),
    };

    Ok(InboundClassification::Message(InboundEvent {
        message_id: message.id.clone(),
        sender,
        kind,
    }))
}
