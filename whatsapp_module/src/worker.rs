//! Queue-consuming worker: turns a raw inbound event into a processed reply.
//!
//! Text messages run synchronously on the consumer loop; audio is handed to
//! a background thread so one slow transcription never blocks the loop's
//! polling cadence.

use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use llm_module::{Orchestrator, OrchestratorError, UserContext};

use crate::backend::{BackendClient, Direction, UserDetails};
use crate::config::WorkerConfig;
use crate::event_queue::EventQueue;
use crate::send::WhatsAppSender;
use crate::transcribe::{is_transcription_error, TranscriptionClient};
use crate::webhook::{classify_payload, EventKind, InboundClassification, InboundEvent};

const NOT_REGISTERED_REPLY: &str =
    "Welcome! I don't recognize this phone number. Please contact support to register.";
const PROCESSING_NOTICE: &str = "🎧 Processing your voice note…";
const AI_ERROR_REPLY: &str = "⚠️ AI Error: I couldn't process that.";
const OVERSIZE_REPLY: &str = "⚠️ System Error: The AI service returned an invalid response.";
const EMPTY_AUDIO_REPLY: &str = "⚠️ I couldn't hear anything in your audio message.";
const AUDIO_APOLOGY: &str = "⚠️ Sorry, I encountered an error processing your audio message.";
const DOWNLOAD_FAILED_REPLY: &str = "⚠️ Error: Could not download audio.";

/// Replies longer than this are almost certainly an error page, not a reply.
const MAX_REPLY_CHARS: usize = 4000;

/// How handling one dequeued event failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The event can never succeed; acknowledge and drop it so it does not
    /// become a poison message.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// Likely to succeed on redelivery; leave unacknowledged.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Caps the number of in-flight background audio jobs so a burst of voice
/// messages cannot spawn unbounded threads.
struct ConcurrencyLimiter {
    max: usize,
    in_flight: Mutex<usize>,
}

impl ConcurrencyLimiter {
    fn new(max: usize) -> Self {
        Self {
            max,
            in_flight: Mutex::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if *in_flight >= self.max {
            return false;
        }
        *in_flight += 1;
        true
    }

    fn release(&self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if *in_flight > 0 {
            *in_flight -= 1;
        }
    }
}

pub struct Worker {
    config: Arc<WorkerConfig>,
    queue: Arc<dyn EventQueue>,
    backend: Arc<BackendClient>,
    sender: Arc<WhatsAppSender>,
    orchestrator: Arc<Orchestrator>,
    transcriber: Arc<TranscriptionClient>,
    audio_limiter: ConcurrencyLimiter,
}

impl Worker {
    pub fn new(
        config: Arc<WorkerConfig>,
        queue: Arc<dyn EventQueue>,
        backend: Arc<BackendClient>,
        sender: Arc<WhatsAppSender>,
        orchestrator: Arc<Orchestrator>,
        transcriber: Arc<TranscriptionClient>,
    ) -> Self {
        let audio_limiter = ConcurrencyLimiter::new(config.audio_max_concurrency);
        Self {
            config,
            queue,
            backend,
            sender,
            orchestrator,
            transcriber,
            audio_limiter,
        }
    }

    /// Process one dequeued payload end to end. `Ok` means the event may be
    /// acknowledged — including duplicates, status envelopes and unsupported
    /// message types, which are deliberate no-ops.
    pub fn handle_event(worker: &Arc<Worker>, body: &str) -> Result<(), ProcessError> {
        let classification = classify_payload(body)
            .map_err(|err| ProcessError::Permanent(format!("unparseable payload: {err}")))?;

        let event = match classification {
            InboundClassification::StatusOnly | InboundClassification::Empty => return Ok(()),
            InboundClassification::Message(event) => event,
        };

        let duplicate = worker
            .backend
            .message_exists(&event.message_id)
            .map_err(|err| ProcessError::Transient(format!("idempotency check failed: {err}")))?;
        if duplicate {
            debug!("skipping duplicate delivery of {}", event.message_id);
            return Ok(());
        }

        match event.kind.clone() {
            EventKind::Unsupported(message_type) => {
                info!(
                    "ignoring unsupported message type {:?} from {}",
                    message_type, event.sender
                );
                Ok(())
            }
            EventKind::Audio { media_id } => Worker::dispatch_audio(worker, event, media_id),
            EventKind::Text(text) => worker.handle_text(&event, &text),
        }
    }

    fn handle_text(&self, event: &InboundEvent, text: &str) -> Result<(), ProcessError> {
        info!("received text from {}", event.sender);

        let user = self
            .backend
            .user_by_phone(&event.sender)
            .map_err(|err| ProcessError::Transient(format!("user lookup failed: {err}")))?;
        let user_id = user.as_ref().map(|user| user.id);

        // Persist the inbound turn before orchestrating: if the process dies
        // mid-turn, redelivery hits the idempotency guard instead of
        // re-invoking tools.
        self.backend
            .store_message(user_id, text, &event.message_id, Direction::In)
            .map_err(|err| ProcessError::Transient(format!("inbound persist failed: {err}")))?;

        let reply = match user {
            Some(user) => self.generate_reply(&user, text)?,
            None => NOT_REGISTERED_REPLY.to_string(),
        };

        self.backend
            .store_message(user_id, &reply, &event.message_id, Direction::Out)
            .map_err(|err| ProcessError::Transient(format!("outbound persist failed: {err}")))?;

        // The user is actively waiting, so a failed send is surfaced rather
        // than swallowed.
        self.sender
            .send_text(&event.sender, &reply)
            .map_err(|err| ProcessError::Transient(format!("reply send failed: {err}")))?;

        Ok(())
    }

    /// Run the orchestrator for a registered user.
    ///
    /// Transport failures bubble up as transient so queue redelivery
    /// applies; exhausted tool retries and provider rejections degrade into
    /// the generic apology instead of blocking the conversation.
    fn generate_reply(&self, user: &UserDetails, text: &str) -> Result<String, ProcessError> {
        let details = self
            .backend
            .user_by_id(user.id, true)
            .map_err(|err| ProcessError::Transient(format!("role lookup failed: {err}")))?;
        let Some(details) = details else {
            warn!("user {} vanished between lookup and orchestration", user.id);
            return Ok(AI_ERROR_REPLY.to_string());
        };

        let history = self
            .backend
            .chat_history(user.id, self.config.history_limit)
            .map_err(|err| ProcessError::Transient(format!("history fetch failed: {err}")))?;

        let context = UserContext {
            user_id: details.id,
            org_id: details.org_id,
            name: details.name.clone(),
            role: details.role.clone().unwrap_or_else(|| "intern".to_string()),
            department: details
                .department
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
        };

        let reply = match self.orchestrator.respond(text, &history, &context) {
            Ok(reply) => reply,
            Err(OrchestratorError::Transport(err)) => {
                return Err(ProcessError::Transient(format!("llm transport error: {err}")));
            }
            Err(err) => {
                error!("orchestration failed for user {}: {}", user.id, err);
                AI_ERROR_REPLY.to_string()
            }
        };

        if reply.chars().count() > MAX_REPLY_CHARS {
            error!("orchestrator returned oversized payload, likely an error page");
            return Ok(OVERSIZE_REPLY.to_string());
        }
        Ok(reply)
    }

    /// Move the whole audio pipeline off the consumer loop. The courtesy
    /// notice goes out first; it is not a conversation turn and is never
    /// persisted.
    ///
    /// In-flight jobs are capped; at capacity the event is left for queue
    /// redelivery instead of spawning another thread. The courtesy notice
    /// is only sent once a slot is held, so deferral does not duplicate it.
    fn dispatch_audio(
        worker: &Arc<Worker>,
        event: InboundEvent,
        media_id: String,
    ) -> Result<(), ProcessError> {
        if !worker.audio_limiter.try_acquire() {
            return Err(ProcessError::Transient(format!(
                "audio capacity reached, deferring {}",
                event.message_id
            )));
        }
        worker
            .sender
            .send_best_effort(&event.sender, PROCESSING_NOTICE);
        let worker = Arc::clone(worker);
        thread::spawn(move || {
            worker.process_audio(&event, &media_id);
            worker.audio_limiter.release();
        });
        Ok(())
    }

    /// Download, transcribe, orchestrate and reply for one voice note.
    /// Failures here become a user-visible apology and are never retried:
    /// the next inbound event from the same sender is independent.
    fn process_audio(&self, event: &InboundEvent, media_id: &str) {
        let audio = match self.sender.download_media(media_id) {
            Ok(audio) => audio,
            Err(err) => {
                error!("media download failed for {}: {}", event.message_id, err);
                self.sender.send_best_effort(&event.sender, DOWNLOAD_FAILED_REPLY);
                return;
            }
        };

        let user = match self.backend.user_by_phone(&event.sender) {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.sender.send_best_effort(&event.sender, NOT_REGISTERED_REPLY);
                return;
            }
            Err(err) => {
                error!("user lookup failed for audio {}: {}", event.message_id, err);
                self.sender.send_best_effort(&event.sender, AUDIO_APOLOGY);
                return;
            }
        };

        let transcript = self.transcriber.transcribe(&audio);
        if is_transcription_error(&transcript) {
            self.sender.send_best_effort(&event.sender, &transcript);
            return;
        }
        if transcript.trim().is_empty() {
            self.sender.send_best_effort(&event.sender, EMPTY_AUDIO_REPLY);
            return;
        }
        info!("transcribed audio from {}", event.sender);

        if let Err(err) = self.finish_audio_turn(&user, event, &transcript) {
            error!("audio processing failed for {}: {}", event.message_id, err);
            self.sender.send_best_effort(&event.sender, AUDIO_APOLOGY);
        }
    }

    fn finish_audio_turn(
        &self,
        user: &UserDetails,
        event: &InboundEvent,
        transcript: &str,
    ) -> Result<(), ProcessError> {
        self.backend
            .store_message(Some(user.id), transcript, &event.message_id, Direction::In)
            .map_err(|err| ProcessError::Transient(format!("inbound persist failed: {err}")))?;

        let reply = self.generate_reply(user, transcript)?;

        self.backend
            .store_message(Some(user.id), &reply, &event.message_id, Direction::Out)
            .map_err(|err| ProcessError::Transient(format!("outbound persist failed: {err}")))?;

        self.sender
            .send_text(&event.sender, &reply)
            .map_err(|err| ProcessError::Transient(format!("reply send failed: {err}")))?;
        Ok(())
    }
}

/// Run the single-consumer polling loop on its own thread.
pub fn spawn_worker(worker: Arc<Worker>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("worker started, consuming inbound events");
        loop {
            match worker.queue.receive() {
                Ok(Some(event)) => {
                    match Worker::handle_event(&worker, &event.body) {
                        Ok(()) => {
                            if let Err(err) = worker.queue.ack(&event.id) {
                                warn!("failed to ack event {}: {}", event.id, err);
                            }
                        }
                        Err(ProcessError::Permanent(reason)) => {
                            // Acknowledge so the malformed payload cannot loop.
                            warn!("dropping event {}: {}", event.id, reason);
                            if let Err(err) = worker.queue.ack(&event.id) {
                                warn!("failed to ack dropped event {}: {}", event.id, err);
                            }
                        }
                        Err(ProcessError::Transient(reason)) => {
                            warn!("event {} will be redelivered: {}", event.id, reason);
                            if let Err(err) = worker.queue.nack(&event.id) {
                                warn!("failed to release event {}: {}", event.id, err);
                            }
                        }
                    }
                }
                Ok(None) => thread::sleep(worker.config.queue_idle_wait),
                Err(err) => {
                    error!("queue receive failed: {}", err);
                    thread::sleep(worker.config.queue_error_cooldown);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::ConcurrencyLimiter;

    #[test]
    fn limiter_caps_in_flight_jobs() {
        let limiter = ConcurrencyLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        limiter.release();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn release_never_underflows() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.release();
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
