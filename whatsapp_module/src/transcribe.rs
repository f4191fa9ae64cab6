//! Voice-note transcription with a low-latency path and a batch fallback.
//!
//! The realtime endpoint rejects clips past its duration limit with a
//! client-error status; those fall back to the asynchronous batch job
//! lifecycle. Scratch files live in a single temp directory that is removed
//! on every exit path.

use std::fs;
use std::thread;
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{error, info};

use crate::config::WorkerConfig;

/// Prefix marking a failed transcription; callers must check for it instead
/// of treating every non-empty string as a transcript.
pub const ERROR_MARKER: &str = "Error:";

/// Realtime call timeout: generous, but bounded.
const REALTIME_TIMEOUT: Duration = Duration::from_secs(35);
const DEFAULT_MODEL: &str = "saarika:v2.5";
const DEFAULT_LANGUAGE: &str = "en-IN";

pub fn is_transcription_error(text: &str) -> bool {
    text.starts_with(ERROR_MARKER)
}

#[derive(Debug, Error)]
enum BatchError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("batch job failed: {0}")]
    Job(String),
    #[error("no transcript in batch output")]
    MissingTranscript,
}

pub struct TranscriptionClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    language_code: String,
    poll_interval: Duration,
    http: Client,
}

impl TranscriptionClient {
    pub fn new(api_key: Option<String>, base_url: &str) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            language_code: DEFAULT_LANGUAGE.to_string(),
            poll_interval: Duration::from_secs(2),
            http: Client::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.speech_api_key.clone(), &config.speech_base_url)
    }

    /// Shorten the status poll interval; used by tests against a mock
    /// provider.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Transcribe raw OGG audio. Never panics and never errors out: failures
    /// come back as an `Error:`-prefixed marker string.
    pub fn transcribe(&self, audio: &[u8]) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return format!("{ERROR_MARKER} Transcription service not configured.");
        };

        match self.transcribe_realtime(api_key, audio) {
            Ok(transcript) => transcript,
            Err(RealtimeFailure::TooLarge) => {
                info!("audio exceeds realtime limit, falling back to batch transcription");
                match self.transcribe_batch(api_key, audio) {
                    Ok(transcript) => transcript,
                    Err(err) => {
                        error!("batch transcription failed: {}", err);
                        format!("{ERROR_MARKER} {err}")
                    }
                }
            }
            Err(RealtimeFailure::Other(reason)) => {
                error!("realtime transcription failed: {}", reason);
                format!("{ERROR_MARKER} Transcription failed - {reason}")
            }
        }
    }

    fn transcribe_realtime(&self, api_key: &str, audio: &[u8]) -> Result<String, RealtimeFailure> {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(audio.to_vec())
                    .file_name("audio.ogg")
                    .mime_str("audio/ogg")
                    .map_err(|err| RealtimeFailure::Other(err.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("input_audio_codec", "ogg");

        let response = self
            .http
            .post(format!("{}/speech-to-text", self.base_url))
            .timeout(REALTIME_TIMEOUT)
            .header("api-subscription-key", api_key)
            .multipart(form)
            .send()
            .map_err(|err| RealtimeFailure::Other(err.to_string()))?;

        let status = response.status().as_u16();
        if status == 413 || status == 400 {
            return Err(RealtimeFailure::TooLarge);
        }
        if !response.status().is_success() {
            return Err(RealtimeFailure::Other(format!("status {status}")));
        }

        let payload: Value = response
            .json()
            .map_err(|err| RealtimeFailure::Other(err.to_string()))?;
        Ok(payload["transcript"].as_str().unwrap_or_default().to_string())
    }

    /// Batch job lifecycle: init, upload, start, poll until the provider
    /// reports a terminal state, inspect per-file results, download and
    /// parse the output artifact.
    fn transcribe_batch(&self, api_key: &str, audio: &[u8]) -> Result<String, BatchError> {
        // Dropping the TempDir removes every scratch artifact, including the
        // downloaded output, on success and on every error path below.
        let scratch = TempDir::new()?;
        let input_path = scratch.path().join("input.ogg");
        fs::write(&input_path, audio)?;

        let job_id = self.create_job(api_key)?;
        self.upload_input(api_key, &job_id, &input_path)?;
        self.start_job(api_key, &job_id)?;

        loop {
            match self.job_state(api_key, &job_id)?.as_str() {
                "Completed" => break,
                "Failed" => return Err(BatchError::Job("job ended in Failed state".to_string())),
                _ => thread::sleep(self.poll_interval),
            }
        }

        let output_url = self.successful_output_url(api_key, &job_id)?;

        let output_dir = scratch.path().join("output");
        fs::create_dir_all(&output_dir)?;
        let artifact_path = output_dir.join("result.json");
        let artifact = self
            .http
            .get(&output_url)
            .header("api-subscription-key", api_key)
            .send()?
            .error_for_status()?
            .bytes()?;
        fs::write(&artifact_path, &artifact)?;

        let parsed: Value = serde_json::from_slice(&fs::read(&artifact_path)?)
            .map_err(|err| BatchError::Job(format!("unparsable output artifact: {err}")))?;
        // Providers have shipped both field names.
        parsed["transcript"]
            .as_str()
            .or_else(|| parsed["text"].as_str())
            .map(|value| value.to_string())
            .ok_or(BatchError::MissingTranscript)
    }

    fn create_job(&self, api_key: &str) -> Result<String, BatchError> {
        let response: Value = self
            .http
            .post(format!("{}/speech-to-text/job/init", self.base_url))
            .header("api-subscription-key", api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "language_code": self.language_code,
                "with_diarization": false,
            }))
            .send()?
            .error_for_status()?
            .json()?;
        response["job_id"]
            .as_str()
            .map(|value| value.to_string())
            .ok_or_else(|| BatchError::Job("init response missing job_id".to_string()))
    }

    fn upload_input(
        &self,
        api_key: &str,
        job_id: &str,
        input_path: &std::path::Path,
    ) -> Result<(), BatchError> {
        let form = Form::new().file("file", input_path)?;
        self.http
            .post(format!(
                "{}/speech-to-text/job/{job_id}/upload",
                self.base_url
            ))
            .header("api-subscription-key", api_key)
            .multipart(form)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn start_job(&self, api_key: &str, job_id: &str) -> Result<(), BatchError> {
        self.http
            .post(format!(
                "{}/speech-to-text/job/{job_id}/start",
                self.base_url
            ))
            .header("api-subscription-key", api_key)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn job_state(&self, api_key: &str, job_id: &str) -> Result<String, BatchError> {
        let response: Value = self
            .http
            .get(format!(
                "{}/speech-to-text/job/{job_id}/status",
                self.base_url
            ))
            .header("api-subscription-key", api_key)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response["job_state"].as_str().unwrap_or_default().to_string())
    }

    fn successful_output_url(&self, api_key: &str, job_id: &str) -> Result<String, BatchError> {
        let results: Value = self
            .http
            .get(format!(
                "{}/speech-to-text/job/{job_id}/results",
                self.base_url
            ))
            .header("api-subscription-key", api_key)
            .send()?
            .error_for_status()?
            .json()?;

        if let Some(url) = results["successful"][0]["output_url"].as_str() {
            return Ok(url.to_string());
        }
        let reason = results["failed"][0]["error_message"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        Err(BatchError::Job(reason))
    }
}

enum RealtimeFailure {
    /// Size/duration-limit rejection; the batch path can still handle it.
    TooLarge,
    Other(String),
}
