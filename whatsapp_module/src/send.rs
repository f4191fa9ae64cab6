//! Outbound WhatsApp messaging over the Meta Graph API, plus the message
//! renderers for task events, deadline tiers and daily reports.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::backend::{AssignedReport, DeadlineTask, PersonalReport, ReportTask};
use crate::config::WorkerConfig;
use crate::scheduler::ReminderTier;

/// Timeout for the messages endpoint.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for downloading media binaries.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard cap on rendered message length; WhatsApp rejects oversized bodies.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("whatsapp request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("whatsapp api returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("media {0} has no download url")]
    MissingMediaUrl(String),
}

pub struct WhatsAppSender {
    access_token: String,
    api_version: String,
    phone_number_id: String,
    base_url: String,
    http: Client,
}

impl WhatsAppSender {
    pub fn new(
        access_token: &str,
        api_version: &str,
        phone_number_id: &str,
        base_url: &str,
    ) -> Self {
        Self {
            access_token: access_token.to_string(),
            api_version: api_version.to_string(),
            phone_number_id: phone_number_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            &config.access_token,
            &config.graph_api_version,
            &config.phone_number_id,
            &config.graph_base_url,
        )
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, self.phone_number_id
        )
    }

    /// Send a text message, surfacing any failure to the caller. Used on the
    /// inbound-reply path where the user is actively waiting.
    pub fn send_text(&self, to: &str, text: &str) -> Result<(), SendError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {"preview_url": false, "body": text},
        });
        let response = self
            .http
            .post(self.messages_url())
            .timeout(SEND_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&payload)
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: Value = response.json().unwrap_or(Value::Null);
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string();
        Err(SendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Best-effort variant for notifications: a failed transmission is
    /// logged and never fails the caller's control flow.
    pub fn send_best_effort(&self, to: &str, text: &str) {
        if let Err(err) = self.send_text(to, text) {
            warn!("best-effort send to {} failed: {}", to, err);
        }
    }

    /// Fetch a media binary via the two-step Graph flow: resolve the media
    /// id to a short-lived URL, then download the bytes.
    pub fn download_media(&self, media_id: &str) -> Result<Vec<u8>, SendError> {
        let metadata_url = format!("{}/{}/{}", self.base_url, self.api_version, media_id);
        let response = self
            .http
            .get(metadata_url)
            .timeout(SEND_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Api {
                status: status.as_u16(),
                message: "media metadata fetch failed".to_string(),
            });
        }
        let metadata: Value = response.json()?;
        let media_url = metadata["url"]
            .as_str()
            .ok_or_else(|| SendError::MissingMediaUrl(media_id.to_string()))?;

        let media = self
            .http
            .get(media_url)
            .timeout(MEDIA_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()?;
        let status = media.status();
        if !status.is_success() {
            return Err(SendError::Api {
                status: status.as_u16(),
                message: "media download failed".to_string(),
            });
        }
        Ok(media.bytes()?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Message renderers
// ---------------------------------------------------------------------------

pub fn render_task_assigned(title: &str, deadline: Option<&str>, task_id: i64) -> String {
    let mut message = format!("📋 *New Task Assigned*\n\n*Title:* {title}\n");
    if let Some(deadline) = deadline {
        message.push_str(&format!("*Deadline:* {deadline}\n"));
    }
    message.push_str(&format!("\nTask ID: #{task_id}"));
    clamp(message)
}

pub fn render_task_updated(title: &str, status: &str, task_id: i64) -> String {
    clamp(format!(
        "📝 *Task Updated*\n\n*Title:* {title}\n*Status:* {status}\n\nTask ID: #{task_id}",
        status = status.to_uppercase(),
    ))
}

pub fn render_task_cancelled(title: &str, reason: Option<&str>, task_id: i64) -> String {
    let mut message = format!("❌ *Task Cancelled*\n\n*Title:* {title}\n");
    if let Some(reason) = reason {
        message.push_str(&format!("*Reason:* {reason}\n"));
    }
    message.push_str(&format!("\nTask ID: #{task_id}"));
    clamp(message)
}

pub fn render_deadline_message(tier: ReminderTier, task: &DeadlineTask, deadline: &str) -> String {
    let body = match tier {
        ReminderTier::Warning => format!(
            "⏰ *Deadline in 1 hour*\n\n*{title}* is due at {deadline}. Time to wrap it up.\n\nTask ID: #{id}",
            title = task.title,
            id = task.id,
        ),
        ReminderTier::Imminent => format!(
            "🚨 *Deadline in 10 minutes*\n\n*{title}* is due at {deadline}. Reply here to mark it complete.\n\nTask ID: #{id}",
            title = task.title,
            id = task.id,
        ),
        ReminderTier::Overdue => format!(
            "🔴 *Deadline crossed*\n\n*{title}* was due at {deadline} and is still open.\n\nTask ID: #{id}",
            title = task.title,
            id = task.id,
        ),
    };
    clamp(body)
}

pub fn render_personal_report(name: &str, report: &PersonalReport) -> String {
    let mut message = format!("📊 *Daily Summary for {name}*\n");

    message.push_str(&format!(
        "\n*Completed today ({}):*\n",
        report.completed_today.len()
    ));
    if report.completed_today.is_empty() {
        message.push_str("- nothing yet\n");
    }
    for task in &report.completed_today {
        message.push_str(&format!("- {} (#{})\n", task.title, task.id));
    }

    let mut open_tasks: Vec<&ReportTask> = report.open_tasks.iter().collect();
    open_tasks.sort_by(|a, b| match (&a.deadline, &b.deadline) {
        (Some(left), Some(right)) => left.cmp(right),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    message.push_str(&format!("\n*Open tasks ({}):*\n", open_tasks.len()));
    if open_tasks.is_empty() {
        message.push_str("- all clear\n");
    }
    for task in open_tasks {
        match &task.deadline {
            Some(deadline) => {
                message.push_str(&format!("- {} (#{}) due {}\n", task.title, task.id, deadline))
            }
            None => message.push_str(&format!("- {} (#{}) no deadline\n", task.title, task.id)),
        }
    }

    if !report.progress_notes.is_empty() {
        message.push_str("\n*Today's progress:*\n");
        for note in &report.progress_notes {
            message.push_str(&format!("- {note}\n"));
        }
    }

    clamp(message)
}

pub fn render_assigned_report(name: &str, report: &AssignedReport) -> String {
    let mut message = format!(
        "🗂 *Tasks you assigned — {name}*\n\n{} task(s) in flight:\n",
        report.assigned_tasks.len()
    );
    for task in &report.assigned_tasks {
        let status = task.status.as_deref().unwrap_or("open");
        let assignee = task.assignee_name.as_deref().unwrap_or("unassigned");
        message.push_str(&format!(
            "- {} (#{}) — {} — {}\n",
            task.title, task.id, assignee, status
        ));
        for note in &task.progress_notes {
            message.push_str(&format!("    · {note}\n"));
        }
    }
    clamp(message)
}

fn clamp(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message;
    }
    let mut clamped: String = message.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clamped.push('…');
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_task(id: i64, title: &str, deadline: Option<&str>) -> ReportTask {
        ReportTask {
            id,
            title: title.to_string(),
            deadline: deadline.map(|value| value.to_string()),
            status: None,
        }
    }

    #[test]
    fn personal_report_sorts_no_deadline_last() {
        let report = PersonalReport {
            completed_today: vec![],
            open_tasks: vec![
                report_task(1, "no deadline", None),
                report_task(2, "due later", Some("2026-08-09T10:00:00Z")),
                report_task(3, "due soon", Some("2026-08-08T10:00:00Z")),
            ],
            progress_notes: vec![],
        };
        let message = render_personal_report("Asha", &report);
        let soon = message.find("due soon").expect("soon");
        let later = message.find("due later").expect("later");
        let none = message.find("no deadline").expect("none");
        assert!(soon < later && later < none);
    }

    #[test]
    fn rendered_messages_are_bounded() {
        let report = PersonalReport {
            completed_today: vec![],
            open_tasks: (0..500)
                .map(|i| report_task(i, &"very long task title ".repeat(10), None))
                .collect(),
            progress_notes: vec![],
        };
        let message = render_personal_report("Asha", &report);
        assert!(message.chars().count() <= 4096);
    }

    #[test]
    fn task_assigned_includes_id_and_deadline() {
        let message = render_task_assigned("Ship the report", Some("2026-08-08 17:00"), 42);
        assert!(message.contains("Ship the report"));
        assert!(message.contains("2026-08-08 17:00"));
        assert!(message.contains("#42"));
    }
}
