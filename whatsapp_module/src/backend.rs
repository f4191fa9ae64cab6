//! Typed client for the backend's internal API.
//!
//! Every database-backed operation the worker and scheduler need goes
//! through these endpoints; this process holds no state of its own beyond
//! the scheduler's reminder tracking.

use std::time::Duration;

use llm_module::ChatTurn;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Timeout for worker-path lookups.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for the larger scheduler queries.
const SCHEDULER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status} for {path}")]
    Unexpected { status: u16, path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserDetails {
    pub id: i64,
    #[serde(default)]
    pub org_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineTask {
    pub id: i64,
    pub title: String,
    /// ISO-8601 deadline as stored by the backend.
    pub deadline: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignees: Vec<Assignee>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assignee {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportUser {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub can_assign: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonalReport {
    #[serde(default)]
    pub completed_today: Vec<ReportTask>,
    #[serde(default)]
    pub open_tasks: Vec<ReportTask>,
    #[serde(default)]
    pub progress_notes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignedTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignee_name: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub progress_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignedReport {
    #[serde(default)]
    pub assigned_tasks: Vec<AssignedTask>,
}

#[derive(Debug, Clone, Deserialize)]
struct IdempotencyResponse {
    exists: bool,
}

pub struct BackendClient {
    base_url: String,
    http: Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/internals{}", self.base_url, path)
    }

    pub fn user_by_phone(&self, phone: &str) -> Result<Option<UserDetails>, BackendError> {
        self.fetch_user(&[("phone", phone.to_string())])
    }

    pub fn user_by_id(
        &self,
        user_id: i64,
        include_role: bool,
    ) -> Result<Option<UserDetails>, BackendError> {
        let mut params = vec![("user_id", user_id.to_string())];
        if include_role {
            params.push(("include_role", "true".to_string()));
        }
        self.fetch_user(&params)
    }

    fn fetch_user(&self, params: &[(&str, String)]) -> Result<Option<UserDetails>, BackendError> {
        let response = self
            .http
            .get(self.url("/user"))
            .timeout(LOOKUP_TIMEOUT)
            .query(params)
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response, "/user")?;
        Ok(Some(response.json()?))
    }

    /// The exactly-once-effect guard: has a turn tagged with this transport
    /// message id already been stored?
    pub fn message_exists(&self, message_id: &str) -> Result<bool, BackendError> {
        let path = format!("/idempotency/{message_id}");
        let response = self
            .http
            .get(self.url(&path))
            .timeout(LOOKUP_TIMEOUT)
            .send()?;
        let response = self.check(response, &path)?;
        let parsed: IdempotencyResponse = response.json()?;
        Ok(parsed.exists)
    }

    /// Persist one conversation turn, tagged with the idempotency key.
    pub fn store_message(
        &self,
        user_id: Option<i64>,
        text: &str,
        message_id: &str,
        direction: Direction,
    ) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.url("/message"))
            .timeout(LOOKUP_TIMEOUT)
            .json(&json!({
                "user_id": user_id,
                "direction": direction.as_str(),
                "channel": "whatsapp",
                "message_text": text,
                "payload": {"whatsapp_id": message_id},
            }))
            .send()?;
        self.check(response, "/message")?;
        Ok(())
    }

    /// Rolling context for the orchestrator, oldest first, roles already
    /// mapped from message direction.
    pub fn chat_history(&self, user_id: i64, limit: usize) -> Result<Vec<ChatTurn>, BackendError> {
        let path = format!("/history/{user_id}");
        let response = self
            .http
            .get(self.url(&path))
            .timeout(LOOKUP_TIMEOUT)
            .query(&[("limit", limit.to_string())])
            .send()?;
        let response = self.check(response, &path)?;
        Ok(response.json()?)
    }

    pub fn tasks_with_deadlines(&self) -> Result<Vec<DeadlineTask>, BackendError> {
        let response = self
            .http
            .get(self.url("/tasks-with-deadlines"))
            .timeout(SCHEDULER_TIMEOUT)
            .send()?;
        let response = self.check(response, "/tasks-with-deadlines")?;
        Ok(response.json()?)
    }

    pub fn users_for_daily_reports(&self) -> Result<Vec<ReportUser>, BackendError> {
        let response = self
            .http
            .get(self.url("/users-for-daily-reports"))
            .timeout(SCHEDULER_TIMEOUT)
            .send()?;
        let response = self.check(response, "/users-for-daily-reports")?;
        Ok(response.json()?)
    }

    pub fn personal_report(&self, user_id: i64) -> Result<PersonalReport, BackendError> {
        let path = format!("/daily-personal-report/{user_id}");
        let response = self
            .http
            .get(self.url(&path))
            .timeout(SCHEDULER_TIMEOUT)
            .send()?;
        let response = self.check(response, &path)?;
        Ok(response.json()?)
    }

    pub fn assigned_report(&self, user_id: i64) -> Result<AssignedReport, BackendError> {
        let path = format!("/daily-assigned-report/{user_id}");
        let response = self
            .http
            .get(self.url(&path))
            .timeout(SCHEDULER_TIMEOUT)
            .send()?;
        let response = self.check(response, &path)?;
        Ok(response.json()?)
    }

    fn check(
        &self,
        response: reqwest::blocking::Response,
        path: &str,
    ) -> Result<reqwest::blocking::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(BackendError::Unexpected {
                status: response.status().as_u16(),
                path: path.to_string(),
            })
        }
    }
}
