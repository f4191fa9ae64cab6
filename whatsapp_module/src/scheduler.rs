//! Deadline reminders and daily summary reports.
//!
//! Two periodic jobs, each on its own thread so runs of the same job can
//! never overlap. Reminder tracking lives in process memory and is owned by
//! the deadline thread alone; a restart may re-send at most one tier per
//! task, which is an accepted trade-off.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use cron::Schedule as CronSchedule;
use tracing::{info, warn};

use crate::backend::{BackendClient, DeadlineTask};
use crate::config::WorkerConfig;
use crate::send::{render_assigned_report, render_deadline_message, render_personal_report, WhatsAppSender};

/// The single most-urgent applicable notification state for a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderTier {
    Warning,
    Imminent,
    Overdue,
}

impl ReminderTier {
    pub fn label(self) -> &'static str {
        match self {
            ReminderTier::Warning => "60min",
            ReminderTier::Imminent => "10min",
            ReminderTier::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReminderThresholds {
    pub warning_minutes: i64,
    pub imminent_minutes: i64,
}

impl ReminderThresholds {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            warning_minutes: config.reminder_warning_minutes,
            imminent_minutes: config.reminder_imminent_minutes,
        }
    }
}

/// Classify minutes-until-deadline into exactly one tier, most urgent wins.
pub fn classify_tier(minutes_until: f64, thresholds: &ReminderThresholds) -> Option<ReminderTier> {
    if minutes_until <= 0.0 {
        Some(ReminderTier::Overdue)
    } else if minutes_until <= thresholds.imminent_minutes as f64 {
        Some(ReminderTier::Imminent)
    } else if minutes_until <= thresholds.warning_minutes as f64 {
        Some(ReminderTier::Warning)
    } else {
        None
    }
}

/// Per-task record of tiers already notified. Grows monotonically per task
/// until the task leaves the active window, then the entry is dropped.
#[derive(Debug, Default)]
pub struct SentReminders {
    sent: HashMap<i64, HashSet<ReminderTier>>,
}

impl SentReminders {
    pub fn should_send(&self, task_id: i64, tier: ReminderTier) -> bool {
        self.sent
            .get(&task_id)
            .map(|tiers| !tiers.contains(&tier))
            .unwrap_or(true)
    }

    pub fn mark_sent(&mut self, task_id: i64, tier: ReminderTier) {
        self.sent.entry(task_id).or_default().insert(tier);
    }

    /// Drop tracking for tasks no longer in the active set; bounds memory
    /// growth across long uptimes.
    pub fn retain_active(&mut self, active: &HashSet<i64>) {
        self.sent.retain(|task_id, _| active.contains(task_id));
    }

    pub fn tracked_tasks(&self) -> usize {
        self.sent.len()
    }
}

/// One pass of the deadline job: fetch active tasks, send the applicable
/// tier for each at most once, then prune tracking.
pub fn run_deadline_sweep(
    backend: &BackendClient,
    sender: &WhatsAppSender,
    tracking: &mut SentReminders,
    thresholds: &ReminderThresholds,
    now: DateTime<Utc>,
) {
    let tasks = match backend.tasks_with_deadlines() {
        Ok(tasks) => tasks,
        Err(err) => {
            // Tracking stays untouched so the next cycle retries naturally.
            warn!("deadline sweep skipped, task fetch failed: {}", err);
            return;
        }
    };

    let mut active_task_ids = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if task.assignees.is_empty() {
            continue;
        }
        active_task_ids.insert(task.id);

        let Some(deadline) = parse_deadline(&task.deadline) else {
            warn!("task {} has unparsable deadline {:?}", task.id, task.deadline);
            continue;
        };

        let minutes_until = (deadline - now).num_seconds() as f64 / 60.0;
        let Some(tier) = classify_tier(minutes_until, thresholds) else {
            continue;
        };
        if !tracking.should_send(task.id, tier) {
            continue;
        }

        notify_assignees(sender, task, tier, &deadline);
        tracking.mark_sent(task.id, tier);
    }

    tracking.retain_active(&active_task_ids);
}

fn notify_assignees(
    sender: &WhatsAppSender,
    task: &DeadlineTask,
    tier: ReminderTier,
    deadline: &DateTime<Utc>,
) {
    let deadline_display = deadline.format("%Y-%m-%d %H:%M").to_string();
    let message = render_deadline_message(tier, task, &deadline_display);
    let mut recipients = 0;
    for assignee in &task.assignees {
        if let Some(phone) = assignee.phone.as_deref() {
            sender.send_best_effort(phone, &message);
            recipients += 1;
        }
    }
    info!(
        "sent {} reminder for task {} to {} assignee(s)",
        tier.label(),
        task.id,
        recipients
    );
}

/// Accept both offset-carrying ISO-8601 and naive timestamps (assumed UTC).
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// One pass of the daily-report job.
pub fn run_daily_reports(backend: &BackendClient, sender: &WhatsAppSender) {
    let users = match backend.users_for_daily_reports() {
        Ok(users) => users,
        Err(err) => {
            warn!("daily reports skipped, user fetch failed: {}", err);
            return;
        }
    };

    let mut sent = 0;
    for user in &users {
        let Some(phone) = user.phone.as_deref() else {
            continue;
        };

        match backend.personal_report(user.id) {
            Ok(report) => {
                sender.send_best_effort(phone, &render_personal_report(&user.name, &report));
                sent += 1;
            }
            Err(err) => warn!("personal report for user {} failed: {}", user.id, err),
        }

        if user.can_assign {
            match backend.assigned_report(user.id) {
                Ok(report) if !report.assigned_tasks.is_empty() => {
                    sender.send_best_effort(phone, &render_assigned_report(&user.name, &report));
                    sent += 1;
                }
                Ok(_) => {}
                Err(err) => warn!("assigned report for user {} failed: {}", user.id, err),
            }
        }
    }
    info!("daily reports complete: {} message(s) sent", sent);
}

/// Next local occurrence of the daily report time after `after`.
pub fn next_daily_run(
    hour: u32,
    minute: u32,
    after: DateTime<Local>,
) -> Option<DateTime<Local>> {
    let expression = format!("0 {minute} {hour} * * *");
    let schedule = CronSchedule::from_str(&expression).ok()?;
    schedule.after(&after).next()
}

pub struct SchedulerControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl SchedulerControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Start the deadline thread and the daily-report thread.
pub fn start_scheduler_threads(
    config: Arc<WorkerConfig>,
    backend: Arc<BackendClient>,
    sender: Arc<WhatsAppSender>,
) -> SchedulerControl {
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(2);

    {
        let stop = stop.clone();
        let backend = backend.clone();
        let sender = sender.clone();
        let thresholds = ReminderThresholds::from_config(&config);
        let interval = config.reminder_check_interval;
        handles.push(thread::spawn(move || {
            info!(
                "deadline reminder job started (every {:?}, warn {}m / imminent {}m)",
                interval, thresholds.warning_minutes, thresholds.imminent_minutes
            );
            let mut tracking = SentReminders::default();
            while !stop.load(Ordering::Relaxed) {
                run_deadline_sweep(&backend, &sender, &mut tracking, &thresholds, Utc::now());
                sleep_unless_stopped(&stop, interval);
            }
        }));
    }

    {
        let stop = stop.clone();
        let hour = config.daily_report_hour;
        let minute = config.daily_report_minute;
        handles.push(thread::spawn(move || {
            info!("daily report job started (at {:02}:{:02} local)", hour, minute);
            while !stop.load(Ordering::Relaxed) {
                let Some(next) = next_daily_run(hour, minute, Local::now()) else {
                    warn!("daily report job could not compute next run, stopping");
                    return;
                };
                while Local::now() < next {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(Duration::from_secs(1));
                }
                run_daily_reports(&backend, &sender);
            }
        }));
    }

    SchedulerControl { stop, handles }
}

fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) {
    let mut remaining = duration;
    let slice = Duration::from_secs(1);
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
