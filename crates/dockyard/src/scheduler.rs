// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-id timers driven by cron expressions or fixed delays.
//!
//! [`TaskScheduler`] keeps at most one live timer per id. All mutations of
//! the task map go through one async lock, so concurrent create/update/delete
//! calls cannot lose updates. Cancelling a timer does not wait: a callback
//! that is already running finishes, and no further invocation starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Unit of a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn duration(&self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// Schedule variants, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    /// Cron expression, with or without a seconds field.
    Cron { cron: String },
    /// Fixed delay between the end of one invocation and the start of the next.
    #[serde(rename_all = "camelCase")]
    FixedDelay { delay: u64, time_unit: TimeUnit },
}

/// A schedule with its enabled flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub on: bool,
    #[serde(flatten)]
    pub kind: ScheduleKind,
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            on: true,
            kind: ScheduleKind::Cron {
                cron: expression.into(),
            },
        }
    }

    pub fn fixed_delay(delay: u64, time_unit: TimeUnit) -> Self {
        Self {
            on: true,
            kind: ScheduleKind::FixedDelay { delay, time_unit },
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ScheduleKind::Cron { cron } => write!(f, "cron '{cron}'"),
            ScheduleKind::FixedDelay { delay, time_unit } => {
                write!(f, "fixed delay {delay} {time_unit:?}")
            }
        }
    }
}

/// When a timer fires next.
pub enum Trigger {
    Cron(Box<croner::Cron>),
    FixedDelay(Duration),
}

impl Trigger {
    /// Build the trigger for a schedule variant.
    pub fn from_kind(kind: &ScheduleKind) -> Result<Self> {
        match kind {
            ScheduleKind::Cron { cron } => croner::Cron::new(cron)
                .with_seconds_optional()
                .parse()
                .map(|c| Trigger::Cron(Box::new(c)))
                .map_err(|e| Error::InvalidSchedule(format!("{cron}: {e}"))),
            ScheduleKind::FixedDelay { delay, time_unit } => {
                if *delay == 0 {
                    return Err(Error::InvalidSchedule("delay must be positive".to_string()));
                }
                Ok(Trigger::FixedDelay(time_unit.duration(*delay)))
            }
        }
    }

    /// Wait before the next invocation; `None` when the trigger never fires again.
    fn next_wait(&self, first: bool) -> Option<Duration> {
        match self {
            Trigger::Cron(cron) => {
                let now = Local::now();
                let next = cron.find_next_occurrence(&now, false).ok()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
            Trigger::FixedDelay(_) if first => Some(Duration::ZERO),
            Trigger::FixedDelay(delay) => Some(*delay),
        }
    }
}

/// Callback invoked on every tick.
pub type TaskCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledTask {
    schedule: Schedule,
    token: CancellationToken,
}

/// Keeps one timer per id.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install, replace, or remove the timer for `id`.
    ///
    /// A schedule equal to the registered one is a no-op. `None` or a
    /// disabled schedule removes the timer.
    pub async fn create_or_update_task(
        &self,
        id: &str,
        schedule: Option<&Schedule>,
        callback: TaskCallback,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if tasks.get(id).map(|t| &t.schedule) == schedule {
            debug!(task = %id, "Schedule unchanged");
            return Ok(());
        }

        let Some(schedule) = schedule.filter(|s| s.on) else {
            if let Some(task) = tasks.remove(id) {
                task.token.cancel();
                info!(task = %id, "Stopped task");
            }
            return Ok(());
        };

        let trigger = Trigger::from_kind(&schedule.kind)?;
        if let Some(previous) = tasks.remove(id) {
            previous.token.cancel();
            info!(task = %id, "Stopped task");
        }

        let token = CancellationToken::new();
        tokio::spawn(run_timer(id.to_string(), trigger, callback, token.clone()));
        tasks.insert(
            id.to_string(),
            ScheduledTask {
                schedule: schedule.clone(),
                token,
            },
        );
        info!(task = %id, schedule = %schedule, "Created task");
        Ok(())
    }

    /// Cancel and forget the timer for `id`.
    pub async fn delete_task(&self, id: &str) {
        if let Some(task) = self.tasks.lock().await.remove(id) {
            task.token.cancel();
            info!(task = %id, "Stopped task");
        }
    }

    /// Cancel and forget every timer.
    pub async fn delete_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (id, task) in tasks.drain() {
            task.token.cancel();
            info!(task = %id, "Stopped task");
        }
    }

    /// Schedule currently registered for `id`.
    pub async fn schedule_of(&self, id: &str) -> Option<Schedule> {
        self.tasks.lock().await.get(id).map(|t| t.schedule.clone())
    }

    pub async fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn run_timer(id: String, trigger: Trigger, callback: TaskCallback, token: CancellationToken) {
    let mut first = true;
    loop {
        let Some(wait) = trigger.next_wait(first) else {
            warn!(task = %id, "Trigger has no further occurrences");
            return;
        };
        first = false;

        tokio::select! {
            _ = token.cancelled() => {
                debug!(task = %id, "Timer cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(task = %id, "Running scheduled task");
        callback().await;
    }
}
