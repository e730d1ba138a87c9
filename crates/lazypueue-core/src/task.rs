use chrono::{DateTime, Utc};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub type TaskId = usize;

/// Status vocabulary mirrored from the daemon. Anything the client cannot map
/// lands in `Unknown` and is shown but never acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Queued,
    Stashed,
    Running,
    Paused,
    DoneSuccess,
    DoneFailed,
    DoneKilled,
    Unknown(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Stashed => "stashed",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::DoneSuccess => "done-success",
            TaskStatus::DoneFailed => "done-failed",
            TaskStatus::DoneKilled => "done-killed",
            TaskStatus::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            TaskStatus::DoneSuccess | TaskStatus::DoneFailed | TaskStatus::DoneKilled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Paused
        )
    }

    /// Queued or stashed: not started yet, so it can be reordered or edited.
    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Stashed)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TaskStatus::Unknown(_))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daemon task as the dashboard sees it.
///
/// `command` is what the daemon runs (aliases expanded); `original_command`
/// is what was submitted and what restart and edit work from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub group: String,
    pub command: String,
    pub original_command: String,
    pub label: Option<String>,
    pub path: Option<PathBuf>,
    pub priority: i32,
    pub status: TaskStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub log_offset: Option<u64>,
}

impl Task {
    pub fn new(id: TaskId, group: &str, command: &str, status: TaskStatus) -> Self {
        Self {
            id,
            group: group.to_string(),
            command: command.to_string(),
            original_command: command.to_string(),
            label: None,
            path: None,
            priority: 0,
            status,
            start: None,
            end: None,
            exit_code: None,
            log_offset: None,
        }
    }

    /// Elapsed run time; open-ended tasks are measured up to `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let start = self.start?;
        let end = self.end.unwrap_or(now);
        Some(end - start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    /// `None` when the daemon runs any number of the group's tasks at once.
    pub parallel_tasks: Option<NonZeroUsize>,
    pub paused: bool,
}

impl Group {
    /// `parallel_tasks` uses the daemon's encoding: `0` means unlimited.
    pub fn new(name: &str, parallel_tasks: usize, paused: bool) -> Self {
        Self {
            name: name.to_string(),
            parallel_tasks: NonZeroUsize::new(parallel_tasks),
            paused,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.parallel_tasks.is_none()
    }

    pub fn limit_label(&self) -> String {
        match self.parallel_tasks {
            Some(limit) => limit.to_string(),
            None => "unlimited".to_string(),
        }
    }
}
