//! Turns user intents into daemon calls and tracks them until they resolve.
//!
//! The dispatcher never talks to the socket. It queues [`AdapterRequest::Execute`]
//! on the adapter channel and later receives the outcome through
//! [`CommandDispatcher::resolve`], matched by [`CommandHandle`].

use crate::adapter::AdapterRequest;
use crate::errors::{CommandAlreadyPending, DaemonError, DispatchError};
use crate::task::{Task, TaskId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const COMMAND_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_COMMAND_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    Pause,
    Resume,
    Kill,
    Restart,
    Remove,
    Add,
    Stash,
    Enqueue,
    Switch,
    Parallel,
    Clean,
    Edit,
    EditRestore,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Kill => "kill",
            CommandKind::Restart => "restart",
            CommandKind::Remove => "remove",
            CommandKind::Add => "add",
            CommandKind::Stash => "stash",
            CommandKind::Enqueue => "enqueue",
            CommandKind::Switch => "switch",
            CommandKind::Parallel => "parallel",
            CommandKind::Clean => "clean",
            CommandKind::Edit => "edit",
            CommandKind::EditRestore => "edit-restore",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelection {
    Tasks(Vec<TaskId>),
    Group(String),
    All,
}

impl TaskSelection {
    fn task_ids(&self) -> &[TaskId] {
        match self {
            TaskSelection::Tasks(ids) => ids,
            TaskSelection::Group(_) | TaskSelection::All => &[],
        }
    }

    fn describe(&self) -> String {
        match self {
            TaskSelection::Tasks(ids) => describe_ids(ids),
            TaskSelection::Group(name) => format!("group {name}"),
            TaskSelection::All => "all groups".to_string(),
        }
    }
}

/// The editable part of a task: what a restart re-submits and what an edit
/// sends back to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub task_id: TaskId,
    pub command: String,
    pub path: PathBuf,
    pub label: Option<String>,
    pub priority: i32,
}

impl TaskDraft {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            command: task.original_command.clone(),
            path: task.path.clone().unwrap_or_default(),
            label: task.label.clone(),
            priority: task.priority,
        }
    }
}

/// A control operation the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause(TaskSelection),
    Resume(TaskSelection),
    Kill(TaskSelection),
    Restart { tasks: Vec<TaskDraft> },
    Remove { task_ids: Vec<TaskId> },
    Add { command: String, group: String },
    Stash { task_ids: Vec<TaskId> },
    Enqueue { task_ids: Vec<TaskId> },
    Switch { first: TaskId, second: TaskId },
    /// `limit` 0 lifts the group's limit entirely.
    Parallel { group: String, limit: usize },
    Clean { group: Option<String> },
    /// Submit an edited task. The daemon locked it when the edit began.
    Edit(TaskDraft),
    /// Abandon an edit and unlock the task unchanged.
    EditRestore { task_id: TaskId },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Pause(_) => CommandKind::Pause,
            Command::Resume(_) => CommandKind::Resume,
            Command::Kill(_) => CommandKind::Kill,
            Command::Restart { .. } => CommandKind::Restart,
            Command::Remove { .. } => CommandKind::Remove,
            Command::Add { .. } => CommandKind::Add,
            Command::Stash { .. } => CommandKind::Stash,
            Command::Enqueue { .. } => CommandKind::Enqueue,
            Command::Switch { .. } => CommandKind::Switch,
            Command::Parallel { .. } => CommandKind::Parallel,
            Command::Clean { .. } => CommandKind::Clean,
            Command::Edit(_) => CommandKind::Edit,
            Command::EditRestore { .. } => CommandKind::EditRestore,
        }
    }

    /// Task ids this command occupies. Group-wide and global commands
    /// occupy none and therefore never block anything.
    pub fn targets(&self) -> Vec<TaskId> {
        match self {
            Command::Pause(selection) | Command::Resume(selection) | Command::Kill(selection) => {
                selection.task_ids().to_vec()
            }
            Command::Restart { tasks } => tasks.iter().map(|draft| draft.task_id).collect(),
            Command::Remove { task_ids }
            | Command::Stash { task_ids }
            | Command::Enqueue { task_ids } => task_ids.clone(),
            Command::Switch { first, second } => vec![*first, *second],
            Command::Edit(draft) => vec![draft.task_id],
            Command::EditRestore { task_id } => vec![*task_id],
            Command::Add { .. } | Command::Parallel { .. } | Command::Clean { .. } => Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Command::Pause(selection) => format!("pause {}", selection.describe()),
            Command::Resume(selection) => format!("resume {}", selection.describe()),
            Command::Kill(selection) => format!("kill {}", selection.describe()),
            Command::Restart { tasks } => {
                let ids: Vec<TaskId> = tasks.iter().map(|draft| draft.task_id).collect();
                format!("restart {}", describe_ids(&ids))
            }
            Command::Remove { task_ids } => format!("remove {}", describe_ids(task_ids)),
            Command::Add { command, group } => format!("add '{command}' to {group}"),
            Command::Stash { task_ids } => format!("stash {}", describe_ids(task_ids)),
            Command::Enqueue { task_ids } => format!("enqueue {}", describe_ids(task_ids)),
            Command::Switch { first, second } => format!("switch tasks {first} and {second}"),
            Command::Parallel { group, limit: 0 } => format!("set {group} parallel to unlimited"),
            Command::Parallel { group, limit } => format!("set {group} parallel to {limit}"),
            Command::Clean { group: Some(group) } => format!("clean finished in {group}"),
            Command::Clean { group: None } => "clean finished tasks".to_string(),
            Command::Edit(draft) => format!("edit task {}", draft.task_id),
            Command::EditRestore { task_id } => format!("release task {task_id}"),
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        let invalid = match self {
            Command::Pause(TaskSelection::Tasks(ids))
            | Command::Resume(TaskSelection::Tasks(ids))
            | Command::Kill(TaskSelection::Tasks(ids))
            | Command::Remove { task_ids: ids }
            | Command::Stash { task_ids: ids }
            | Command::Enqueue { task_ids: ids } => ids.is_empty().then_some("no task selected"),
            Command::Restart { tasks } => tasks.is_empty().then_some("no task selected"),
            Command::Add { command, .. } | Command::Edit(TaskDraft { command, .. }) => {
                command.trim().is_empty().then_some("empty command")
            }
            Command::Switch { first, second } => {
                (first == second).then_some("cannot switch a task with itself")
            }
            _ => None,
        };
        match invalid {
            Some(reason) => Err(DispatchError::Invalid(reason.to_string())),
            None => Ok(()),
        }
    }
}

fn describe_ids(ids: &[TaskId]) -> String {
    match ids {
        [id] => format!("task {id}"),
        ids => {
            let joined = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!("tasks {joined}")
        }
    }
}

/// The daemon's confirmation of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandHandle(u64);

impl CommandHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub handle: CommandHandle,
    pub command: Command,
    pub submitted_at: Instant,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed {
        command: Command,
        outcome: CommandResult,
    },
    Retrying {
        command: Command,
        attempt: u32,
        error: DaemonError,
    },
    Failed {
        command: Command,
        error: DaemonError,
    },
    /// The handle is not pending (already resolved, or never ours).
    Unknown,
}

pub struct CommandDispatcher {
    outbound: mpsc::Sender<AdapterRequest>,
    pending: BTreeMap<CommandHandle, PendingCommand>,
    claims: HashMap<(TaskId, CommandKind), CommandHandle>,
    next_handle: u64,
    max_retries: u32,
}

impl CommandDispatcher {
    pub fn new(outbound: mpsc::Sender<AdapterRequest>, max_retries: u32) -> Self {
        Self {
            outbound,
            pending: BTreeMap::new(),
            claims: HashMap::new(),
            next_handle: 0,
            max_retries,
        }
    }

    pub fn submit(&mut self, command: Command) -> Result<CommandHandle, DispatchError> {
        command.validate()?;
        let kind = command.kind();
        let targets = command.targets();
        if let Some(task_id) = targets
            .iter()
            .copied()
            .find(|task_id| self.claims.contains_key(&(*task_id, kind)))
        {
            debug!(event = "command_already_pending", task_id, kind = kind.as_str());
            return Err(CommandAlreadyPending { task_id, kind }.into());
        }

        self.next_handle = self.next_handle.saturating_add(1);
        let handle = CommandHandle(self.next_handle);
        let request = AdapterRequest::Execute {
            handle,
            command: command.clone(),
        };
        match self.outbound.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "command_queue_drop",
                    reason = "queue_full",
                    command = kind.as_str(),
                    pending = self.pending.len(),
                    capacity = COMMAND_QUEUE_CAPACITY
                );
                return Err(DispatchError::QueueFull);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    event = "command_queue_drop",
                    reason = "channel_closed",
                    command = kind.as_str(),
                    pending = self.pending.len()
                );
                return Err(DispatchError::ChannelClosed);
            }
        }

        for task_id in targets {
            self.claims.insert((task_id, kind), handle);
        }
        info!(
            event = "command_submitted",
            handle = handle.get(),
            command = %command.describe()
        );
        self.pending.insert(
            handle,
            PendingCommand {
                handle,
                command,
                submitted_at: Instant::now(),
                retries: 0,
            },
        );
        Ok(handle)
    }

    /// Settle a daemon outcome. Transient failures are re-sent under the same
    /// handle until the retry budget runs out.
    pub fn resolve(
        &mut self,
        handle: CommandHandle,
        result: Result<CommandResult, DaemonError>,
    ) -> Resolution {
        let Some(pending) = self.pending.get_mut(&handle) else {
            debug!(event = "command_result_unmatched", handle = handle.get());
            return Resolution::Unknown;
        };

        let error = match result {
            Ok(outcome) => {
                let command = pending.command.clone();
                let elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64;
                self.retire(handle);
                info!(
                    event = "command_confirmed",
                    handle = handle.get(),
                    command = %command.describe(),
                    elapsed_ms
                );
                return Resolution::Confirmed { command, outcome };
            }
            Err(error) => error,
        };

        if error.is_transient() && pending.retries < self.max_retries {
            pending.retries += 1;
            let attempt = pending.retries;
            let command = pending.command.clone();
            let resend = AdapterRequest::Execute {
                handle,
                command: command.clone(),
            };
            if self.outbound.try_send(resend).is_ok() {
                warn!(
                    event = "command_retry",
                    handle = handle.get(),
                    attempt,
                    error = %error
                );
                return Resolution::Retrying {
                    command,
                    attempt,
                    error,
                };
            }
            warn!(event = "command_retry_dropped", handle = handle.get());
        }

        let command = pending.command.clone();
        self.retire(handle);
        warn!(
            event = "command_failed",
            handle = handle.get(),
            command = %command.describe(),
            error = %error
        );
        Resolution::Failed { command, error }
    }

    fn retire(&mut self, handle: CommandHandle) -> Option<PendingCommand> {
        let pending = self.pending.remove(&handle)?;
        let kind = pending.command.kind();
        for task_id in pending.command.targets() {
            if self.claims.get(&(task_id, kind)) == Some(&handle) {
                self.claims.remove(&(task_id, kind));
            }
        }
        Some(pending)
    }

    pub fn is_pending(&self, task_id: TaskId, kind: CommandKind) -> bool {
        self.claims.contains_key(&(task_id, kind))
    }

    pub fn has_pending_for(&self, task_id: TaskId) -> bool {
        self.claims.keys().any(|(id, _)| *id == task_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn outbound(&self) -> &mpsc::Sender<AdapterRequest> {
        &self.outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DispatchError;
    use crate::task::TaskStatus;

    fn dispatcher(capacity: usize) -> (CommandDispatcher, mpsc::Receiver<AdapterRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (CommandDispatcher::new(tx, DEFAULT_COMMAND_RETRIES), rx)
    }

    fn executed(rx: &mut mpsc::Receiver<AdapterRequest>) -> Vec<(CommandHandle, Command)> {
        let mut out = Vec::new();
        while let Ok(request) = rx.try_recv() {
            if let AdapterRequest::Execute { handle, command } = request {
                out.push((handle, command));
            }
        }
        out
    }

    #[test]
    fn duplicate_submit_is_rejected_locally() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        let pause = Command::Pause(TaskSelection::Tasks(vec![7]));
        let first = dispatcher.submit(pause.clone()).expect("first pause");
        let second = dispatcher.submit(pause);
        assert_eq!(
            second,
            Err(DispatchError::AlreadyPending(CommandAlreadyPending {
                task_id: 7,
                kind: CommandKind::Pause
            }))
        );
        let calls = executed(&mut rx);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, first);
        assert!(dispatcher.is_pending(7, CommandKind::Pause));
    }

    #[test]
    fn different_kind_on_same_task_is_allowed() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        dispatcher
            .submit(Command::Pause(TaskSelection::Tasks(vec![7])))
            .expect("pause");
        dispatcher
            .submit(Command::Kill(TaskSelection::Tasks(vec![7])))
            .expect("kill");
        assert_eq!(executed(&mut rx).len(), 2);
        assert_eq!(dispatcher.len(), 2);
    }

    #[test]
    fn sequential_commands_get_distinct_handles() {
        let (mut dispatcher, _rx) = dispatcher(8);
        let pause = Command::Pause(TaskSelection::Tasks(vec![3]));
        let first = dispatcher.submit(pause.clone()).expect("first");
        let resolved = dispatcher.resolve(first, Ok(CommandResult::default()));
        assert!(matches!(resolved, Resolution::Confirmed { .. }));
        assert!(!dispatcher.is_pending(3, CommandKind::Pause));

        let second = dispatcher.submit(pause).expect("second");
        assert_ne!(first, second);
        assert_eq!(
            dispatcher.resolve(first, Ok(CommandResult::default())),
            Resolution::Unknown
        );
        assert!(dispatcher.is_pending(3, CommandKind::Pause));
    }

    #[test]
    fn transient_failure_is_retried_once_under_the_same_handle() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        let handle = dispatcher
            .submit(Command::Kill(TaskSelection::Tasks(vec![2])))
            .expect("kill");
        let first = dispatcher.resolve(handle, Err(DaemonError::Timeout));
        assert!(matches!(first, Resolution::Retrying { attempt: 1, .. }));
        assert!(dispatcher.is_pending(2, CommandKind::Kill));

        let second = dispatcher.resolve(handle, Err(DaemonError::Disconnected));
        assert!(matches!(
            second,
            Resolution::Failed {
                error: DaemonError::Disconnected,
                ..
            }
        ));
        assert!(dispatcher.is_empty());
        let calls = executed(&mut rx);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(sent, _)| *sent == handle));
    }

    #[test]
    fn rejection_is_surfaced_without_retry() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        let handle = dispatcher
            .submit(Command::Remove { task_ids: vec![9] })
            .expect("remove");
        let rejected = DaemonError::Rejected("no such task".to_string());
        let outcome = dispatcher.resolve(handle, Err(rejected));
        assert!(matches!(
            outcome,
            Resolution::Failed {
                error: DaemonError::Rejected(_),
                ..
            }
        ));
        assert_eq!(executed(&mut rx).len(), 1);
        assert!(!dispatcher.is_pending(9, CommandKind::Remove));
    }

    #[test]
    fn group_and_global_commands_block_nothing() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        dispatcher
            .submit(Command::Pause(TaskSelection::Group("gpu".to_string())))
            .expect("group pause");
        dispatcher
            .submit(Command::Pause(TaskSelection::Group("gpu".to_string())))
            .expect("second group pause");
        dispatcher
            .submit(Command::Pause(TaskSelection::All))
            .expect("pause all");
        dispatcher
            .submit(Command::Pause(TaskSelection::Tasks(vec![1])))
            .expect("task pause");
        dispatcher.submit(Command::Clean { group: None }).expect("clean");
        assert_eq!(executed(&mut rx).len(), 5);
        assert_eq!(dispatcher.len(), 5);
    }

    #[test]
    fn full_or_closed_queue_is_reported() {
        let (mut dispatcher, rx) = dispatcher(1);
        dispatcher
            .submit(Command::Stash { task_ids: vec![1] })
            .expect("fits");
        assert_eq!(
            dispatcher.submit(Command::Stash { task_ids: vec![2] }),
            Err(DispatchError::QueueFull)
        );
        assert!(!dispatcher.is_pending(2, CommandKind::Stash));
        drop(rx);
        assert_eq!(
            dispatcher.submit(Command::Enqueue { task_ids: vec![3] }),
            Err(DispatchError::ChannelClosed)
        );
    }

    #[test]
    fn invalid_commands_never_leave_the_client() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        assert!(matches!(
            dispatcher.submit(Command::Add {
                command: "   ".to_string(),
                group: "default".to_string()
            }),
            Err(DispatchError::Invalid(_))
        ));
        let mut draft = TaskDraft::from_task(&Task::new(4, "default", "make", TaskStatus::Queued));
        draft.command = String::new();
        assert!(matches!(
            dispatcher.submit(Command::Edit(draft)),
            Err(DispatchError::Invalid(_))
        ));
        assert!(matches!(
            dispatcher.submit(Command::Switch { first: 3, second: 3 }),
            Err(DispatchError::Invalid(_))
        ));
        assert!(executed(&mut rx).is_empty());

        dispatcher
            .submit(Command::Parallel {
                group: "default".to_string(),
                limit: 0,
            })
            .expect("unlimited is a valid limit");
        assert_eq!(executed(&mut rx).len(), 1);
    }

    #[test]
    fn descriptions_and_targets() {
        let resume = Command::Resume(TaskSelection::Tasks(vec![4, 5]));
        assert_eq!(resume.describe(), "resume tasks 4,5");
        assert_eq!(
            Command::Switch { first: 1, second: 2 }.targets(),
            vec![1, 2]
        );
        assert!(Command::Kill(TaskSelection::All).targets().is_empty());
        let unlimited = Command::Parallel {
            group: "gpu".to_string(),
            limit: 0,
        };
        assert_eq!(unlimited.describe(), "set gpu parallel to unlimited");

        let mut task = Task::new(8, "default", "make   all", TaskStatus::DoneFailed);
        task.original_command = "make all".to_string();
        task.label = Some("build".to_string());
        task.priority = 2;
        let restart = Command::Restart {
            tasks: vec![TaskDraft::from_task(&task)],
        };
        assert_eq!(restart.targets(), vec![8]);
        assert_eq!(restart.describe(), "restart task 8");
        let Command::Restart { tasks } = restart else {
            unreachable!()
        };
        assert_eq!(tasks[0].command, "make all");
        assert_eq!(tasks[0].priority, 2);
        assert_eq!(tasks[0].label.as_deref(), Some("build"));
    }

    #[test]
    fn edit_and_release_claim_the_task() {
        let (mut dispatcher, mut rx) = dispatcher(8);
        let task = Task::new(6, "default", "sleep 5", TaskStatus::Queued);
        let mut draft = TaskDraft::from_task(&task);
        draft.command = "sleep 50".to_string();
        dispatcher.submit(Command::Edit(draft.clone())).expect("edit");
        assert!(dispatcher.is_pending(6, CommandKind::Edit));
        assert!(matches!(
            dispatcher.submit(Command::Edit(draft)),
            Err(DispatchError::AlreadyPending(_))
        ));
        dispatcher
            .submit(Command::EditRestore { task_id: 6 })
            .expect("restore is a different kind");
        assert_eq!(executed(&mut rx).len(), 2);
    }
}
