//! Application state owned by the event loop.
//!
//! Everything the dashboard shows lives in [`AppState`]: the view model, the
//! selection, the command dispatcher, the current input mode and the status
//! line. Only the loop mutates it; renderers get a shared reference.

use crate::adapter::{AdapterRequest, DaemonEvent, LogChunk};
use crate::config::ClientConfig;
use crate::dispatcher::{Command, CommandDispatcher, Resolution, TaskDraft, TaskSelection};
use crate::errors::{DaemonError, LoopError};
use crate::input::TextInput;
use crate::keymap::{self, Action, ConfirmAction, InputAction, LogAction};
use crate::protocol::DEFAULT_GROUP;
use crate::selection::{Row, SelectionState};
use crate::snapshot::Snapshot;
use crate::task::{Task, TaskId, TaskStatus};
use crate::view_model::{DiffSummary, TaskViewModel};
use crossterm::event::{Event, KeyEvent};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const NOTE_TTL: Duration = Duration::from_secs(4);
const LOG_PAGE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected(String),
    Reconnecting { attempt: u32, delay: Duration },
    Failed(String),
}

impl ConnectionStatus {
    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Connecting => "connecting".to_string(),
            ConnectionStatus::Connected => "connected".to_string(),
            ConnectionStatus::Disconnected(_) => "disconnected".to_string(),
            ConnectionStatus::Reconnecting { attempt, .. } => format!("reconnecting #{attempt}"),
            ConnectionStatus::Failed(_) => "failed".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNote {
    pub text: String,
    pub severity: Severity,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirm {
    pub prompt: String,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogView {
    pub task_id: TaskId,
    pub text: String,
    pub error: Option<String>,
    pub scroll: usize,
    pub follow: bool,
    pub loading: bool,
}

impl LogView {
    fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            text: String::new(),
            error: None,
            scroll: 0,
            follow: false,
            loading: true,
        }
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    fn max_scroll(&self) -> usize {
        self.line_count().saturating_sub(1)
    }

    fn scroll_by(&mut self, delta: isize) {
        let next = (self.scroll as isize + delta).clamp(0, self.max_scroll() as isize);
        self.scroll = next as usize;
    }
}

/// A task the daemon has locked for us while its command is being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditView {
    pub draft: TaskDraft,
    pub input: TextInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Input(TextInput),
    Confirm(PendingConfirm),
    Log(LogView),
    Edit(EditView),
}

pub struct AppState {
    model: TaskViewModel,
    selection: SelectionState,
    dispatcher: CommandDispatcher,
    requests: mpsc::Sender<AdapterRequest>,
    mode: Mode,
    connection: ConnectionStatus,
    note: Option<StatusNote>,
    last_diff: DiffSummary,
    refresh_in_flight: bool,
    log_lines: usize,
    fatal: Option<LoopError>,
    exit: bool,
}

impl AppState {
    pub fn new(config: &ClientConfig, requests: mpsc::Sender<AdapterRequest>) -> Self {
        Self {
            model: TaskViewModel::new(config.transition_policy),
            selection: SelectionState::new(),
            dispatcher: CommandDispatcher::new(requests.clone(), config.command_retries),
            requests,
            mode: Mode::Normal,
            connection: ConnectionStatus::Connecting,
            note: None,
            last_diff: DiffSummary::default(),
            refresh_in_flight: false,
            log_lines: config.log_lines,
            fatal: None,
            exit: false,
        }
    }

    pub fn model(&self) -> &TaskViewModel {
        &self.model
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.model.snapshot()
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.snapshot().task(self.selection.selected()?)
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn last_diff(&self) -> &DiffSummary {
        &self.last_diff
    }

    /// The status note, unless it has expired by `now`.
    pub fn note_at(&self, now: Instant) -> Option<&StatusNote> {
        self.note.as_ref().filter(|note| note.expires_at > now)
    }

    pub fn should_quit(&self) -> bool {
        self.exit
    }

    pub fn request_quit(&mut self) {
        self.exit = true;
    }

    pub fn take_fatal(&mut self) -> Option<LoopError> {
        self.fatal.take()
    }

    pub fn set_viewport(&mut self, height: usize) {
        self.selection.set_viewport(height);
    }

    fn set_note(&mut self, severity: Severity, text: impl Into<String>) {
        self.note = Some(StatusNote {
            text: text.into(),
            severity,
            expires_at: Instant::now() + NOTE_TTL,
        });
    }

    /// Apply a terminal event. Returns whether anything visible changed.
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) if keymap::is_actionable(&key) => {
                self.handle_key(key);
                true
            }
            Event::Resize(_, _) => true,
            _ => false,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match self.mode {
            Mode::Normal => {
                if let Some(action) = keymap::normal_action(&key) {
                    self.perform(action);
                }
            }
            Mode::Input(_) => {
                if let Some(action) = keymap::input_action(&key) {
                    self.edit_input(action);
                }
            }
            Mode::Edit(_) => {
                if let Some(action) = keymap::input_action(&key) {
                    self.edit_draft(action);
                }
            }
            Mode::Confirm(_) => self.answer_confirm(keymap::confirm_action(&key)),
            Mode::Log(_) => {
                if let Some(action) = keymap::log_action(&key) {
                    self.navigate_log(action);
                }
            }
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Quit => {
                info!(event = "quit_requested");
                self.exit = true;
            }
            Action::MoveUp => self.selection.move_cursor(-1),
            Action::MoveDown => self.selection.move_cursor(1),
            Action::Top => self.selection.top(),
            Action::Bottom => self.selection.bottom(),
            Action::PageUp => self.selection.page_up(),
            Action::PageDown => self.selection.page_down(),
            Action::CycleStatusFilter => {
                let snapshot = self.model.current();
                self.selection.cycle_status_filter(&snapshot);
            }
            Action::CycleGroupFilter => {
                let snapshot = self.model.current();
                self.selection.cycle_group_filter(&snapshot);
            }
            Action::Refresh => {
                if self.request_refresh() {
                    self.set_note(Severity::Info, "refreshing");
                }
            }
            Action::Add => self.mode = Mode::Input(TextInput::new()),
            Action::Clean => {
                let group = self.selection.filter().group.clone();
                let prompt = match &group {
                    Some(group) => format!("Remove finished tasks in {group}?"),
                    None => "Remove all finished tasks?".to_string(),
                };
                self.mode = Mode::Confirm(PendingConfirm {
                    prompt,
                    command: Command::Clean { group },
                });
            }
            Action::ToggleGroupPause => {
                let group = self.target_group();
                let paused = self
                    .snapshot()
                    .group(&group)
                    .map_or(false, |group| group.paused);
                let selection = TaskSelection::Group(group);
                let command = if paused {
                    Command::Resume(selection)
                } else {
                    Command::Pause(selection)
                };
                self.submit(command);
            }
            Action::ParallelUp | Action::ParallelDown => self.adjust_parallel(action),
            Action::CollapseGroup => {
                let snapshot = self.model.current();
                self.selection.collapse(&snapshot);
            }
            Action::ExpandGroup => {
                let snapshot = self.model.current();
                if let Some(task_id) = self.selection.expand(&snapshot) {
                    self.open_log(task_id);
                }
            }
            Action::Kill
            | Action::TogglePause
            | Action::Restart
            | Action::Remove
            | Action::Stash
            | Action::Enqueue
            | Action::SwitchUp
            | Action::SwitchDown
            | Action::Edit => self.perform_on_task(action),
        }
    }

    fn perform_on_task(&mut self, action: Action) {
        let Some(task) = self.selected_task() else {
            self.set_note(Severity::Warn, "no task selected");
            return;
        };
        let id = task.id;
        let status = task.status.clone();
        let draft = TaskDraft::from_task(task);
        let single = vec![id];
        match action {
            Action::Kill => {
                self.mode = Mode::Confirm(PendingConfirm {
                    prompt: format!("Kill task {id}?"),
                    command: Command::Kill(TaskSelection::Tasks(single)),
                });
            }
            Action::Remove => {
                if matches!(status, TaskStatus::Running | TaskStatus::Paused) {
                    self.set_note(Severity::Warn, format!("task {id} is {status}, kill it first"));
                    return;
                }
                self.mode = Mode::Confirm(PendingConfirm {
                    prompt: format!("Remove task {id}?"),
                    command: Command::Remove { task_ids: single },
                });
            }
            Action::TogglePause => match status {
                TaskStatus::Running => self.submit(Command::Pause(TaskSelection::Tasks(single))),
                TaskStatus::Paused | TaskStatus::Queued | TaskStatus::Stashed => {
                    self.submit(Command::Resume(TaskSelection::Tasks(single)))
                }
                other => self.set_note(Severity::Warn, format!("task {id} is {other}")),
            },
            Action::Restart => {
                if status.is_done() {
                    self.submit(Command::Restart { tasks: vec![draft] });
                } else {
                    self.set_note(Severity::Warn, format!("task {id} has not finished"));
                }
            }
            Action::Stash => self.submit(Command::Stash { task_ids: single }),
            Action::Enqueue => self.submit(Command::Enqueue { task_ids: single }),
            Action::SwitchUp | Action::SwitchDown => {
                let direction = if action == Action::SwitchUp { -1 } else { 1 };
                match self.switch_partner(direction) {
                    Some(other) => self.submit(Command::Switch {
                        first: id,
                        second: other,
                    }),
                    None => self.set_note(Severity::Warn, "no queued task to switch with"),
                }
            }
            Action::Edit => {
                if status.is_waiting() {
                    self.begin_edit(id);
                } else {
                    self.set_note(Severity::Warn, format!("task {id} is {status}, not editable"));
                }
            }
            _ => {}
        }
    }

    /// Nearest waiting task of the same group in `direction` among the
    /// visible rows.
    fn switch_partner(&self, direction: isize) -> Option<TaskId> {
        let snapshot = self.snapshot();
        let selected = snapshot.task(self.selection.selected()?)?;
        if !selected.status.is_waiting() {
            return None;
        }
        let rows = self.selection.rows();
        let cursor = self.selection.cursor()?;
        let partner = |row: &&Row| match row {
            Row::Task { id, group } if *group == selected.group => snapshot
                .task(*id)
                .is_some_and(|task| task.status.is_waiting()),
            _ => false,
        };
        let found = if direction < 0 {
            rows[..cursor].iter().rev().find(partner)
        } else {
            rows[cursor + 1..].iter().find(partner)
        };
        found.and_then(Row::task_id)
    }

    fn target_group(&self) -> String {
        self.selection
            .selected_group()
            .map(str::to_string)
            .or_else(|| self.selection.filter().group.clone())
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    }

    /// Step the group's limit by one. An unlimited group can only be capped,
    /// starting from what it is running right now.
    fn adjust_parallel(&mut self, action: Action) {
        let group = self.target_group();
        let Some(current) = self.snapshot().group(&group) else {
            self.set_note(Severity::Warn, format!("unknown group {group}"));
            return;
        };
        let limit = match (current.parallel_tasks, action) {
            (None, Action::ParallelUp) => {
                self.set_note(Severity::Warn, format!("{group} is already unlimited"));
                return;
            }
            (None, _) => {
                let running = self
                    .snapshot()
                    .tasks_in(&group)
                    .filter(|task| task.status == TaskStatus::Running)
                    .count();
                running.max(1)
            }
            (Some(limit), Action::ParallelUp) => limit.get().saturating_add(1),
            (Some(limit), _) if limit.get() > 1 => limit.get() - 1,
            (Some(_), _) => {
                self.set_note(Severity::Warn, format!("{group} already runs one task at a time"));
                return;
            }
        };
        self.submit(Command::Parallel { group, limit });
    }

    fn submit(&mut self, command: Command) {
        let description = command.describe();
        match self.dispatcher.submit(command) {
            Ok(handle) => self.set_note(Severity::Info, format!("{description} ({handle})")),
            Err(err) => self.set_note(Severity::Error, format!("{description}: {err}")),
        }
    }

    fn edit_input(&mut self, action: InputAction) {
        let Mode::Input(input) = &mut self.mode else {
            return;
        };
        match action {
            InputAction::Insert(ch) => input.insert(ch),
            InputAction::Backspace => input.delete_char(),
            InputAction::Delete => input.delete_forward(),
            InputAction::Left => input.move_left(),
            InputAction::Right => input.move_right(),
            InputAction::Home => input.move_start(),
            InputAction::End => input.move_end(),
            InputAction::Cancel => self.mode = Mode::Normal,
            InputAction::Submit => {
                if input.is_blank() {
                    self.set_note(Severity::Warn, "empty command");
                    return;
                }
                let command = input.take();
                self.mode = Mode::Normal;
                let group = self.target_group();
                self.submit(Command::Add { command, group });
            }
        }
    }

    /// Ask the daemon to lock the task and hand back its editable fields.
    fn begin_edit(&mut self, task_id: TaskId) {
        match self.requests.try_send(AdapterRequest::BeginEdit { task_id }) {
            Ok(()) => self.set_note(Severity::Info, format!("opening task {task_id} for edit")),
            Err(err) => {
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue_full",
                    mpsc::error::TrySendError::Closed(_) => "channel_closed",
                };
                warn!(event = "edit_request_drop", reason, task_id);
                self.set_note(Severity::Error, format!("cannot edit task {task_id}: {reason}"));
            }
        }
    }

    fn edit_ready(&mut self, task_id: TaskId, result: Result<TaskDraft, DaemonError>) {
        let draft = match result {
            Ok(draft) => draft,
            Err(error) => {
                self.set_note(Severity::Error, format!("cannot edit task {task_id}: {error}"));
                return;
            }
        };
        if self.mode != Mode::Normal {
            // The user moved on; the task is locked daemon-side until released.
            self.submit(Command::EditRestore { task_id });
            return;
        }
        let input = TextInput::with_value(&draft.command);
        self.mode = Mode::Edit(EditView { draft, input });
    }

    fn edit_draft(&mut self, action: InputAction) {
        let Mode::Edit(view) = &mut self.mode else {
            return;
        };
        let input = &mut view.input;
        match action {
            InputAction::Insert(ch) => input.insert(ch),
            InputAction::Backspace => input.delete_char(),
            InputAction::Delete => input.delete_forward(),
            InputAction::Left => input.move_left(),
            InputAction::Right => input.move_right(),
            InputAction::Home => input.move_start(),
            InputAction::End => input.move_end(),
            InputAction::Cancel => {
                let task_id = view.draft.task_id;
                self.mode = Mode::Normal;
                self.submit(Command::EditRestore { task_id });
            }
            InputAction::Submit => {
                if input.is_blank() {
                    self.set_note(Severity::Warn, "empty command");
                    return;
                }
                let command = input.take();
                let draft = TaskDraft {
                    command,
                    ..view.draft.clone()
                };
                self.mode = Mode::Normal;
                self.submit(Command::Edit(draft));
            }
        }
    }

    fn answer_confirm(&mut self, answer: ConfirmAction) {
        let Mode::Confirm(pending) = std::mem::replace(&mut self.mode, Mode::Normal) else {
            return;
        };
        match answer {
            ConfirmAction::Confirm => self.submit(pending.command),
            ConfirmAction::Cancel => self.set_note(Severity::Info, "cancelled"),
        }
    }

    fn open_log(&mut self, task_id: TaskId) {
        self.mode = Mode::Log(LogView::new(task_id));
        self.fetch_log(task_id);
    }

    fn fetch_log(&mut self, task_id: TaskId) {
        let request = AdapterRequest::FetchLog {
            task_id,
            lines: Some(self.log_lines),
        };
        if let Err(err) = self.requests.try_send(request) {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "queue_full",
                mpsc::error::TrySendError::Closed(_) => "channel_closed",
            };
            warn!(event = "log_request_drop", reason, task_id);
            if let Mode::Log(view) = &mut self.mode {
                view.loading = false;
            }
        }
    }

    fn navigate_log(&mut self, action: LogAction) {
        let Mode::Log(view) = &mut self.mode else {
            return;
        };
        match action {
            LogAction::ScrollUp => view.scroll_by(-1),
            LogAction::ScrollDown => view.scroll_by(1),
            LogAction::PageUp => view.scroll_by(-(LOG_PAGE as isize)),
            LogAction::PageDown => view.scroll_by(LOG_PAGE as isize),
            LogAction::Top => view.scroll = 0,
            LogAction::Bottom => view.scroll = view.max_scroll(),
            LogAction::ToggleFollow => {
                view.follow = !view.follow;
                if view.follow {
                    view.scroll = view.max_scroll();
                }
            }
            LogAction::Close => self.mode = Mode::Normal,
        }
    }

    /// Queue a full snapshot fetch unless one is already outstanding.
    pub fn request_refresh(&mut self) -> bool {
        if self.refresh_in_flight {
            return false;
        }
        match self.requests.try_send(AdapterRequest::Refresh) {
            Ok(()) => {
                self.refresh_in_flight = true;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = "refresh_queue_drop", reason = "queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = "refresh_queue_drop", reason = "channel_closed");
                false
            }
        }
    }

    /// Periodic work: expire the status note, poll the daemon for state and
    /// refetch a followed log.
    pub fn on_tick(&mut self, now: Instant) {
        if self.note.as_ref().is_some_and(|note| note.expires_at <= now) {
            self.note = None;
        }
        if self.connection.is_connected() {
            self.request_refresh();
        }
        let follow = match &self.mode {
            Mode::Log(view) if view.follow && !view.loading => Some(view.task_id),
            _ => None,
        };
        if let Some(task_id) = follow {
            if let Mode::Log(view) = &mut self.mode {
                view.loading = true;
            }
            self.fetch_log(task_id);
        }
    }

    /// Apply a daemon event. Returns whether anything visible changed.
    pub fn handle_daemon(&mut self, event: DaemonEvent) -> bool {
        match event {
            DaemonEvent::Connected => {
                self.connection = ConnectionStatus::Connected;
                self.set_note(Severity::Info, "connected to daemon");
            }
            DaemonEvent::Reconnected => {
                self.connection = ConnectionStatus::Connected;
                self.set_note(Severity::Info, "reconnected");
            }
            DaemonEvent::Snapshot { snapshot, resync } => {
                self.refresh_in_flight = false;
                let summary = if resync {
                    self.model.resync(snapshot)
                } else {
                    self.model.apply(snapshot)
                };
                let snapshot = self.model.current();
                self.selection.reconcile(&snapshot);
                if let Some(issue) = summary.inconsistencies.first() {
                    self.set_note(Severity::Warn, issue.to_string());
                }
                let changed = !summary.is_empty() || summary.resync;
                self.last_diff = summary;
                return changed;
            }
            DaemonEvent::Disconnected { error } => {
                self.refresh_in_flight = false;
                self.set_note(Severity::Error, error.to_string());
                self.connection = ConnectionStatus::Disconnected(error.to_string());
            }
            DaemonEvent::Reconnecting { attempt, delay } => {
                self.connection = ConnectionStatus::Reconnecting { attempt, delay };
            }
            DaemonEvent::ReconnectFailed { attempts, error } => {
                self.connection = ConnectionStatus::Failed(error.to_string());
                self.fatal = Some(LoopError::ReconnectFailed { attempts, error });
                self.exit = true;
            }
            DaemonEvent::StartupFailed { attempts, error } => {
                self.connection = ConnectionStatus::Failed(error.to_string());
                self.fatal = Some(LoopError::StartupFailed { attempts, error });
                self.exit = true;
            }
            DaemonEvent::CommandResult { handle, result } => {
                match self.dispatcher.resolve(handle, result) {
                    Resolution::Confirmed { command, outcome } => {
                        let text = if outcome.message.trim().is_empty() {
                            format!("{} done", command.describe())
                        } else {
                            outcome.message
                        };
                        self.set_note(Severity::Info, text);
                        self.request_refresh();
                    }
                    Resolution::Retrying {
                        command, attempt, ..
                    } => {
                        self.set_note(
                            Severity::Warn,
                            format!("{} retrying (attempt {attempt})", command.describe()),
                        );
                    }
                    Resolution::Failed { command, error } => {
                        let text = format!("{} failed: {error}", command.describe());
                        self.set_note(Severity::Error, text);
                    }
                    Resolution::Unknown => return false,
                }
            }
            DaemonEvent::RefreshFailed { error } => {
                self.refresh_in_flight = false;
                self.set_note(Severity::Error, format!("refresh failed: {error}"));
            }
            DaemonEvent::Log { task_id, result } => return self.absorb_log(task_id, result),
            DaemonEvent::EditReady { task_id, result } => self.edit_ready(task_id, result),
            DaemonEvent::Stopped => {
                debug!(event = "adapter_stopped");
                self.exit = true;
            }
        }
        true
    }

    fn absorb_log(&mut self, task_id: TaskId, result: Result<LogChunk, DaemonError>) -> bool {
        let Mode::Log(view) = &mut self.mode else {
            return false;
        };
        if view.task_id != task_id {
            return false;
        }
        view.loading = false;
        match result {
            Ok(chunk) => {
                view.text = chunk.output;
                view.error = None;
                if view.follow {
                    view.scroll = view.max_scroll();
                } else {
                    view.scroll = view.scroll.min(view.max_scroll());
                }
            }
            Err(error) => view.error = Some(error.to_string()),
        }
        true
    }
}
