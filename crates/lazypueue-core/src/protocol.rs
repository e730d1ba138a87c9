//! Mapping between pueue's message types and the dashboard's model.
//!
//! The daemon speaks its own versioned protocol through `pueue-lib`. This
//! module is the only place that looks inside those types: requests are
//! built from [`Command`]s, responses are decoded into snapshots, command
//! outcomes, log text and edit drafts.

use crate::adapter::LogChunk;
use crate::dispatcher::{Command, CommandResult, TaskDraft, TaskSelection};
use crate::errors::DaemonError;
use crate::snapshot::Snapshot;
use crate::task::{Group, Task, TaskId, TaskStatus};
use chrono::{DateTime, Local, Utc};
use pueue_lib::message::request::{self, Request};
use pueue_lib::message::response::Response;
use pueue_lib::message::EditableTask;
use pueue_lib::state::{GroupStatus, State};
use pueue_lib::task::{Task as PueueTask, TaskResult, TaskStatus as PueueStatus};
use std::collections::HashMap;
use std::io::Read;

pub const DEFAULT_GROUP: &str = "default";

pub fn task_from_pueue(task: &PueueTask) -> Task {
    let observed = status_from_pueue(&task.status);
    Task {
        id: task.id,
        group: task.group.clone(),
        command: task.command.clone(),
        original_command: task.original_command.clone(),
        label: task.label.clone(),
        path: Some(task.path.clone()),
        priority: task.priority,
        status: observed.status,
        start: observed.start,
        end: observed.end,
        exit_code: observed.exit_code,
        log_offset: None,
    }
}

struct Observed {
    status: TaskStatus,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
}

fn utc(time: &DateTime<Local>) -> Option<DateTime<Utc>> {
    Some(time.with_timezone(&Utc))
}

fn status_from_pueue(status: &PueueStatus) -> Observed {
    let mut observed = Observed {
        status: TaskStatus::Queued,
        start: None,
        end: None,
        exit_code: None,
    };
    match status {
        // A lock is held while another client edits the task.
        PueueStatus::Locked { .. } => observed.status = TaskStatus::Unknown("locked".to_string()),
        PueueStatus::Stashed { .. } => observed.status = TaskStatus::Stashed,
        PueueStatus::Queued { .. } => observed.status = TaskStatus::Queued,
        PueueStatus::Running { start, .. } => {
            observed.status = TaskStatus::Running;
            observed.start = utc(start);
        }
        PueueStatus::Paused { start, .. } => {
            observed.status = TaskStatus::Paused;
            observed.start = utc(start);
        }
        PueueStatus::Done {
            start, end, result, ..
        } => {
            observed.start = utc(start);
            observed.end = utc(end);
            (observed.status, observed.exit_code) = match result {
                TaskResult::Success => (TaskStatus::DoneSuccess, Some(0)),
                TaskResult::Failed(code) => (TaskStatus::DoneFailed, Some(*code)),
                TaskResult::Killed => (TaskStatus::DoneKilled, None),
                TaskResult::FailedToSpawn(_)
                | TaskResult::Errored
                | TaskResult::DependencyFailed => (TaskStatus::DoneFailed, None),
            };
        }
    }
    observed
}

pub fn snapshot_from_state(seq: u64, state: &State) -> Result<Snapshot, DaemonError> {
    let mut tasks = Vec::with_capacity(state.tasks.len());
    for (key, task) in &state.tasks {
        if *key != task.id {
            return Err(DaemonError::Malformed(format!(
                "task keyed {key} reports id {}",
                task.id
            )));
        }
        tasks.push(task_from_pueue(task));
    }
    let groups = state.groups.iter().map(|(name, group)| {
        let paused = matches!(group.status, GroupStatus::Paused);
        Group::new(name, group.parallel_tasks, paused)
    });
    Snapshot::new(seq, tasks, groups)
}

fn selection(selection: &TaskSelection) -> request::TaskSelection {
    match selection {
        TaskSelection::Tasks(ids) => request::TaskSelection::TaskIds(ids.clone()),
        TaskSelection::Group(name) => request::TaskSelection::Group(name.clone()),
        TaskSelection::All => request::TaskSelection::All,
    }
}

fn editable(draft: &TaskDraft) -> EditableTask {
    EditableTask {
        id: draft.task_id,
        original_command: draft.command.clone(),
        path: draft.path.clone(),
        label: draft.label.clone(),
        priority: draft.priority,
    }
}

pub fn status_request() -> Request {
    Request::Status
}

pub fn command_request(command: &Command) -> Request {
    match command {
        Command::Pause(tasks) => Request::Pause(request::PauseRequest {
            tasks: selection(tasks),
            wait: false,
        }),
        Command::Resume(tasks) => Request::Start(request::StartRequest {
            tasks: selection(tasks),
        }),
        Command::Kill(tasks) => Request::Kill(request::KillRequest {
            tasks: selection(tasks),
            signal: None,
        }),
        Command::Restart { tasks } => Request::Restart(request::RestartRequest {
            tasks: tasks
                .iter()
                .map(|draft| request::TaskToRestart {
                    task_id: draft.task_id,
                    original_command: draft.command.clone(),
                    path: draft.path.clone(),
                    label: draft.label.clone(),
                    priority: draft.priority,
                })
                .collect(),
            start_immediately: false,
            stashed: false,
        }),
        Command::Remove { task_ids } => Request::Remove(task_ids.clone()),
        Command::Add { command, group } => Request::Add(add_request(command, group)),
        Command::Stash { task_ids } => Request::Stash(request::StashRequest {
            tasks: request::TaskSelection::TaskIds(task_ids.clone()),
            enqueue_at: None,
        }),
        Command::Enqueue { task_ids } => Request::Enqueue(request::EnqueueRequest {
            tasks: request::TaskSelection::TaskIds(task_ids.clone()),
            enqueue_at: None,
        }),
        Command::Switch { first, second } => Request::Switch(request::SwitchRequest {
            task_id_1: *first,
            task_id_2: *second,
        }),
        Command::Parallel { group, limit } => Request::Parallel(request::ParallelRequest {
            parallel_tasks: *limit,
            group: group.clone(),
        }),
        Command::Clean { group } => Request::Clean(request::CleanRequest {
            successful_only: false,
            group: group.clone(),
        }),
        Command::Edit(draft) => Request::EditedTasks(vec![editable(draft)]),
        Command::EditRestore { task_id } => Request::EditRestore(vec![*task_id]),
    }
}

/// New tasks run where the dashboard was started, with its environment,
/// the same way the pueue CLI submits them.
fn add_request(command: &str, group: &str) -> request::AddRequest {
    request::AddRequest {
        command: command.to_string(),
        path: std::env::current_dir().unwrap_or_default(),
        envs: std::env::vars().collect::<HashMap<_, _>>(),
        start_immediately: false,
        stashed: false,
        group: group.to_string(),
        enqueue_at: None,
        dependencies: Vec::new(),
        priority: None,
        label: None,
    }
}

pub fn log_request(task_id: TaskId, lines: Option<usize>) -> Request {
    Request::Log(request::LogRequest {
        tasks: request::TaskSelection::TaskIds(vec![task_id]),
        send_logs: true,
        lines,
    })
}

/// Ask the daemon to lock a task for editing and send its editable fields.
pub fn edit_request(task_id: TaskId) -> Request {
    Request::EditRequest(vec![task_id])
}

fn unexpected(wanted: &str, response: &Response) -> DaemonError {
    DaemonError::Malformed(format!("expected {wanted}, got {}", response_kind(response)))
}

fn response_kind(response: &Response) -> &'static str {
    match response {
        Response::Success(_) => "success",
        Response::Failure(_) => "failure",
        Response::Status(_) => "status",
        Response::Log(_) => "log",
        Response::Edit(_) => "edit",
        _ => "another response",
    }
}

pub fn state_from_response(response: Response) -> Result<State, DaemonError> {
    match response {
        Response::Status(state) => Ok(*state),
        Response::Failure(reason) => Err(DaemonError::Rejected(reason)),
        other => Err(unexpected("status", &other)),
    }
}

/// Every reply but an explicit failure confirms the command.
pub fn command_outcome(response: Response) -> Result<CommandResult, DaemonError> {
    match response {
        Response::Success(message) => Ok(CommandResult { message }),
        Response::Failure(reason) => Err(DaemonError::Rejected(reason)),
        _ => Ok(CommandResult::default()),
    }
}

pub fn log_from_response(task_id: TaskId, response: Response) -> Result<LogChunk, DaemonError> {
    let mut logs = match response {
        Response::Log(logs) => logs,
        Response::Failure(reason) => return Err(DaemonError::Rejected(reason)),
        other => return Err(unexpected("log", &other)),
    };
    let Some(log) = logs.remove(&task_id) else {
        return Err(DaemonError::Rejected(format!("no log for task {task_id}")));
    };
    let output = match log.output {
        Some(bytes) => decompress(&bytes)?,
        None => String::new(),
    };
    Ok(LogChunk {
        task_id,
        offset: output.len() as u64,
        truncated: !log.output_complete,
        output,
    })
}

/// Log output travels snappy-framed.
fn decompress(bytes: &[u8]) -> Result<String, DaemonError> {
    let mut raw = Vec::new();
    snap::read::FrameDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|err| DaemonError::Malformed(format!("log output: {err}")))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

pub fn draft_from_response(task_id: TaskId, response: Response) -> Result<TaskDraft, DaemonError> {
    let tasks = match response {
        Response::Edit(tasks) => tasks,
        Response::Failure(reason) => return Err(DaemonError::Rejected(reason)),
        other => return Err(unexpected("edit", &other)),
    };
    tasks
        .into_iter()
        .find(|task| task.id == task_id)
        .map(|task| TaskDraft {
            task_id: task.id,
            command: task.original_command,
            path: task.path,
            label: task.label,
            priority: task.priority,
        })
        .ok_or_else(|| DaemonError::Malformed(format!("edit reply without task {task_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pueue_lib::message::response::TaskLogResponse;
    use pueue_lib::state::Group as PueueGroup;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::PathBuf;

    fn at(second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 2, 7, 21, 0, second)
            .single()
            .expect("unambiguous local time")
    }

    fn pueue_task(id: TaskId, group: &str, status: PueueStatus) -> PueueTask {
        let mut task = PueueTask::new(
            format!("job {id}"),
            PathBuf::from("/srv/app"),
            HashMap::new(),
            group.to_string(),
            status,
            Vec::new(),
            0,
            None,
        );
        task.id = id;
        task
    }

    fn state(tasks: Vec<PueueTask>, groups: &[(&str, usize, GroupStatus)]) -> State {
        let mut state = State::new();
        state.groups = groups
            .iter()
            .map(|(name, parallel_tasks, status)| {
                let group = PueueGroup {
                    status: status.clone(),
                    parallel_tasks: *parallel_tasks,
                };
                (name.to_string(), group)
            })
            .collect();
        state.tasks = tasks.into_iter().map(|task| (task.id, task)).collect();
        state
    }

    fn done(result: TaskResult) -> PueueStatus {
        PueueStatus::Done {
            enqueued_at: at(0),
            start: at(1),
            end: at(10),
            result,
        }
    }

    #[test]
    fn statuses_map_onto_the_dashboard_vocabulary() {
        let mirror = |status| task_from_pueue(&pueue_task(1, "default", status));

        let queued = mirror(PueueStatus::Queued { enqueued_at: at(0) });
        assert_eq!(queued.status, TaskStatus::Queued);
        assert_eq!(queued.start, None);
        assert_eq!(queued.original_command, "job 1");
        assert_eq!(queued.path, Some(PathBuf::from("/srv/app")));

        let running = mirror(PueueStatus::Running {
            enqueued_at: at(0),
            start: at(1),
        });
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.start, Some(at(1).with_timezone(&Utc)));

        let stashed = mirror(PueueStatus::Stashed { enqueue_at: None });
        assert_eq!(stashed.status, TaskStatus::Stashed);

        let locked = mirror(PueueStatus::Locked {
            previous_status: Box::new(PueueStatus::Queued { enqueued_at: at(0) }),
        });
        assert!(locked.status.is_unknown());
    }

    #[test]
    fn done_results_map_to_outcomes_and_exit_codes() {
        let cases = [
            (TaskResult::Success, TaskStatus::DoneSuccess, Some(0)),
            (TaskResult::Failed(3), TaskStatus::DoneFailed, Some(3)),
            (
                TaskResult::FailedToSpawn("no such file".to_string()),
                TaskStatus::DoneFailed,
                None,
            ),
            (TaskResult::DependencyFailed, TaskStatus::DoneFailed, None),
            (TaskResult::Killed, TaskStatus::DoneKilled, None),
        ];
        for (result, status, exit_code) in cases {
            let task = task_from_pueue(&pueue_task(5, "default", done(result)));
            assert_eq!(task.status, status);
            assert_eq!(task.exit_code, exit_code);
            assert_eq!(task.duration(Utc::now()), Some(chrono::Duration::seconds(9)));
        }
    }

    #[test]
    fn state_becomes_a_validated_snapshot() {
        let tasks = vec![
            pueue_task(1, "default", PueueStatus::Queued { enqueued_at: at(0) }),
            pueue_task(2, "gpu", done(TaskResult::Success)),
        ];
        let groups = [
            ("default", 2, GroupStatus::Running),
            ("gpu", 0, GroupStatus::Paused),
        ];
        let snapshot = snapshot_from_state(9, &state(tasks, &groups)).expect("snapshot");
        assert_eq!(snapshot.seq(), 9);
        assert_eq!(snapshot.len(), 2);
        let gpu = snapshot.group("gpu").expect("gpu group");
        assert!(gpu.paused);
        assert!(gpu.is_unlimited());
        assert!(!snapshot.group("default").is_some_and(|group| group.paused));
    }

    #[test]
    fn state_with_orphaned_task_is_malformed() {
        let tasks = vec![pueue_task(1, "cpu", PueueStatus::Queued { enqueued_at: at(0) })];
        let groups = [("default", 1, GroupStatus::Running)];
        assert!(matches!(
            snapshot_from_state(1, &state(tasks, &groups)),
            Err(DaemonError::Malformed(_))
        ));
    }

    #[test]
    fn commands_become_pueue_requests() {
        let resume = command_request(&Command::Resume(TaskSelection::Group("gpu".to_string())));
        assert!(matches!(
            resume,
            Request::Start(request::StartRequest {
                tasks: request::TaskSelection::Group(ref name),
                ..
            }) if name == "gpu"
        ));

        let kill = command_request(&Command::Kill(TaskSelection::Tasks(vec![4, 5])));
        assert!(matches!(
            kill,
            Request::Kill(request::KillRequest {
                tasks: request::TaskSelection::TaskIds(ref ids),
                signal: None,
                ..
            }) if ids == &vec![4, 5]
        ));

        let add = command_request(&Command::Add {
            command: "echo hi".to_string(),
            group: "gpu".to_string(),
        });
        let Request::Add(add) = add else {
            panic!("expected an add request");
        };
        assert_eq!(add.command, "echo hi");
        assert_eq!(add.group, "gpu");
        assert!(!add.stashed && !add.start_immediately);

        let unlimited = command_request(&Command::Parallel {
            group: "gpu".to_string(),
            limit: 0,
        });
        assert!(matches!(
            unlimited,
            Request::Parallel(request::ParallelRequest { parallel_tasks: 0, .. })
        ));

        let draft = TaskDraft {
            task_id: 3,
            command: "make docs".to_string(),
            path: PathBuf::from("/srv/app"),
            label: None,
            priority: 1,
        };
        let Request::EditedTasks(edited) = command_request(&Command::Edit(draft)) else {
            panic!("expected edited tasks");
        };
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].id, 3);
        assert_eq!(edited[0].original_command, "make docs");
        assert!(matches!(
            command_request(&Command::EditRestore { task_id: 3 }),
            Request::EditRestore(ref ids) if ids == &vec![3]
        ));
    }

    #[test]
    fn failures_are_rejections_and_anything_else_confirms() {
        assert_eq!(
            command_outcome(Response::Success("Tasks are being killed".to_string())),
            Ok(CommandResult {
                message: "Tasks are being killed".to_string()
            })
        );
        assert_eq!(
            command_outcome(Response::Failure("No task with id 9".to_string())),
            Err(DaemonError::Rejected("No task with id 9".to_string()))
        );
        assert!(matches!(
            state_from_response(Response::Success("ok".to_string())),
            Err(DaemonError::Malformed(_))
        ));
    }

    #[test]
    fn log_output_is_decompressed() {
        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(b"compiling\nfinished\n").expect("compress");
        let compressed = encoder.into_inner().expect("flush");

        let task = pueue_task(7, "default", done(TaskResult::Success));
        let logs = BTreeMap::from([(
            7,
            TaskLogResponse {
                task,
                output_complete: false,
                output: Some(compressed),
            },
        )]);
        let chunk = log_from_response(7, Response::Log(logs)).expect("log");
        assert_eq!(chunk.output, "compiling\nfinished\n");
        assert_eq!(chunk.offset, 19);
        assert!(chunk.truncated);

        assert!(matches!(
            log_from_response(7, Response::Log(BTreeMap::new())),
            Err(DaemonError::Rejected(_))
        ));
        let garbage = BTreeMap::from([(
            7,
            TaskLogResponse {
                task: pueue_task(7, "default", done(TaskResult::Success)),
                output_complete: true,
                output: Some(b"not snappy".to_vec()),
            },
        )]);
        assert!(matches!(
            log_from_response(7, Response::Log(garbage)),
            Err(DaemonError::Malformed(_))
        ));
    }

    #[test]
    fn edit_reply_yields_the_requested_draft() {
        let reply = Response::Edit(vec![EditableTask {
            id: 2,
            original_command: "sleep 60".to_string(),
            path: PathBuf::from("/tmp"),
            label: Some("nap".to_string()),
            priority: 0,
        }]);
        let draft = draft_from_response(2, reply).expect("draft");
        assert_eq!(draft.command, "sleep 60");
        assert_eq!(draft.label.as_deref(), Some("nap"));

        let locked = Response::Failure("Task 2 is locked".to_string());
        assert!(matches!(
            draft_from_response(2, locked),
            Err(DaemonError::Rejected(_))
        ));
        assert!(matches!(
            draft_from_response(5, Response::Edit(Vec::new())),
            Err(DaemonError::Malformed(_))
        ));
    }
}
