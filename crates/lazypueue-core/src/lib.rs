//! Core of the lazypueue dashboard: the pueued client, task model,
//! command dispatch, selection and the event loop. The terminal front end
//! lives in the `lazypueue` binary crate.

pub mod adapter;
pub mod app;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event_loop;
pub mod input;
pub mod keymap;
pub mod protocol;
pub mod selection;
pub mod snapshot;
pub mod task;
pub mod view_model;

pub use adapter::{
    spawn_adapter, spawn_adapter_with, AdapterRequest, BackoffPolicy, Connector, DaemonEvent,
    DaemonTransport, LogChunk,
};
pub use app::{AppState, ConnectionStatus, Mode};
pub use config::{pueue_secret_path, resolve_daemon_uri, ClientConfig, DaemonUri};
pub use dispatcher::{
    Command, CommandDispatcher, CommandHandle, CommandKind, TaskDraft, TaskSelection,
};
pub use errors::{
    CommandAlreadyPending, ConnectionError, DaemonError, DispatchError, LoopError,
    ModelInconsistency, RenderError,
};
pub use event_loop::{run_event_loop, RenderSink};
pub use selection::{SelectionState, StatusFilter};
pub use snapshot::Snapshot;
pub use task::{Group, Task, TaskId, TaskStatus};
pub use view_model::{DiffSummary, TaskViewModel, TransitionPolicy};
