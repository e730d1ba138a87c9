use crate::errors::{InconsistencyKind, ModelInconsistency};
use crate::snapshot::Snapshot;
use crate::task::{TaskId, TaskStatus};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// How strictly observed status changes are checked against the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Only direct edges are accepted.
    #[default]
    Strict,
    /// Any status reachable through the edges is accepted. A slow poll can
    /// miss short-lived intermediate states, so this is the lenient opt-in.
    Reachable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: BTreeSet<TaskId>,
    pub removed: BTreeSet<TaskId>,
    pub changed: BTreeSet<TaskId>,
    pub groups_changed: bool,
    pub inconsistencies: Vec<ModelInconsistency>,
    pub resync: bool,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.groups_changed
    }

    pub fn touches(&self, id: TaskId) -> bool {
        self.added.contains(&id) || self.removed.contains(&id) || self.changed.contains(&id)
    }
}

/// Holds the current snapshot plus the one it replaced.
#[derive(Debug)]
pub struct TaskViewModel {
    current: Arc<Snapshot>,
    previous: Option<Arc<Snapshot>>,
    policy: TransitionPolicy,
}

impl Default for TaskViewModel {
    fn default() -> Self {
        Self::new(TransitionPolicy::default())
    }
}

impl TaskViewModel {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self {
            current: Arc::new(Snapshot::empty()),
            previous: None,
            policy,
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_deref()
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Install a newer snapshot. One whose `seq` is not past the current one
    /// was already applied or was overtaken, and is dropped.
    pub fn apply(&mut self, snapshot: Snapshot) -> DiffSummary {
        if snapshot.seq() <= self.current.seq() {
            debug!(
                event = "snapshot_stale",
                seq = snapshot.seq(),
                current_seq = self.current.seq()
            );
            return DiffSummary::default();
        }
        self.install(snapshot, true)
    }

    /// Replace the model wholesale after a reconnect. The daemon may have
    /// restarted in between, so transitions are not checked.
    pub fn resync(&mut self, snapshot: Snapshot) -> DiffSummary {
        let mut summary = self.install(snapshot, false);
        summary.resync = true;
        summary
    }

    fn install(&mut self, snapshot: Snapshot, validate: bool) -> DiffSummary {
        let mut summary = diff(&self.current, &snapshot);
        if validate {
            for id in &summary.changed {
                let (Some(before), Some(after)) = (self.current.task(*id), snapshot.task(*id))
                else {
                    continue;
                };
                let checked = check_transition(*id, &before.status, &after.status, self.policy);
                if let Some(issue) = checked {
                    warn!(
                        event = "model_inconsistency",
                        task_id = issue.task_id,
                        from = %issue.from,
                        to = %issue.to,
                        kind = issue.kind.as_str()
                    );
                    summary.inconsistencies.push(issue);
                }
            }
        }
        let next = Arc::new(snapshot);
        self.previous = Some(std::mem::replace(&mut self.current, next));
        summary
    }
}

/// Added/removed/changed ids between two snapshots. A moved task is changed.
pub fn diff(before: &Snapshot, after: &Snapshot) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for (id, task) in after.tasks() {
        match before.task(*id) {
            None => {
                summary.added.insert(*id);
            }
            Some(previous) if previous != task => {
                summary.changed.insert(*id);
            }
            Some(_) => {}
        }
    }
    for id in before.tasks().keys() {
        if !after.contains(*id) {
            summary.removed.insert(*id);
        }
    }
    summary.groups_changed = before.groups() != after.groups();
    summary
}

pub fn check_transition(
    task_id: TaskId,
    from: &TaskStatus,
    to: &TaskStatus,
    policy: TransitionPolicy,
) -> Option<ModelInconsistency> {
    if from == to {
        return None;
    }
    let kind = if from.is_done() && matches!(to, TaskStatus::Queued | TaskStatus::Running) {
        InconsistencyKind::IdentifierReused
    } else if is_valid_transition(from, to, policy) {
        return None;
    } else {
        InconsistencyKind::InvalidTransition
    };
    Some(ModelInconsistency {
        task_id,
        from: from.clone(),
        to: to.clone(),
        kind,
    })
}

pub fn is_valid_transition(from: &TaskStatus, to: &TaskStatus, policy: TransitionPolicy) -> bool {
    let (Some(from), Some(to)) = (Node::of(from), Node::of(to)) else {
        // Unmapped vocabulary is mirrored as-is.
        return true;
    };
    if from == to {
        return true;
    }
    match policy {
        TransitionPolicy::Strict => from.edges().contains(&to),
        TransitionPolicy::Reachable => reachable(from, to),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Queued,
    Stashed,
    Running,
    Paused,
    Success,
    Failed,
    Killed,
}

impl Node {
    fn of(status: &TaskStatus) -> Option<Self> {
        Some(match status {
            TaskStatus::Queued => Node::Queued,
            TaskStatus::Stashed => Node::Stashed,
            TaskStatus::Running => Node::Running,
            TaskStatus::Paused => Node::Paused,
            TaskStatus::DoneSuccess => Node::Success,
            TaskStatus::DoneFailed => Node::Failed,
            TaskStatus::DoneKilled => Node::Killed,
            TaskStatus::Unknown(_) => return None,
        })
    }

    fn edges(self) -> &'static [Node] {
        match self {
            Node::Queued => &[Node::Running, Node::Stashed],
            Node::Stashed => &[Node::Queued],
            Node::Running => &[Node::Paused, Node::Success, Node::Failed, Node::Killed],
            Node::Paused => &[Node::Running],
            Node::Success | Node::Failed | Node::Killed => &[],
        }
    }
}

fn reachable(from: Node, to: Node) -> bool {
    let mut seen = vec![from];
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        for next in node.edges() {
            if *next == to {
                return true;
            }
            if !seen.contains(next) {
                seen.push(*next);
                queue.push_back(*next);
            }
        }
    }
    false
}
