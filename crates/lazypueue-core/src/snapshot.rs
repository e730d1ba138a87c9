use crate::errors::DaemonError;
use crate::task::{Group, Task, TaskId};
use std::collections::BTreeMap;

/// Immutable view of the daemon's tasks and groups at one instant.
///
/// `seq` is assigned by the adapter for every fetch and only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    seq: u64,
    tasks: BTreeMap<TaskId, Task>,
    groups: BTreeMap<String, Group>,
}

impl Snapshot {
    /// Rejects a task whose group is missing as [`DaemonError::Malformed`].
    pub fn new(
        seq: u64,
        tasks: impl IntoIterator<Item = Task>,
        groups: impl IntoIterator<Item = Group>,
    ) -> Result<Self, DaemonError> {
        let snapshot = Self {
            seq,
            tasks: tasks.into_iter().map(|task| (task.id, task)).collect(),
            groups: groups
                .into_iter()
                .map(|group| (group.name.clone(), group))
                .collect(),
        };
        for task in snapshot.tasks.values() {
            if !snapshot.groups.contains_key(&task.group) {
                return Err(DaemonError::Malformed(format!(
                    "task {} references unknown group '{}'",
                    task.id, task.group
                )));
            }
        }
        Ok(snapshot)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn tasks(&self) -> &BTreeMap<TaskId, Task> {
        &self.tasks
    }

    pub fn groups(&self) -> &BTreeMap<String, Group> {
        &self.groups
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Tasks of one group in id order.
    pub fn tasks_in<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.values().filter(move |task| task.group == group)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
