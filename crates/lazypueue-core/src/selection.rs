use crate::snapshot::Snapshot;
use crate::task::{Task, TaskId, TaskStatus};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Finished,
    Stashed,
}

impl StatusFilter {
    pub fn label(self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Finished => "finished",
            StatusFilter::Stashed => "stashed",
        }
    }

    pub fn next(self) -> Self {
        match self {
            StatusFilter::All => StatusFilter::Active,
            StatusFilter::Active => StatusFilter::Finished,
            StatusFilter::Finished => StatusFilter::Stashed,
            StatusFilter::Stashed => StatusFilter::All,
        }
    }

    pub fn matches(self, status: &TaskStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status.is_active(),
            StatusFilter::Finished => status.is_done(),
            StatusFilter::Stashed => matches!(status, TaskStatus::Stashed),
        }
    }
}

/// Row predicate. Filters decide visibility only; the model is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskFilter {
    pub status: StatusFilter,
    pub group: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(&task.status) && self.shows_group(&task.group)
    }

    pub fn shows_group(&self, group: &str) -> bool {
        self.group.as_deref().map_or(true, |wanted| wanted == group)
    }

    pub fn is_active(&self) -> bool {
        self.status != StatusFilter::All || self.group.is_some()
    }
}

/// One line of the task tree: a group header or a task under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Group(String),
    Task { id: TaskId, group: String },
}

impl Row {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Row::Task { id, .. } => Some(*id),
            Row::Group(_) => None,
        }
    }

    pub fn group(&self) -> &str {
        match self {
            Row::Group(name) | Row::Task { group: name, .. } => name,
        }
    }

    /// Tasks are the same row wherever they live; headers match by name.
    fn same_item(&self, other: &Row) -> bool {
        match (self, other) {
            (Row::Group(a), Row::Group(b)) => a == b,
            (Row::Task { id: a, .. }, Row::Task { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Cursor over the visible rows of the task tree.
///
/// Every group gets a header row followed by its tasks in id order, unless
/// the group is collapsed. The selection is tracked by identity, not row
/// index, so it survives reordering. When the selected task disappears the
/// cursor falls back to the nearest surviving task after it, then the
/// nearest one before it, then whatever is left of its group.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    filter: TaskFilter,
    collapsed: BTreeSet<String>,
    rows: Vec<Row>,
    selected: Option<Row>,
    scroll: usize,
    viewport: usize,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The selected task; `None` while a group header is selected.
    pub fn selected(&self) -> Option<TaskId> {
        self.selected.as_ref().and_then(Row::task_id)
    }

    pub fn selected_row(&self) -> Option<&Row> {
        self.selected.as_ref()
    }

    /// Group of the selected row, header or task.
    pub fn selected_group(&self) -> Option<&str> {
        self.selected.as_ref().map(Row::group)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Task ids in row order, headers skipped.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.rows.iter().filter_map(Row::task_id).collect()
    }

    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    pub fn is_collapsed(&self, group: &str) -> bool {
        self.collapsed.contains(group)
    }

    pub fn cursor(&self) -> Option<usize> {
        let selected = self.selected.as_ref()?;
        self.rows.iter().position(|row| row.same_item(selected))
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    /// Recompute rows against `snapshot`, keeping the selection when possible.
    pub fn reconcile(&mut self, snapshot: &Snapshot) {
        let previous_rows = std::mem::take(&mut self.rows);
        self.rows = self.build_rows(snapshot);

        self.selected = match self.selected.take() {
            Some(row) => match self.find(&row) {
                Some(found) => Some(found.clone()),
                None => self.fallback(&previous_rows, &row),
            },
            None => self.initial(),
        };
        self.clamp_scroll();
    }

    fn build_rows(&self, snapshot: &Snapshot) -> Vec<Row> {
        let mut rows = Vec::new();
        for name in snapshot.groups().keys() {
            if !self.filter.shows_group(name) {
                continue;
            }
            let tasks: Vec<TaskId> = snapshot
                .tasks_in(name)
                .filter(|task| self.filter.status.matches(&task.status))
                .map(|task| task.id)
                .collect();
            // Under a status filter a group with nothing to show is noise.
            if tasks.is_empty() && self.filter.status != StatusFilter::All {
                continue;
            }
            rows.push(Row::Group(name.clone()));
            if !self.collapsed.contains(name) {
                rows.extend(tasks.into_iter().map(|id| Row::Task {
                    id,
                    group: name.clone(),
                }));
            }
        }
        rows
    }

    fn find(&self, row: &Row) -> Option<&Row> {
        self.rows.iter().find(|candidate| candidate.same_item(row))
    }

    fn initial(&self) -> Option<Row> {
        self.rows
            .iter()
            .find(|row| row.task_id().is_some())
            .or_else(|| self.rows.first())
            .cloned()
    }

    fn fallback(&self, previous_rows: &[Row], lost: &Row) -> Option<Row> {
        let Some(position) = previous_rows.iter().position(|row| row.same_item(lost)) else {
            return self.initial();
        };
        let tasks_only = lost.task_id().is_some();
        let survives =
            |row: &&Row| (!tasks_only || row.task_id().is_some()) && self.find(row).is_some();
        let successor = previous_rows[position + 1..].iter().find(survives);
        let predecessor = || previous_rows[..position].iter().rev().find(survives);
        let same_group = || {
            let group = lost.group();
            self.rows
                .iter()
                .find(|row| row.group() == group && row.task_id().is_some())
                .or_else(|| self.find(&Row::Group(group.to_string())))
        };
        successor
            .or_else(predecessor)
            .and_then(|row| self.find(row))
            .or_else(same_group)
            .cloned()
            .or_else(|| {
                let index = position.min(self.rows.len().saturating_sub(1));
                self.rows.get(index).cloned()
            })
    }

    pub fn set_filter(&mut self, filter: TaskFilter, snapshot: &Snapshot) {
        if self.filter == filter {
            return;
        }
        self.filter = filter;
        self.reconcile(snapshot);
    }

    pub fn cycle_status_filter(&mut self, snapshot: &Snapshot) {
        let filter = TaskFilter {
            status: self.filter.status.next(),
            group: self.filter.group.clone(),
        };
        self.set_filter(filter, snapshot);
    }

    /// None, then every group in name order, then None again.
    pub fn cycle_group_filter(&mut self, snapshot: &Snapshot) {
        let mut names = snapshot.groups().keys();
        let group = match self.filter.group.as_deref() {
            None => names.next().cloned(),
            Some(current) => names
                .skip_while(|name| name.as_str() != current)
                .nth(1)
                .cloned(),
        };
        let filter = TaskFilter {
            status: self.filter.status,
            group,
        };
        self.set_filter(filter, snapshot);
    }

    /// On a header, fold the group away. On a task, jump to its header.
    pub fn collapse(&mut self, snapshot: &Snapshot) {
        let Some(row) = self.selected.clone() else {
            return;
        };
        match row {
            Row::Group(name) => {
                if self.collapsed.insert(name) {
                    self.reconcile(snapshot);
                }
            }
            Row::Task { group, .. } => {
                self.selected = Some(Row::Group(group));
                self.clamp_scroll();
            }
        }
    }

    /// On a folded header, unfold it. On an open header, step to its first
    /// task. On a task, hand back its id so the caller can open it.
    pub fn expand(&mut self, snapshot: &Snapshot) -> Option<TaskId> {
        match self.selected.clone()? {
            Row::Group(name) => {
                if self.collapsed.remove(&name) {
                    self.reconcile(snapshot);
                } else if let Some(index) = self.cursor() {
                    if self.rows.get(index + 1).is_some_and(|row| row.group() == name) {
                        self.select_index(index + 1);
                    }
                }
                None
            }
            Row::Task { id, .. } => Some(id),
        }
    }

    /// Move by `delta` rows, wrapping at both ends.
    pub fn move_cursor(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let len = self.rows.len() as isize;
        let current = self.cursor().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len);
        self.select_index(next as usize);
    }

    pub fn top(&mut self) {
        if !self.rows.is_empty() {
            self.select_index(0);
        }
    }

    pub fn bottom(&mut self) {
        if !self.rows.is_empty() {
            self.select_index(self.rows.len() - 1);
        }
    }

    pub fn page_down(&mut self) {
        self.page(self.page_size() as isize);
    }

    pub fn page_up(&mut self) {
        self.page(-(self.page_size() as isize));
    }

    fn page(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let last = self.rows.len() as isize - 1;
        let current = self.cursor().unwrap_or(0) as isize;
        self.select_index((current + delta).clamp(0, last) as usize);
    }

    fn page_size(&self) -> usize {
        self.viewport.max(1)
    }

    /// Remember the list height so the scroll offset keeps the cursor on screen.
    pub fn set_viewport(&mut self, height: usize) {
        self.viewport = height;
        self.clamp_scroll();
    }

    fn select_index(&mut self, index: usize) {
        self.selected = self.rows.get(index).cloned();
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        let Some(cursor) = self.cursor() else {
            self.scroll = 0;
            return;
        };
        if self.viewport == 0 {
            return;
        }
        if cursor < self.scroll {
            self.scroll = cursor;
        } else if cursor >= self.scroll + self.viewport {
            self.scroll = cursor + 1 - self.viewport;
        }
        let max_scroll = self.rows.len().saturating_sub(self.viewport);
        self.scroll = self.scroll.min(max_scroll);
    }
}
