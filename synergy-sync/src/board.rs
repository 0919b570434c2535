/// Board Reducer
///
/// Pure functions over a task list: partition into the three status columns,
/// resolve what a drag-and-drop means, and summarize project progress.
///
/// Only status is persisted for a drop. Dropping a card onto another card
/// moves it to that card's column; position inside a column always follows
/// creation order.
///
/// # Example
///
/// ```
/// use synergy_sync::board::{resolve_drop, BoardColumns, DropTarget};
/// use synergy_shared::models::{Task, TaskStatus};
///
/// # fn example(tasks: Vec<Task>, dragged: uuid::Uuid) {
/// let board = BoardColumns::partition(&tasks);
/// println!("{} to do", board.count(TaskStatus::Todo));
///
/// if let Some(change) = resolve_drop(&tasks, dragged, DropTarget::Column(TaskStatus::Done)) {
///     println!("move {} to {}", change.task_id, change.to);
/// }
/// # }
/// ```

use serde::Serialize;
use std::fmt;
use synergy_shared::models::{StatusCounts, Task, TaskStatus};
use uuid::Uuid;

/// Tasks split into the three board columns, creation order kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardColumns {
    todo: Vec<Task>,
    in_progress: Vec<Task>,
    done: Vec<Task>,
}

impl BoardColumns {
    pub fn partition(tasks: &[Task]) -> Self {
        let mut board = BoardColumns::default();
        for task in tasks {
            board.column_mut(task.status).push(task.clone());
        }
        board
    }

    fn column_mut(&mut self, status: TaskStatus) -> &mut Vec<Task> {
        match status {
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Done => &mut self.done,
        }
    }

    pub fn column(&self, status: TaskStatus) -> &[Task] {
        match status {
            TaskStatus::Todo => &self.todo,
            TaskStatus::InProgress => &self.in_progress,
            TaskStatus::Done => &self.done,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.column(status).len()
    }

    pub fn total(&self) -> usize {
        self.todo.len() + self.in_progress.len() + self.done.len()
    }

    /// Columns in board order
    pub fn columns(&self) -> impl Iterator<Item = (TaskStatus, &[Task])> + '_ {
        TaskStatus::ALL.into_iter().map(move |status| (status, self.column(status)))
    }

    pub fn progress(&self) -> ProjectProgress {
        ProjectProgress {
            total: self.total(),
            done: self.count(TaskStatus::Done),
            in_progress: self.count(TaskStatus::InProgress),
        }
    }
}

/// Where a dragged card was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// A column itself
    Column(TaskStatus),
    /// Another card
    Task(Uuid),
}

/// Status change implied by a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: Uuid,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Resolves a drop into at most one status change for the dragged task
///
/// Returns `None` when nothing should be written: the dragged task or target
/// card is unknown, or the task already has the resolved status.
pub fn resolve_drop(tasks: &[Task], dragged: Uuid, target: DropTarget) -> Option<StatusChange> {
    let task = tasks.iter().find(|t| t.id == dragged)?;

    let to = match target {
        DropTarget::Column(status) => status,
        DropTarget::Task(over) => tasks.iter().find(|t| t.id == over)?.status,
    };

    (task.status != to).then_some(StatusChange {
        task_id: task.id,
        from: task.status,
        to,
    })
}

/// Dashboard label for a project's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectPhase {
    New,
    Planning,
    Active,
    Complete,
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProjectPhase::New => "New",
            ProjectPhase::Planning => "Planning",
            ProjectPhase::Active => "Active",
            ProjectPhase::Complete => "Complete",
        })
    }
}

/// Task totals of one project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectProgress {
    pub total: usize,
    pub done: usize,
    pub in_progress: usize,
}

impl ProjectProgress {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        BoardColumns::partition(tasks).progress()
    }

    pub fn todo(&self) -> usize {
        self.total.saturating_sub(self.done + self.in_progress)
    }

    /// Share of finished tasks, rounded to whole percent
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.done as f64 / self.total as f64) * 100.0).round() as u8
    }

    pub fn phase(&self) -> ProjectPhase {
        if self.total > 0 && self.done == self.total {
            ProjectPhase::Complete
        } else if self.in_progress > 0 {
            ProjectPhase::Active
        } else if self.total > 0 {
            ProjectPhase::Planning
        } else {
            ProjectPhase::New
        }
    }
}

impl From<StatusCounts> for ProjectProgress {
    fn from(counts: StatusCounts) -> Self {
        let clamp = |n: i64| usize::try_from(n).unwrap_or(0);
        let done = clamp(counts.done);
        let in_progress = clamp(counts.in_progress);
        ProjectProgress {
            total: clamp(counts.todo) + done + in_progress,
            done,
            in_progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn task(title: &str, status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            title: title.to_string(),
            description: None,
            status,
            priority: None,
            due_date: None,
            assignee: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_partition_is_exact() {
        let statuses = [
            TaskStatus::Done,
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Todo,
            TaskStatus::Done,
            TaskStatus::Todo,
        ];
        let tasks: Vec<Task> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| task(&format!("t{}", i), *s))
            .collect();

        let board = BoardColumns::partition(&tasks);

        let mut seen = HashSet::new();
        for (status, column) in board.columns() {
            for t in column {
                assert_eq!(t.status, status);
                assert!(seen.insert(t.id), "task {} placed twice", t.title);
            }
        }
        assert_eq!(seen.len(), tasks.len());
        assert_eq!(board.total(), tasks.len());
        assert_eq!(board.count(TaskStatus::Todo), 3);
    }

    #[test]
    fn test_partition_keeps_store_order() {
        let tasks = vec![
            task("a", TaskStatus::Todo),
            task("b", TaskStatus::Done),
            task("c", TaskStatus::Todo),
        ];
        let board = BoardColumns::partition(&tasks);
        let todo: Vec<&str> = board.column(TaskStatus::Todo).iter().map(|t| t.title.as_str()).collect();
        assert_eq!(todo, vec!["a", "c"]);
    }

    #[test]
    fn test_drop_on_card_takes_its_column() {
        let a = task("A", TaskStatus::Todo);
        let b = task("B", TaskStatus::InProgress);
        let tasks = vec![a.clone(), b.clone()];

        let change = resolve_drop(&tasks, a.id, DropTarget::Task(b.id)).unwrap();
        assert_eq!(
            change,
            StatusChange {
                task_id: a.id,
                from: TaskStatus::Todo,
                to: TaskStatus::InProgress,
            }
        );
    }

    #[test]
    fn test_drop_on_column() {
        let a = task("A", TaskStatus::Todo);
        let tasks = vec![a.clone()];

        let change = resolve_drop(&tasks, a.id, DropTarget::Column(TaskStatus::Done)).unwrap();
        assert_eq!(change.to, TaskStatus::Done);
    }

    #[test]
    fn test_drop_without_status_change_is_noop() {
        let a = task("A", TaskStatus::Todo);
        let b = task("B", TaskStatus::Todo);
        let tasks = vec![a.clone(), b.clone()];

        assert_eq!(resolve_drop(&tasks, a.id, DropTarget::Task(b.id)), None);
        assert_eq!(resolve_drop(&tasks, a.id, DropTarget::Task(a.id)), None);
        assert_eq!(resolve_drop(&tasks, a.id, DropTarget::Column(TaskStatus::Todo)), None);
        assert_eq!(resolve_drop(&tasks, Uuid::new_v4(), DropTarget::Column(TaskStatus::Done)), None);
        assert_eq!(resolve_drop(&tasks, a.id, DropTarget::Task(Uuid::new_v4())), None);
    }

    #[test]
    fn test_progress_phases() {
        let new = ProjectProgress::default();
        assert_eq!(new.phase(), ProjectPhase::New);
        assert_eq!(new.percent(), 0);

        let planning = ProjectProgress { total: 3, done: 1, in_progress: 0 };
        assert_eq!(planning.phase(), ProjectPhase::Planning);
        assert_eq!(planning.percent(), 33);
        assert_eq!(planning.todo(), 2);

        let active = ProjectProgress { total: 3, done: 2, in_progress: 1 };
        assert_eq!(active.phase(), ProjectPhase::Active);
        assert_eq!(active.percent(), 67);

        let complete = ProjectProgress { total: 2, done: 2, in_progress: 0 };
        assert_eq!(complete.phase(), ProjectPhase::Complete);
        assert_eq!(complete.phase().to_string(), "Complete");

        let almost = ProjectProgress { total: 200, done: 199, in_progress: 0 };
        assert_eq!(almost.percent(), 100);
        assert_eq!(almost.phase(), ProjectPhase::Planning);
    }

    #[test]
    fn test_progress_from_counts() {
        let progress = ProjectProgress::from(StatusCounts {
            todo: 2,
            in_progress: 1,
            done: 1,
        });
        assert_eq!(progress.total, 4);
        assert_eq!(progress.percent(), 25);
        assert_eq!(progress.phase(), ProjectPhase::Active);
    }
}
