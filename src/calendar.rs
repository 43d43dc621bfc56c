//! Views derived from the cached task list: calendar markers, the per-day
//! filter and the dashboard summary. Nothing here holds state.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::models::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    /// Every task due that day is completed
    AllDone,
    /// Some, but not all, are completed
    Partial,
    /// None are completed
    Pending,
}

impl DayStatus {
    pub fn dot_color(self) -> &'static str {
        match self {
            DayStatus::AllDone => "green",
            DayStatus::Partial => "orange",
            DayStatus::Pending => "red",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayMarker {
    pub total: usize,
    pub completed: usize,
}

impl DayMarker {
    pub fn status(&self) -> DayStatus {
        if self.completed == self.total {
            DayStatus::AllDone
        } else if self.completed > 0 {
            DayStatus::Partial
        } else {
            DayStatus::Pending
        }
    }
}

/// Dates that have at least one task due, with completion counts
pub fn marked_dates(tasks: &[Task]) -> BTreeMap<NaiveDate, DayMarker> {
    let mut marks: BTreeMap<NaiveDate, DayMarker> = BTreeMap::new();
    for task in tasks {
        if let Some(date) = task.due_date {
            let marker = marks.entry(date).or_default();
            marker.total += 1;
            if task.completed {
                marker.completed += 1;
            }
        }
    }
    marks
}

/// Tasks due on the selected date. No selection means no tasks.
pub fn tasks_on(tasks: &[Task], selected: Option<NaiveDate>) -> Vec<Task> {
    let Some(date) = selected else {
        return Vec::new();
    };
    tasks
        .iter()
        .filter(|t| t.due_date == Some(date))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl TaskSummary {
    pub fn message(&self) -> String {
        if self.total > 0 && self.completed == self.total {
            "Great job! All tasks completed.".to_string()
        } else if self.pending > 0 {
            let noun = if self.pending == 1 { "task" } else { "tasks" };
            format!("You still have {} pending {}.", self.pending, noun)
        } else {
            "No tasks yet, start adding some!".to_string()
        }
    }
}

pub fn summarize(tasks: &[Task]) -> TaskSummary {
    let completed = tasks.iter().filter(|t| t.completed).count();
    TaskSummary {
        total: tasks.len(),
        completed,
        pending: tasks.len() - completed,
    }
}
