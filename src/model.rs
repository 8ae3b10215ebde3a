//! Core data model for the task tree.
//!
//! A [`Task`] is the sole entity in the system. Tree membership is defined by
//! `parent_id`; the `children` vector is a derived cache that the graph store
//! keeps equal to the set of tasks pointing back at this task. The wire format
//! is camelCase JSON, which is also what the durable backend and the replica
//! mirror store per task id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique task identifier, immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The 6-value lifecycle enum describing a task's workflow stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriageStatus {
    /// Not yet scheduled for work.
    #[default]
    Backlog,
    /// Scheduled and actionable.
    Ready,
    /// Work in progress.
    #[serde(rename = "WIP")]
    Wip,
    /// Waiting on something external.
    Blocked,
    /// Completed.
    Done,
    /// Abandoned without completion.
    Dropped,
}

impl TriageStatus {
    /// True for the two closed states, `Done` and `Dropped`.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Done | Self::Dropped)
    }

    /// Returns the string representation used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::Ready => "Ready",
            Self::Wip => "WIP",
            Self::Blocked => "Blocked",
            Self::Done => "Done",
            Self::Dropped => "Dropped",
        }
    }
}

/// Estimation points on the fixed ordinal scale {0.5, 1, 2, 3, 5, 8}.
///
/// Stored on the wire as the numeric point value, which is why the enum
/// round-trips through `f64` rather than a variant name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum Difficulty {
    Half,
    #[default]
    One,
    Two,
    Three,
    Five,
    Eight,
}

impl Difficulty {
    /// Numeric point value of this difficulty.
    #[must_use]
    pub fn points(self) -> f64 {
        match self {
            Self::Half => 0.5,
            Self::One => 1.0,
            Self::Two => 2.0,
            Self::Three => 3.0,
            Self::Five => 5.0,
            Self::Eight => 8.0,
        }
    }
}

impl TryFrom<f64> for Difficulty {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        match value {
            v if v == 0.5 => Ok(Self::Half),
            v if v == 1.0 => Ok(Self::One),
            v if v == 2.0 => Ok(Self::Two),
            v if v == 3.0 => Ok(Self::Three),
            v if v == 5.0 => Ok(Self::Five),
            v if v == 8.0 => Ok(Self::Eight),
            other => Err(format!("{other} is not on the difficulty scale")),
        }
    }
}

impl From<Difficulty> for f64 {
    fn from(value: Difficulty) -> Self {
        value.points()
    }
}

/// One timer interval in epoch milliseconds. `end_time == 0` marks the
/// interval as open (currently running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub start_time: i64,
    pub end_time: i64,
}

impl TimeEntry {
    /// Opens a new interval starting now.
    #[must_use]
    pub fn open_at(start_time: i64) -> Self {
        Self {
            start_time,
            end_time: 0,
        }
    }

    /// Whether this interval is still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_time == 0
    }

    /// Elapsed milliseconds of a closed interval; 0 while open.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        if self.is_open() {
            0
        } else {
            (self.end_time - self.start_time).max(0)
        }
    }
}

/// The sole entity of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    /// Weak reference to the parent task; defines tree membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Derived cache of ids whose `parent_id` equals this task's id.
    /// Maintained by the graph store, never the source of truth.
    #[serde(default)]
    pub children: Vec<TaskId>,
    #[serde(default)]
    pub triage_status: TriageStatus,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub impact: bool,
    #[serde(default)]
    pub major_incident: bool,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Ordered timer intervals; at most one may be open, globally.
    #[serde(default)]
    pub timer: Vec<TimeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_minutes: Option<i64>,
    /// Signed sort key; only monotonic ordering within a status group is
    /// meaningful, values need not be dense or unique.
    #[serde(default)]
    pub priority: i64,
    /// Weak reference to a user entity owned and validated elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Task {
    /// Creates a task with store defaults: `Backlog`, difficulty 1,
    /// empty timer list, priority 0.
    #[must_use]
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            parent_id: None,
            children: Vec::new(),
            triage_status: TriageStatus::Backlog,
            urgent: false,
            impact: false,
            major_incident: false,
            difficulty: Difficulty::One,
            timer: Vec::new(),
            category: None,
            comment: None,
            termination_date: None,
            duration_in_minutes: None,
            priority: 0,
            user_id: None,
        }
    }

    /// Index of the open timer interval, if any.
    #[must_use]
    pub fn open_entry_index(&self) -> Option<usize> {
        self.timer.iter().position(TimeEntry::is_open)
    }

    /// Whether this task currently has a running timer.
    #[must_use]
    pub fn has_open_timer(&self) -> bool {
        self.open_entry_index().is_some()
    }
}

/// Typed partial update for a task.
///
/// `id` and `children` are not expressible here at all. `parent_id` rides
/// along for the durable wire (reparent persistence), but the graph store's
/// `update` path never applies it; reparenting goes through the dedicated
/// operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<TaskId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triage_status: Option<TriageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_incident: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<Vec<TimeEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_minutes: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Option<String>>,
}

impl TaskPatch {
    /// A patch that rewrites every patchable field of `task`, including
    /// `parent_id`. This is what the reconciler sends to the durable backend,
    /// matching the whole-object write policy of the replica mirror.
    #[must_use]
    pub fn replacing(task: &Task) -> Self {
        Self {
            title: Some(task.title.clone()),
            parent_id: Some(task.parent_id.clone()),
            triage_status: Some(task.triage_status),
            urgent: Some(task.urgent),
            impact: Some(task.impact),
            major_incident: Some(task.major_incident),
            difficulty: Some(task.difficulty),
            timer: Some(task.timer.clone()),
            category: Some(task.category.clone()),
            comment: Some(task.comment.clone()),
            termination_date: Some(task.termination_date),
            duration_in_minutes: Some(task.duration_in_minutes),
            priority: Some(task.priority),
            user_id: Some(task.user_id.clone()),
        }
    }

    /// Merges the non-structural fields into `task`. `parent_id` is
    /// deliberately not applied here; tree edges change only through the
    /// graph store's reparent operation.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(status) = self.triage_status {
            task.triage_status = status;
        }
        if let Some(urgent) = self.urgent {
            task.urgent = urgent;
        }
        if let Some(impact) = self.impact {
            task.impact = impact;
        }
        if let Some(major_incident) = self.major_incident {
            task.major_incident = major_incident;
        }
        if let Some(difficulty) = self.difficulty {
            task.difficulty = difficulty;
        }
        if let Some(timer) = &self.timer {
            task.timer = timer.clone();
        }
        if let Some(category) = &self.category {
            task.category = category.clone();
        }
        if let Some(comment) = &self.comment {
            task.comment = comment.clone();
        }
        if let Some(termination_date) = self.termination_date {
            task.termination_date = termination_date;
        }
        if let Some(duration) = self.duration_in_minutes {
            task.duration_in_minutes = duration;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(user_id) = &self.user_id {
            task.user_id = user_id.clone();
        }
    }
}
