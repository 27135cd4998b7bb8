use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One unit of work from the static catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub category: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_count: Option<u32>,
}

/// Completion record for a single task, keyed by task id in its category map.
///
/// `completed` is not derived from `subtasks`; the backend owns the aggregate flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub subtasks: BTreeMap<String, bool>,
}

pub type CategoryEntries = BTreeMap<String, ProgressEntry>;

/// Aggregate returned by the backend after any read or mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub completed_task_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeMap<String, CategoryEntries>>,
}

impl ProgressSnapshot {
    pub fn entry(&self, category: &str, task_id: &str) -> Option<&ProgressEntry> {
        self.categories.as_ref()?.get(category)?.get(task_id)
    }
}

/// Addresses a single checkbox: a task or one of its subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressKey {
    Task {
        category: String,
        task_id: String,
    },
    Subtask {
        category: String,
        task_id: String,
        subtask: String,
    },
}

impl ProgressKey {
    pub fn task(category: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::Task {
            category: category.into(),
            task_id: task_id.into(),
        }
    }

    pub fn subtask(
        category: impl Into<String>,
        task_id: impl Into<String>,
        subtask: impl Into<String>,
    ) -> Self {
        Self::Subtask {
            category: category.into(),
            task_id: task_id.into(),
            subtask: subtask.into(),
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Self::Task { category, .. } | Self::Subtask { category, .. } => category,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Task { task_id, .. } | Self::Subtask { task_id, .. } => task_id,
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { category, task_id } => write!(f, "{category}/{task_id}"),
            Self::Subtask {
                category,
                task_id,
                subtask,
            } => write!(f, "{category}/{task_id}#{subtask}"),
        }
    }
}

/// Payload of a `{ success, data, error }` backend reply. The client has
/// already checked `success` and turned `error` into a failure.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskToggle<'a> {
    pub category: &'a str,
    pub task_id: &'a str,
    pub checked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskToggle<'a> {
    pub category: &'a str,
    pub task_id: &'a str,
    pub subtask_key: &'a str,
    pub subtask_checked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    #[serde(other)]
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub name: String,
    pub progress: f64,
    pub completed_tasks: u32,
    pub total_tasks: u32,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Values persisted through the two-tier preference store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Identity>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub category: String,
    pub task_id: String,
    #[serde(default)]
    pub subtask: Option<String>,
    pub checked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub success: bool,
    /// State the page control must show once this response is applied.
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ThemeRequest {
    pub theme: Theme,
}
