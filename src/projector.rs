//! Pure derivations from the progress snapshot, plus the loop that re-renders
//! views when the store publishes changes.

use crate::catalog::{Catalog, Milestone};
use crate::events::{Notification, StoreEvent};
use crate::models::{ProgressEntry, ProgressKey, ProgressSnapshot};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::store::ProgressStore;

pub const EARLY_STAGE_LABEL: &str = "Just getting started";

/// The server's percentage, verbatim. Never recomputed here: task weighting
/// lives server-side.
pub fn compute_overall_percentage(snapshot: &ProgressSnapshot) -> f64 {
    snapshot.progress_percentage.unwrap_or(0.0)
}

/// Rounded percent of a category's catalog tasks marked complete.
pub fn compute_category_progress(category: &str, snapshot: &ProgressSnapshot, catalog: &Catalog) -> u32 {
    let (completed, total) = category_counts(category, snapshot, catalog);
    percent(completed, total)
}

/// Highest threshold first; the first one reached wins.
pub fn label_for_milestone(completed_count: u32, thresholds: &[Milestone]) -> String {
    let mut ordered: Vec<&Milestone> = thresholds.iter().collect();
    ordered.sort_by(|a, b| b.min_count.cmp(&a.min_count));
    ordered
        .into_iter()
        .find(|milestone| completed_count >= milestone.min_count)
        .map(|milestone| milestone.label.clone())
        .unwrap_or_else(|| EARLY_STAGE_LABEL.to_string())
}

fn category_counts(category: &str, snapshot: &ProgressSnapshot, catalog: &Catalog) -> (u32, u32) {
    let tasks = catalog.tasks_in(category);
    let completed = tasks
        .iter()
        .filter(|task| {
            snapshot
                .entry(category, &task.id)
                .is_some_and(|entry| entry.completed)
        })
        .count();
    (completed as u32, tasks.len() as u32)
}

fn percent(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(completed) * 100.0 / f64::from(total)).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskView {
    pub key: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub checked: bool,
    pub subtasks: Vec<SubtaskView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryView {
    pub key: String,
    pub title: String,
    pub completed: u32,
    pub total: u32,
    pub percent: u32,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallView {
    pub percentage: f64,
    pub completed_count: u32,
    pub milestone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub overall: OverallView,
    pub categories: Vec<CategoryView>,
    pub notifications: Vec<Notification>,
}

pub fn project_overall(snapshot: &ProgressSnapshot, catalog: &Catalog) -> OverallView {
    OverallView {
        percentage: compute_overall_percentage(snapshot),
        completed_count: snapshot.completed_task_count,
        milestone: label_for_milestone(snapshot.completed_task_count, &catalog.milestones),
    }
}

pub fn project_category(key: &str, snapshot: &ProgressSnapshot, catalog: &Catalog) -> Option<CategoryView> {
    let category = catalog.category(key)?;
    let (completed, total) = category_counts(key, snapshot, catalog);
    let tasks = category
        .tasks
        .iter()
        .map(|task| {
            let entry = snapshot.entry(key, &task.id);
            TaskView {
                id: task.id.clone(),
                title: task.title.clone(),
                checked: entry.is_some_and(|entry| entry.completed),
                subtasks: subtask_rows(task.subtask_count, entry),
            }
        })
        .collect();

    Some(CategoryView {
        key: category.key.clone(),
        title: category.title.clone(),
        completed,
        total,
        percent: percent(completed, total),
        tasks,
    })
}

/// Numbered rows `"1"..="n"` for the catalog's subtask count, overlaid with
/// stored values. Stored subtasks outside that range follow in key order.
fn subtask_rows(count: Option<u32>, entry: Option<&ProgressEntry>) -> Vec<SubtaskView> {
    let stored = |key: &str| {
        entry
            .and_then(|entry| entry.subtasks.get(key))
            .copied()
            .unwrap_or(false)
    };
    let numbered: Vec<String> = (1..=count.unwrap_or(0)).map(|n| n.to_string()).collect();
    let mut rows: Vec<SubtaskView> = numbered
        .iter()
        .map(|key| SubtaskView {
            key: key.clone(),
            checked: stored(key),
        })
        .collect();
    if let Some(entry) = entry {
        rows.extend(
            entry
                .subtasks
                .iter()
                .filter(|(key, _)| !numbered.contains(key))
                .map(|(key, checked)| SubtaskView {
                    key: key.clone(),
                    checked: *checked,
                }),
        );
    }
    rows
}

pub fn project_dashboard(
    snapshot: &ProgressSnapshot,
    catalog: &Catalog,
    notifications: Vec<Notification>,
) -> DashboardView {
    DashboardView {
        overall: project_overall(snapshot, catalog),
        categories: catalog
            .categories
            .iter()
            .filter_map(|category| project_category(&category.key, snapshot, catalog))
            .collect(),
        notifications,
    }
}

/// Where projected views end up. Implementations only write output.
pub trait RenderTarget: Send {
    fn render_overall(&mut self, view: &OverallView);
    fn render_category(&mut self, view: &CategoryView);
    /// Force a checkbox to a value, e.g. after a rollback.
    fn set_control(&mut self, key: &ProgressKey, checked: bool);
    fn notify(&mut self, notification: &Notification);
}

/// Categories that must be redrawn for a batch of events; `None` means all.
pub fn affected_categories(events: &[StoreEvent]) -> Option<BTreeSet<String>> {
    let mut categories = BTreeSet::new();
    for event in events {
        match event {
            StoreEvent::Reloaded => return None,
            StoreEvent::EntryChanged { key, .. } | StoreEvent::RolledBack { key, .. } => {
                categories.insert(key.category().to_string());
            }
            StoreEvent::Reconciled { .. } | StoreEvent::Notification(_) => {}
        }
    }
    Some(categories)
}

/// Keeps a [`RenderTarget`] in step with the store.
pub struct Projector<T: RenderTarget> {
    store: Arc<ProgressStore>,
    catalog: Arc<Catalog>,
    target: T,
}

impl<T: RenderTarget> Projector<T> {
    pub fn new(store: Arc<ProgressStore>, catalog: Arc<Catalog>, target: T) -> Self {
        Self {
            store,
            catalog,
            target,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    pub async fn render_all(&mut self) {
        self.render(&[StoreEvent::Reloaded]).await;
    }

    /// Apply one batch of events. Only affected categories are redrawn, and
    /// redrawing the same state twice produces the same output.
    pub async fn render(&mut self, events: &[StoreEvent]) {
        let snapshot = self.store.snapshot().await;

        for event in events {
            match event {
                StoreEvent::RolledBack { key, checked } => self.target.set_control(key, *checked),
                // The target owns how long a notification stays up.
                StoreEvent::Notification(note) => self.target.notify(note),
                _ => {}
            }
        }

        let categories: Vec<String> = match affected_categories(events) {
            None => self
                .catalog
                .categories
                .iter()
                .map(|category| category.key.clone())
                .collect(),
            Some(keys) => keys.into_iter().collect(),
        };
        for key in &categories {
            if let Some(view) = project_category(key, &snapshot, &self.catalog) {
                self.target.render_category(&view);
            }
        }
        let redraw_overall = events
            .iter()
            .any(|event| !matches!(event, StoreEvent::Notification(_)));
        if redraw_overall {
            self.target
                .render_overall(&project_overall(&snapshot, &self.catalog));
        }
        debug!(categories = categories.len(), redraw_overall, "projected");
    }

    /// Consume store events until the bus closes. Pending events are drained
    /// into one batch per wake-up.
    pub async fn run(mut self, mut events: broadcast::Receiver<StoreEvent>) -> T {
        self.render_all().await;
        loop {
            let first = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "projector lagged; redrawing everything");
                    self.render_all().await;
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let mut batch = vec![first];
            while let Ok(event) = events.try_recv() {
                batch.push(event);
            }
            self.render(&batch).await;
        }
        self.target
    }
}
