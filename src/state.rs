use crate::cache::ResourceCache;
use crate::catalog::Catalog;
use crate::events::Notification;
use crate::models::ProgressKey;
use crate::preferences::TieredPreferences;
use crate::projector::{CategoryView, DashboardView, OverallView, RenderTarget};
use crate::session::SessionManager;
use crate::store::ProgressStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProgressStore>,
    pub catalog: Arc<Catalog>,
    pub session: Arc<SessionManager>,
    pub preferences: Arc<TieredPreferences>,
    pub cache: Arc<ResourceCache>,
    pub view: LiveView,
}

#[derive(Debug, Default)]
struct Panes {
    overall: Option<OverallView>,
    categories: BTreeMap<String, CategoryView>,
    notifications: Vec<Notification>,
}

/// The last rendered dashboard, shared between the projector task and the
/// HTTP handlers.
#[derive(Debug, Clone, Default)]
pub struct LiveView {
    panes: Arc<Mutex<Panes>>,
}

impl LiveView {
    fn panes(&self) -> MutexGuard<'_, Panes> {
        self.panes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` until the projector has drawn the overall header once.
    pub fn dashboard(&self, catalog: &Catalog, now: DateTime<Utc>) -> Option<DashboardView> {
        let mut panes = self.panes();
        panes.notifications.retain(|note| !note.is_expired(now));
        let overall = panes.overall.clone()?;
        let categories = catalog
            .categories
            .iter()
            .filter_map(|category| panes.categories.get(&category.key).cloned())
            .collect();
        Some(DashboardView {
            overall,
            categories,
            notifications: panes.notifications.clone(),
        })
    }

    pub fn notifications(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut panes = self.panes();
        panes.notifications.retain(|note| !note.is_expired(now));
        panes.notifications.clone()
    }
}

impl RenderTarget for LiveView {
    fn render_overall(&mut self, view: &OverallView) {
        self.panes().overall = Some(view.clone());
    }

    fn render_category(&mut self, view: &CategoryView) {
        self.panes().categories.insert(view.key.clone(), view.clone());
    }

    fn set_control(&mut self, key: &ProgressKey, checked: bool) {
        let mut panes = self.panes();
        let Some(category) = panes.categories.get_mut(key.category()) else {
            return;
        };
        let Some(task) = category.tasks.iter_mut().find(|task| task.id == key.task_id()) else {
            return;
        };
        match key {
            ProgressKey::Task { .. } => task.checked = checked,
            ProgressKey::Subtask { subtask, .. } => {
                if let Some(view) = task.subtasks.iter_mut().find(|view| &view.key == subtask) {
                    view.checked = checked;
                }
            }
        }
    }

    fn notify(&mut self, notification: &Notification) {
        let mut panes = self.panes();
        let now = notification.created_at;
        panes.notifications.retain(|note| !note.is_expired(now));
        panes.notifications.push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressSnapshot;
    use crate::projector::{project_category, project_overall};

    #[test]
    fn dashboard_waits_for_first_render_and_keeps_catalog_order() {
        let catalog = Catalog::default();
        let mut view = LiveView::default();
        assert!(view.dashboard(&catalog, Utc::now()).is_none());

        let snapshot = ProgressSnapshot::default();
        for key in ["week3", "week1"] {
            let pane = project_category(key, &snapshot, &catalog).unwrap();
            view.render_category(&pane);
        }
        view.render_overall(&project_overall(&snapshot, &catalog));

        let dashboard = view.dashboard(&catalog, Utc::now()).unwrap();
        let keys: Vec<_> = dashboard.categories.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["week1", "week3"]);
    }

    #[test]
    fn set_control_flips_rendered_checkbox() {
        let catalog = Catalog::default();
        let mut view = LiveView::default();
        let pane = project_category("week1", &ProgressSnapshot::default(), &catalog).unwrap();
        view.render_category(&pane);

        let key = ProgressKey::task("week1", "week1-install-server2012");
        view.set_control(&key, true);
        let panes = view.panes();
        assert!(panes.categories["week1"].tasks[0].checked);
    }

    #[test]
    fn expired_notifications_drop_out() {
        let mut view = LiveView::default();
        let created = Utc::now();
        view.notify(&Notification::at(
            crate::events::NotificationKind::Error,
            "locked",
            created,
        ));
        assert_eq!(view.notifications(created).len(), 1);
        assert!(view
            .notifications(created + chrono::Duration::seconds(5))
            .is_empty());
    }

    #[test]
    fn unread_notifications_do_not_pile_up() {
        let mut view = LiveView::default();
        let start = Utc::now();
        for second in 0..20 {
            view.notify(&Notification::at(
                crate::events::NotificationKind::Error,
                "offline",
                start + chrono::Duration::seconds(second * 5),
            ));
        }
        assert_eq!(view.panes().notifications.len(), 1);
    }
}
