//! Client-side mirror of a user's completion state.
//!
//! Toggles are applied optimistically, persisted through the backend, then
//! reconciled with the snapshot the server returns. Writes to the same key run
//! one at a time in submission order; a toggle that has been overtaken by a
//! newer one for the same key is dropped before it reaches the server.

use crate::backend::ProgressBackend;
use crate::errors::{RequestFailed, SyncError};
use crate::events::{EventBus, Notification, StoreEvent};
use crate::models::{CategoryEntries, ProgressEntry, ProgressKey, ProgressSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    /// The server accepted the value and returned this snapshot.
    Confirmed(ProgressSnapshot),
    /// A newer toggle for the same key was issued before this one ran.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ProgressState {
    categories: BTreeMap<String, CategoryEntries>,
    completed_task_count: u32,
    progress_percentage: Option<f64>,
}

impl ProgressState {
    fn from_snapshot(snapshot: ProgressSnapshot) -> Self {
        Self {
            categories: snapshot.categories.unwrap_or_default(),
            completed_task_count: snapshot.completed_task_count,
            progress_percentage: snapshot.progress_percentage,
        }
    }

    fn value(&self, key: &ProgressKey) -> bool {
        let entry = self
            .categories
            .get(key.category())
            .and_then(|tasks| tasks.get(key.task_id()));
        match (key, entry) {
            (_, None) => false,
            (ProgressKey::Task { .. }, Some(entry)) => entry.completed,
            (ProgressKey::Subtask { subtask, .. }, Some(entry)) => {
                entry.subtasks.get(subtask).copied().unwrap_or(false)
            }
        }
    }

    fn set(&mut self, key: &ProgressKey, checked: bool) {
        let entry = self
            .categories
            .entry(key.category().to_string())
            .or_default()
            .entry(key.task_id().to_string())
            .or_default();
        match key {
            ProgressKey::Task { .. } => entry.completed = checked,
            ProgressKey::Subtask { subtask, .. } => {
                entry.subtasks.insert(subtask.clone(), checked);
            }
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_task_count: self.completed_task_count,
            progress_percentage: self.progress_percentage,
            categories: Some(self.categories.clone()),
        }
    }
}

/// Per-key write bookkeeping.
#[derive(Debug, Clone, Copy)]
struct KeyState {
    /// Last value the server accepted, or the value before the first
    /// unconfirmed toggle. Rollbacks restore this.
    confirmed: bool,
    /// Value requested by the newest toggle.
    requested: bool,
    /// Sequence number of the newest toggle.
    latest: u64,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: ProgressState,
    keys: HashMap<ProgressKey, KeyState>,
    /// Ticket of the newest request whose snapshot was adopted wholesale.
    applied: u64,
}

pub struct ProgressStore {
    backend: Arc<dyn ProgressBackend>,
    inner: RwLock<Inner>,
    queues: Mutex<HashMap<ProgressKey, Arc<Mutex<()>>>>,
    /// Issues tickets in send order so replies can be ordered on arrival.
    tickets: AtomicU64,
    events: EventBus,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressBackend>, events: EventBus) -> Self {
        Self {
            backend,
            inner: RwLock::new(Inner::default()),
            queues: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
            events,
        }
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.inner.read().await.state.snapshot()
    }

    pub async fn entry(&self, category: &str, task_id: &str) -> Option<ProgressEntry> {
        let inner = self.inner.read().await;
        inner.state.categories.get(category)?.get(task_id).cloned()
    }

    pub async fn value(&self, key: &ProgressKey) -> bool {
        self.inner.read().await.state.value(key)
    }

    /// Replace the whole local mirror with the server's current snapshot.
    ///
    /// Never merges: stale local state must not survive a server-side reset.
    pub async fn load_all(&self) -> Result<(), SyncError> {
        let ticket = self.next_ticket();
        let snapshot = match self.backend.fetch_progress().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("progress load failed: {err}");
                self.events
                    .publish(StoreEvent::Notification(Notification::error(err.message.clone())));
                return Err(err.into());
            }
        };

        {
            let mut inner = self.inner.write().await;
            inner.state = ProgressState::from_snapshot(snapshot);
            inner.applied = inner.applied.max(ticket);
            let Inner { state, keys, .. } = &mut *inner;
            keys.retain(|_, key_state| key_state.in_flight > 0);
            for (key, key_state) in keys.iter_mut() {
                key_state.confirmed = state.value(key);
            }
            info!(
                completed = state.completed_task_count,
                categories = state.categories.len(),
                "progress loaded"
            );
        }
        self.events.publish(StoreEvent::Reloaded);
        Ok(())
    }

    /// Reset the lab server-side, then reload everything.
    pub async fn start_new_lab(&self) -> Result<(), SyncError> {
        if let Err(err) = self.backend.reset_lab().await {
            warn!("lab reset failed: {err}");
            self.events
                .publish(StoreEvent::Notification(Notification::error(err.message.clone())));
            return Err(err.into());
        }
        self.load_all().await
    }

    pub async fn toggle_task(
        &self,
        category: &str,
        task_id: &str,
        checked: bool,
    ) -> Result<ToggleOutcome, SyncError> {
        self.toggle(ProgressKey::task(category, task_id), checked)
            .await
    }

    /// Subtask toggles never touch the task-level `completed` flag.
    pub async fn toggle_subtask(
        &self,
        category: &str,
        task_id: &str,
        subtask: &str,
        checked: bool,
    ) -> Result<ToggleOutcome, SyncError> {
        self.toggle(ProgressKey::subtask(category, task_id, subtask), checked)
            .await
    }

    pub async fn toggle(&self, key: ProgressKey, checked: bool) -> Result<ToggleOutcome, SyncError> {
        let seq = self.apply_optimistic(&key, checked).await;

        let queue = self.queue_for(&key).await;
        let _turn = queue.lock().await;

        if self.is_superseded(&key, seq).await {
            debug!(%key, seq, "toggle superseded before persisting");
            self.finish(&key).await;
            return Ok(ToggleOutcome::Superseded);
        }

        let ticket = self.next_ticket();
        match self.persist(&key, checked).await {
            Ok(snapshot) => {
                self.reconcile(&key, checked, ticket, snapshot.clone()).await;
                Ok(ToggleOutcome::Confirmed(snapshot))
            }
            Err(source) => {
                let drift = SyncError::ReconciliationDrift { key, source };
                self.roll_back(seq, &drift).await;
                Err(drift)
            }
        }
    }

    async fn apply_optimistic(&self, key: &ProgressKey, checked: bool) -> u64 {
        let seq = {
            let mut inner = self.inner.write().await;
            let previous = inner.state.value(key);
            let key_state = inner.keys.entry(key.clone()).or_insert(KeyState {
                confirmed: previous,
                requested: previous,
                latest: 0,
                in_flight: 0,
            });
            if key_state.in_flight == 0 {
                key_state.confirmed = previous;
            }
            key_state.latest += 1;
            key_state.requested = checked;
            key_state.in_flight += 1;
            let seq = key_state.latest;
            inner.state.set(key, checked);
            seq
        };
        self.events.publish(StoreEvent::EntryChanged {
            key: key.clone(),
            checked,
        });
        seq
    }

    async fn queue_for(&self, key: &ProgressKey) -> Arc<Mutex<()>> {
        let mut queues = self.queues.lock().await;
        queues.entry(key.clone()).or_default().clone()
    }

    async fn is_superseded(&self, key: &ProgressKey, seq: u64) -> bool {
        let inner = self.inner.read().await;
        inner
            .keys
            .get(key)
            .is_some_and(|key_state| key_state.latest != seq)
    }

    async fn finish(&self, key: &ProgressKey) {
        let mut inner = self.inner.write().await;
        if let Some(key_state) = inner.keys.get_mut(key) {
            key_state.in_flight = key_state.in_flight.saturating_sub(1);
        }
    }

    async fn persist(&self, key: &ProgressKey, checked: bool) -> Result<ProgressSnapshot, RequestFailed> {
        match key {
            ProgressKey::Task { category, task_id } => {
                self.backend.persist_task(category, task_id, checked).await
            }
            ProgressKey::Subtask {
                category,
                task_id,
                subtask,
            } => {
                self.backend
                    .persist_subtask(category, task_id, subtask, checked)
                    .await
            }
        }
    }

    /// Adopt the server's snapshot as canonical, keeping optimistic values for
    /// keys that still have newer toggles queued.
    ///
    /// A reply older than the last adopted snapshot only confirms its own key;
    /// the newer snapshot already reflects this write.
    async fn reconcile(
        &self,
        key: &ProgressKey,
        checked: bool,
        ticket: u64,
        snapshot: ProgressSnapshot,
    ) {
        let (changed, completed_count, percentage) = {
            let mut inner = self.inner.write().await;
            if let Some(key_state) = inner.keys.get_mut(key) {
                key_state.in_flight = key_state.in_flight.saturating_sub(1);
                key_state.confirmed = checked;
            }

            let Inner {
                state,
                keys,
                applied,
            } = &mut *inner;
            let before = state.clone();
            if ticket < *applied {
                debug!(%key, ticket, applied = *applied, "late reply, newer snapshot kept");
            } else {
                *applied = ticket;
                state.completed_task_count = snapshot.completed_task_count;
                state.progress_percentage = snapshot.progress_percentage;
                if let Some(categories) = snapshot.categories {
                    state.categories = categories;
                    for (pending_key, key_state) in keys.iter_mut() {
                        if key_state.in_flight > 0 {
                            state.set(pending_key, key_state.requested);
                        } else if pending_key != key {
                            key_state.confirmed = state.value(pending_key);
                        }
                    }
                }
            }

            (
                changed_keys(&before, state),
                state.completed_task_count,
                state.progress_percentage,
            )
        };

        debug!(%key, completed_count, ?percentage, "reconciled with server");
        for (key, checked) in changed {
            self.events.publish(StoreEvent::EntryChanged { key, checked });
        }
        self.events.publish(StoreEvent::Reconciled {
            completed_count,
            percentage,
        });
    }

    /// Undo a rejected toggle unless a newer toggle for the key is queued; that
    /// one owns the visible value now.
    async fn roll_back(&self, seq: u64, drift: &SyncError) {
        let SyncError::ReconciliationDrift { key, .. } = drift else {
            return;
        };
        let reverted = {
            let mut inner = self.inner.write().await;
            let Some(key_state) = inner.keys.get_mut(key) else {
                return;
            };
            key_state.in_flight = key_state.in_flight.saturating_sub(1);
            if key_state.latest == seq {
                let restored = key_state.confirmed;
                key_state.requested = restored;
                inner.state.set(key, restored);
                Some(restored)
            } else {
                None
            }
        };

        warn!("{drift}");
        if let Some(checked) = reverted {
            self.events.publish(StoreEvent::RolledBack {
                key: key.clone(),
                checked,
            });
        }
        self.events
            .publish(StoreEvent::Notification(Notification::error(drift.message())));
    }
}

/// Keys whose checkbox value differs between two states.
fn changed_keys(before: &ProgressState, after: &ProgressState) -> Vec<(ProgressKey, bool)> {
    let mut keys = Vec::new();
    let mut collect = |state: &ProgressState| {
        for (category, tasks) in &state.categories {
            for (task_id, entry) in tasks {
                keys.push(ProgressKey::task(category, task_id));
                for subtask in entry.subtasks.keys() {
                    keys.push(ProgressKey::subtask(category, task_id, subtask));
                }
            }
        }
    };
    collect(before);
    collect(after);
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter_map(|key| {
            let now = after.value(&key);
            (before.value(&key) != now).then_some((key, now))
        })
        .collect()
}
