//! Two-tier preference persistence.
//!
//! The remote tier is the backend's preference endpoint; the local tier is a
//! small JSON file next to the other runtime data. Reads prefer the remote
//! tier whenever it reports itself available, and every write also lands
//! locally so the fallback is never stale.

use crate::backend::BackendApi;
use crate::errors::{FailureCause, PreferenceError};
use crate::models::Preferences;
use crate::storage::{load_json, persist_json};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Capability check; callers route around tiers that answer `false`.
    async fn is_available(&self) -> bool;

    async fn load(&self) -> Result<Preferences, PreferenceError>;

    async fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError>;
}

pub struct LocalPreferences {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl LocalPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PreferenceStore for LocalPreferences {
    async fn is_available(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<Preferences, PreferenceError> {
        let _guard = self.lock.lock().await;
        Ok(load_json(&self.path).await)
    }

    async fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().await;
        persist_json(&self.path, preferences).await?;
        Ok(())
    }
}

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// The backend's preference endpoint.
///
/// Goes unavailable after a call fails below the HTTP layer. Once
/// `retry_after` has passed it reports itself available again, and the next
/// call decides whether it stays that way.
pub struct RemotePreferences {
    api: BackendApi,
    down_since: std::sync::Mutex<Option<Instant>>,
    retry_after: Duration,
}

impl RemotePreferences {
    pub fn new(api: BackendApi) -> Self {
        Self {
            api,
            down_since: std::sync::Mutex::new(None),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    fn observe(&self, cause: Option<FailureCause>) {
        let unreachable = matches!(cause, Some(FailureCause::Transport | FailureCause::TokenFetch));
        let mut down_since = self.down_since.lock().unwrap_or_else(PoisonError::into_inner);
        match (unreachable, *down_since) {
            (true, None) => {
                warn!(retry_after = ?self.retry_after, "remote preferences unreachable");
                *down_since = Some(Instant::now());
            }
            // A failed retry restarts the cooldown.
            (true, Some(_)) => *down_since = Some(Instant::now()),
            (false, Some(_)) => {
                debug!("remote preferences reachable again");
                *down_since = None;
            }
            (false, None) => {}
        }
    }
}

#[async_trait]
impl PreferenceStore for RemotePreferences {
    async fn is_available(&self) -> bool {
        let down_since = self.down_since.lock().unwrap_or_else(PoisonError::into_inner);
        down_since.is_none_or(|since| since.elapsed() >= self.retry_after)
    }

    async fn load(&self) -> Result<Preferences, PreferenceError> {
        match self.api.load_preferences().await {
            Ok(preferences) => {
                self.observe(None);
                Ok(preferences)
            }
            Err(err) => {
                self.observe(Some(err.cause));
                Err(err.into())
            }
        }
    }

    async fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        match self.api.save_preferences(preferences).await {
            Ok(()) => {
                self.observe(None);
                Ok(())
            }
            Err(err) => {
                self.observe(Some(err.cause));
                Err(err.into())
            }
        }
    }
}

pub struct TieredPreferences {
    remote: Arc<dyn PreferenceStore>,
    local: Arc<dyn PreferenceStore>,
}

impl TieredPreferences {
    pub fn new(remote: Arc<dyn PreferenceStore>, local: Arc<dyn PreferenceStore>) -> Self {
        Self { remote, local }
    }

    /// Read the local tier only. Never touches the network.
    pub async fn load_local(&self) -> Result<Preferences, PreferenceError> {
        self.local.load().await
    }

    /// Load, apply `change`, and save back through both tiers.
    pub async fn update(
        &self,
        change: impl FnOnce(&mut Preferences) + Send,
    ) -> Result<Preferences, PreferenceError> {
        let mut preferences = self.load().await?;
        change(&mut preferences);
        self.save(&preferences).await?;
        Ok(preferences)
    }
}

#[async_trait]
impl PreferenceStore for TieredPreferences {
    async fn is_available(&self) -> bool {
        self.remote.is_available().await || self.local.is_available().await
    }

    async fn load(&self) -> Result<Preferences, PreferenceError> {
        if self.remote.is_available().await {
            match self.remote.load().await {
                Ok(preferences) => {
                    if let Err(err) = self.local.save(&preferences).await {
                        warn!("could not mirror remote preferences locally: {err}");
                    }
                    return Ok(preferences);
                }
                Err(err) => warn!("remote preferences unavailable, using local copy: {err}"),
            }
        }
        if !self.local.is_available().await {
            return Err(PreferenceError::Unavailable);
        }
        self.local.load().await
    }

    async fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        self.local.save(preferences).await?;
        if self.remote.is_available().await {
            if let Err(err) = self.remote.save(preferences).await {
                warn!("remote preference save failed, kept locally: {err}");
            }
        } else {
            debug!("remote preferences unavailable; saved locally only");
        }
        Ok(())
    }
}
