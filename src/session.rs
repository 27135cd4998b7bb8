//! Who is signed in, and what that unlocks.

use crate::backend::BackendApi;
use crate::errors::SessionError;
use crate::models::{Identity, LeaderboardRow, Role};
use crate::preferences::PreferenceStore;
use crate::store::ProgressStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct SessionManager {
    api: BackendApi,
    store: Arc<ProgressStore>,
    preferences: Arc<dyn PreferenceStore>,
    identity: RwLock<Option<Identity>>,
}

impl SessionManager {
    pub fn new(
        api: BackendApi,
        store: Arc<ProgressStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            api,
            store,
            preferences,
            identity: RwLock::new(None),
        }
    }

    /// Pick up the identity marker left by a previous run.
    pub async fn restore(&self) -> Option<Identity> {
        let session = match self.preferences.load().await {
            Ok(preferences) => preferences.session,
            Err(err) => {
                warn!("could not read stored session: {err}");
                None
            }
        };
        *self.identity.write().await = session.clone();
        session
    }

    pub async fn current(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, SessionError> {
        let identity = self.api.login(username, password).await?;
        self.begin(identity).await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Identity, SessionError> {
        let identity = self.api.register(username, password).await?;
        self.begin(identity).await
    }

    /// Always clears the local session, whatever the backend says.
    pub async fn logout(&self) {
        self.api.logout().await;
        *self.identity.write().await = None;
        self.remember(None).await;
        info!("signed out");
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardRow>, SessionError> {
        match self.current().await {
            None => Err(SessionError::NotSignedIn),
            Some(identity) if identity.role != Role::Admin => Err(SessionError::PermissionDenied),
            Some(_) => Ok(self.api.leaderboard().await?),
        }
    }

    async fn begin(&self, identity: Identity) -> Result<Identity, SessionError> {
        info!(name = %identity.name, role = ?identity.role, "signed in");
        *self.identity.write().await = Some(identity.clone());
        self.remember(Some(identity.clone())).await;
        // Failure is already surfaced as a store notification.
        if let Err(err) = self.store.load_all().await {
            warn!("initial progress load failed: {err}");
        }
        Ok(identity)
    }

    async fn remember(&self, session: Option<Identity>) {
        let result = match self.preferences.load().await {
            Ok(mut preferences) => {
                preferences.session = session;
                self.preferences.save(&preferences).await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("could not persist session marker: {err}");
        }
    }
}
