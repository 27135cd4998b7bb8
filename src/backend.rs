//! Typed wrappers over the remote training backend's endpoints.

use crate::client::{AuthClient, CallOptions};
use crate::config::Endpoints;
use crate::errors::{FailureCause, RequestFailed};
use crate::models::{
    AuthResponse, Envelope, Identity, LeaderboardRow, Preferences, ProgressSnapshot,
    SubtaskToggle, TaskToggle,
};
use crate::transport::Body;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

/// What the progress store needs from the backend.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    async fn fetch_progress(&self) -> Result<ProgressSnapshot, RequestFailed>;

    async fn persist_task(
        &self,
        category: &str,
        task_id: &str,
        checked: bool,
    ) -> Result<ProgressSnapshot, RequestFailed>;

    async fn persist_subtask(
        &self,
        category: &str,
        task_id: &str,
        subtask: &str,
        checked: bool,
    ) -> Result<ProgressSnapshot, RequestFailed>;

    async fn reset_lab(&self) -> Result<(), RequestFailed>;
}

#[derive(Clone)]
pub struct BackendApi {
    client: AuthClient,
    endpoints: Endpoints,
}

impl BackendApi {
    pub fn new(client: AuthClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, RequestFailed> {
        self.authenticate(&self.endpoints.login, username, password)
            .await
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, RequestFailed> {
        self.authenticate(&self.endpoints.register, username, password)
            .await
    }

    /// Best-effort: a failed remote logout never blocks the local one.
    pub async fn logout(&self) {
        match self
            .client
            .call(&self.endpoints.logout, CallOptions::post(Body::Empty))
            .await
        {
            Ok(_) => info!("remote session closed"),
            Err(err) => warn!("remote logout failed, continuing locally: {err}"),
        }
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardRow>, RequestFailed> {
        let payload = self
            .client
            .call(&self.endpoints.leaderboard, CallOptions::get())
            .await?;
        data_of(payload)
    }

    pub async fn load_preferences(&self) -> Result<Preferences, RequestFailed> {
        let payload = self
            .client
            .call(&self.endpoints.preferences, CallOptions::get())
            .await?;
        data_of(payload)
    }

    pub async fn save_preferences(&self, preferences: &Preferences) -> Result<(), RequestFailed> {
        let value = serde_json::to_value(preferences)
            .map_err(|err| RequestFailed::new(FailureCause::Decode, err.to_string()))?;
        self.client
            .call(&self.endpoints.preferences, CallOptions::json(value))
            .await?;
        Ok(())
    }

    async fn authenticate(
        &self,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<Identity, RequestFailed> {
        let form = Body::Form(vec![
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ]);
        let payload = self.client.call(endpoint, CallOptions::post(form)).await?;
        let response: AuthResponse = serde_json::from_value(payload)
            .map_err(|err| RequestFailed::new(FailureCause::Decode, err.to_string()))?;
        Ok(Identity {
            name: response.name.unwrap_or_else(|| username.to_string()),
            role: response.role.unwrap_or_default(),
        })
    }

    async fn persist(&self, payload: Value) -> Result<ProgressSnapshot, RequestFailed> {
        let payload = self
            .client
            .call(&self.endpoints.progress, CallOptions::json(payload))
            .await?;
        data_of(payload)
    }
}

#[async_trait]
impl ProgressBackend for BackendApi {
    async fn fetch_progress(&self) -> Result<ProgressSnapshot, RequestFailed> {
        let payload = self
            .client
            .call(&self.endpoints.progress, CallOptions::get())
            .await?;
        data_of(payload)
    }

    async fn persist_task(
        &self,
        category: &str,
        task_id: &str,
        checked: bool,
    ) -> Result<ProgressSnapshot, RequestFailed> {
        let toggle = TaskToggle {
            category,
            task_id,
            checked,
        };
        let value = serde_json::to_value(toggle)
            .map_err(|err| RequestFailed::new(FailureCause::Decode, err.to_string()))?;
        self.persist(value).await
    }

    async fn persist_subtask(
        &self,
        category: &str,
        task_id: &str,
        subtask: &str,
        checked: bool,
    ) -> Result<ProgressSnapshot, RequestFailed> {
        let toggle = SubtaskToggle {
            category,
            task_id,
            subtask_key: subtask,
            subtask_checked: checked,
        };
        let value = serde_json::to_value(toggle)
            .map_err(|err| RequestFailed::new(FailureCause::Decode, err.to_string()))?;
        self.persist(value).await
    }

    async fn reset_lab(&self) -> Result<(), RequestFailed> {
        self.client
            .call(&self.endpoints.reset_lab, CallOptions::post(Body::Empty))
            .await?;
        Ok(())
    }
}

/// Pull `data` out of a successful envelope.
fn data_of<T: DeserializeOwned>(payload: Value) -> Result<T, RequestFailed> {
    let envelope: Envelope<T> = serde_json::from_value(payload)
        .map_err(|err| RequestFailed::new(FailureCause::Decode, err.to_string()))?;
    envelope
        .data
        .ok_or_else(|| RequestFailed::new(FailureCause::Decode, "response carried no data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::ScriptedTransport;
    use crate::client::CSRF_HEADER;
    use http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    fn api(transport: &Arc<ScriptedTransport>) -> BackendApi {
        let endpoints = Endpoints::default();
        let client = AuthClient::new(transport.clone(), endpoints.csrf_token.clone());
        BackendApi::new(client, endpoints)
    }

    #[tokio::test]
    async fn persist_task_posts_camel_case_toggle() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_json(
            StatusCode::OK,
            json!({ "success": true, "data": { "completedTaskCount": 1, "progressPercentage": 2 } }),
        );

        let snapshot = api(&transport)
            .persist_task("week1", "week1-install-server2012", true)
            .await
            .unwrap();
        assert_eq!(snapshot.completed_task_count, 1);
        assert_eq!(snapshot.progress_percentage, Some(2.0));
        assert!(snapshot.categories.is_none());

        let seen = transport.seen();
        assert_eq!(seen[1].header(CSRF_HEADER), Some("t"));
        assert_eq!(
            seen[1].body,
            Body::Json(json!({
                "category": "week1",
                "taskId": "week1-install-server2012",
                "checked": true,
            }))
        );
    }

    #[tokio::test]
    async fn persist_subtask_uses_subtask_fields() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_json(StatusCode::OK, json!({ "success": true, "data": {} }));

        api(&transport)
            .persist_subtask("week2", "dns", "forward-zone", false)
            .await
            .unwrap();
        assert_eq!(
            transport.seen()[1].body,
            Body::Json(json!({
                "category": "week2",
                "taskId": "dns",
                "subtaskKey": "forward-zone",
                "subtaskChecked": false,
            }))
        );
    }

    #[tokio::test]
    async fn login_defaults_missing_fields() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_json(StatusCode::OK, json!({ "success": true, "role": "admin" }));

        let identity = api(&transport).login("grace", "hopper").await.unwrap();
        assert_eq!(identity.name, "grace");
        assert_eq!(identity.role, crate::models::Role::Admin);
    }

    #[tokio::test]
    async fn logout_swallows_failures() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_error(crate::errors::TransportError::Network("offline".into()));
        api(&transport).logout().await;
        assert_eq!(transport.seen().len(), 1);
    }

    #[test]
    fn data_is_required_in_a_successful_reply() {
        let snapshot: ProgressSnapshot =
            data_of(json!({ "success": true, "message": "ok", "data": { "completedTaskCount": 3 } }))
                .unwrap();
        assert_eq!(snapshot.completed_task_count, 3);

        let err = data_of::<ProgressSnapshot>(json!({ "success": true })).unwrap_err();
        assert_eq!(err.cause, FailureCause::Decode);
    }
}
