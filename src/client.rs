//! Authenticated request client.
//!
//! Every call fetches a fresh anti-forgery token, then issues the real
//! request. Both steps share the same origin and credential scope.

use crate::errors::{FailureCause, RequestFailed};
use crate::transport::{Body, Credentials, Request, Transport};
use http::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CSRF_FIELD: &str = "_csrf";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
const GENERIC_FAILURE: &str = "Request failed";

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub body: Body,
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: Body::Empty,
            headers: Vec::new(),
        }
    }

    pub fn post(body: Body) -> Self {
        Self {
            method: Method::POST,
            body,
            headers: Vec::new(),
        }
    }

    pub fn json(value: Value) -> Self {
        Self::post(Body::Json(value))
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    token: String,
}

#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    token_endpoint: String,
}

impl AuthClient {
    pub fn new(transport: Arc<dyn Transport>, token_endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            token_endpoint: token_endpoint.into(),
        }
    }

    /// Perform one protected call and return the decoded JSON payload.
    ///
    /// Exactly two requests are issued: the token fetch and the call itself.
    /// Nothing is retried here.
    pub async fn call(&self, endpoint: &str, options: CallOptions) -> Result<Value, RequestFailed> {
        let token = self.fetch_token().await?;

        let CallOptions {
            method,
            mut body,
            headers,
        } = options;
        let mut request = Request::new(method, endpoint);
        request.headers = headers;
        match &mut body {
            Body::Form(fields) => fields.push((CSRF_FIELD.to_string(), token)),
            _ => request.headers.push((CSRF_HEADER.to_string(), token)),
        }
        request.body = body;
        // Scoping is applied after the caller's options so it cannot be overridden.
        request.credentials = Credentials::SameOrigin;

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|err| RequestFailed::new(FailureCause::Transport, err.to_string()))?;
        let payload: Value = response.json().map_err(|err| {
            warn!(endpoint, status = response.status.as_u16(), "undecodable response: {err}");
            RequestFailed::new(FailureCause::Decode, GENERIC_FAILURE)
        })?;

        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            let message = failure_message(&payload);
            debug!(endpoint, %message, "call rejected");
            return Err(RequestFailed::new(FailureCause::Rejected, message));
        }

        Ok(payload)
    }

    async fn fetch_token(&self) -> Result<String, RequestFailed> {
        let token_failed = |detail: String| {
            warn!(endpoint = %self.token_endpoint, "csrf token fetch failed: {detail}");
            RequestFailed::new(FailureCause::TokenFetch, "Could not obtain a security token")
        };

        let mut request = Request::get(self.token_endpoint.as_str());
        request.credentials = Credentials::SameOrigin;
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|err| token_failed(err.to_string()))?;
        if !response.status.is_success() {
            return Err(token_failed(format!("status {}", response.status)));
        }
        let payload: TokenPayload = response
            .json()
            .map_err(|err| token_failed(err.to_string()))?;
        Ok(payload.token)
    }
}

fn failure_message(payload: &Value) -> String {
    ["error", "message"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find(|message| !message.trim().is_empty())
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::transport::{Response, ResponseSource};
    use async_trait::async_trait;
    use http::StatusCode;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every request it sees.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub replies: Mutex<VecDeque<Result<Response, TransportError>>>,
        pub seen: Mutex<Vec<Request>>,
    }

    impl ScriptedTransport {
        pub(crate) fn push_json(&self, status: StatusCode, body: Value) {
            let response = Response::new(status, body.to_string(), ResponseSource::Network);
            self.replies.lock().unwrap().push_back(Ok(response));
        }

        pub(crate) fn push_error(&self, err: TransportError) {
            self.replies.lock().unwrap().push_back(Err(err));
        }

        pub(crate) fn seen(&self) -> Vec<Request> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: Request) -> Result<Response, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no scripted reply".into())))
        }
    }

    fn client(transport: &Arc<ScriptedTransport>) -> AuthClient {
        AuthClient::new(transport.clone(), "/api/csrf-token")
    }

    #[tokio::test]
    async fn form_call_injects_fresh_token_field() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(StatusCode::OK, json!({ "token": "t-1" }));
        transport.push_json(StatusCode::OK, json!({ "success": true, "name": "ada" }));

        let body = Body::Form(vec![("username".into(), "ada".into())]);
        let payload = client(&transport)
            .call("/api/login", CallOptions::post(body))
            .await
            .unwrap();
        assert_eq!(payload["name"], "ada");

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].path, "/api/csrf-token");
        assert_eq!(seen[1].path, "/api/login");
        assert_eq!(
            seen[1].body,
            Body::Form(vec![
                ("username".into(), "ada".into()),
                (CSRF_FIELD.into(), "t-1".into()),
            ])
        );
        assert_eq!(seen[1].credentials, Credentials::SameOrigin);
    }

    #[tokio::test]
    async fn json_call_carries_token_header_and_refetches_each_time() {
        let transport = Arc::new(ScriptedTransport::default());
        for token in ["a", "b"] {
            transport.push_json(StatusCode::OK, json!({ "token": token }));
            transport.push_json(StatusCode::OK, json!({ "success": true }));
        }
        let client = client(&transport);
        client
            .call("/api/progress", CallOptions::json(json!({ "x": 1 })))
            .await
            .unwrap();
        client
            .call("/api/progress", CallOptions::json(json!({ "x": 2 })))
            .await
            .unwrap();

        let seen = transport.seen();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1].header(CSRF_HEADER), Some("a"));
        assert_eq!(seen[3].header(CSRF_HEADER), Some("b"));
    }

    #[tokio::test]
    async fn rejected_payload_carries_server_message_or_generic() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_json(StatusCode::OK, json!({ "success": false, "error": "locked" }));
        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_json(StatusCode::OK, json!({ "data": {} }));

        let client = client(&transport);
        let err = client.call("/api/progress", CallOptions::get()).await.unwrap_err();
        assert_eq!(err.message, "locked");
        assert_eq!(err.cause, FailureCause::Rejected);

        let err = client.call("/api/progress", CallOptions::get()).await.unwrap_err();
        assert_eq!(err.message, GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn token_and_network_failures_surface_as_request_failed() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_error(TransportError::Network("connection reset".into()));

        let client = client(&transport);
        let err = client.call("/api/progress", CallOptions::get()).await.unwrap_err();
        assert_eq!(err.cause, FailureCause::TokenFetch);
        assert_eq!(transport.seen().len(), 1);

        transport.push_json(StatusCode::OK, json!({ "token": "t" }));
        transport.push_error(TransportError::Network("timed out".into()));
        let err = client.call("/api/progress", CallOptions::get()).await.unwrap_err();
        assert_eq!(err.cause, FailureCause::Transport);
        assert!(err.message.contains("timed out"));
    }
}
