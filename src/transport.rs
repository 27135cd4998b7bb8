//! The fetch primitive every outbound request goes through.
//!
//! [`Transport`] is the seam between the request client, the resource cache
//! and the network. [`HttpTransport`] talks to exactly one origin; anything
//! addressed elsewhere is refused, which keeps credentials same-origin.

use crate::errors::TransportError;
use async_trait::async_trait;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    /// Ordered `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

impl Body {
    pub fn is_form(&self) -> bool {
        matches!(self, Body::Form(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    SameOrigin,
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    #[default]
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-relative path including any query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub credentials: Credentials,
    pub mode: RequestMode,
    pub destination: Destination,
    pub cache: CacheMode,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Body::Empty,
            credentials: Credentials::default(),
            mode: RequestMode::default(),
            destination: Destination::default(),
            cache: CacheMode::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A top-level document load, as a browser issues when following a link.
    pub fn navigate(path: impl Into<String>) -> Self {
        let mut request = Self::get(path);
        request.mode = RequestMode::Navigate;
        request.destination = Destination::Document;
        request
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True when the network followed at least one redirect to produce this.
    pub redirected: bool,
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>, source: ResponseSource) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            redirected: false,
            source,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;
}

/// Network transport bound to a single origin.
///
/// Two clients share the configuration: one with a cookie jar for
/// `Credentials::SameOrigin`, one without for `Credentials::Omit`.
pub struct HttpTransport {
    origin: Url,
    with_cookies: reqwest::Client,
    without_cookies: reqwest::Client,
}

impl HttpTransport {
    pub fn new(origin: Url) -> Result<Self, TransportError> {
        let build = |cookies: bool| {
            reqwest::Client::builder()
                .cookie_store(cookies)
                .build()
                .map_err(|err| TransportError::Network(err.to_string()))
        };
        Ok(Self {
            origin,
            with_cookies: build(true)?,
            without_cookies: build(false)?,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        let url = self
            .origin
            .join(path)
            .map_err(|_| TransportError::InvalidPath(path.to_string()))?;
        if url.origin() != self.origin.origin() {
            return Err(TransportError::CrossOrigin(url.to_string()));
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let url = self.resolve(&request.path)?;
        let client = match request.credentials {
            Credentials::SameOrigin => &self.with_cookies,
            Credentials::Omit => &self.without_cookies,
        };

        let mut builder = client.request(request.method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.cache == CacheMode::NoStore {
            builder = builder.header("cache-control", "no-store");
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(&fields),
            Body::Json(value) => builder.json(&value),
            Body::Raw(bytes) => builder.body(bytes),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let redirected = response.url() != &url;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?
            .to_vec();

        debug!(path = %request.path, status = status.as_u16(), redirected, "network response");
        Ok(Response {
            status,
            headers,
            body,
            redirected,
            source: ResponseSource::Network,
        })
    }
}
