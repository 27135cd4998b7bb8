//! Resource cache layer.
//!
//! Mediates every outbound fetch between the network and the on-disk cache.
//! The strategy per request comes from the [`RouteTable`]; whatever happens,
//! callers always get a response back.

use crate::cache_store::DiskCache;
use crate::errors::{CacheError, TransportError};
use crate::routing::{CacheDecision, RouteTable};
use crate::transport::{CacheMode, Destination, Request, Response, ResponseSource, Transport};
use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

const BUILTIN_OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8" /><title>Offline</title></head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>The lab dashboard cannot reach the server right now. Your checklist will be available again once the connection returns.</p>
  </main>
</body>
</html>
"#;

/// Assets precached at install time, plus which of them serve as fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub assets: Vec<String>,
    pub offline_page: String,
    pub placeholder_image: String,
}

impl Default for Manifest {
    fn default() -> Self {
        let offline_page = "/offline.html".to_string();
        let placeholder_image = "/static/img/default-avatar.png".to_string();
        Self {
            assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/static/app.js".to_string(),
                "/static/styles.css".to_string(),
                offline_page.clone(),
                placeholder_image.clone(),
            ],
            offline_page,
            placeholder_image,
        }
    }
}

pub struct ResourceCache {
    network: Arc<dyn Transport>,
    store: DiskCache,
    routes: RouteTable,
    manifest: Manifest,
    ready: AtomicBool,
}

impl ResourceCache {
    pub fn new(
        network: Arc<dyn Transport>,
        store: DiskCache,
        routes: RouteTable,
        manifest: Manifest,
    ) -> Self {
        Self {
            network,
            store,
            routes,
            manifest,
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> &str {
        self.store.generation()
    }

    /// Precache the whole manifest. Any failed asset fails the install and
    /// nothing is written.
    pub async fn install(&self) -> Result<(), CacheError> {
        let mut fetched = Vec::with_capacity(self.manifest.assets.len());
        for path in &self.manifest.assets {
            let request = Request::get(path.as_str()).with_destination(destination_for(path));
            let response = self
                .network
                .execute(request)
                .await
                .map_err(|err| CacheError::Precache {
                    path: path.clone(),
                    reason: err.to_string(),
                })?;
            if response.status != StatusCode::OK || response.redirected {
                return Err(CacheError::Precache {
                    path: path.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((path.clone(), response));
        }

        self.store.replace_with(&fetched).await?;
        self.ready.store(true, Ordering::Release);
        info!(
            generation = %self.store.generation(),
            assets = fetched.len(),
            "cache generation installed"
        );
        Ok(())
    }

    /// Serve the generation already on disk when a fresh install failed.
    ///
    /// Returns `false`, leaving the layer in pass-through, unless every
    /// manifest asset is present.
    pub async fn resume(&self) -> Result<bool, CacheError> {
        for path in &self.manifest.assets {
            if self.store.get(&Request::get(path.as_str())).await?.is_none() {
                debug!(%path, generation = %self.store.generation(), "cached generation incomplete");
                return Ok(false);
            }
        }
        self.ready.store(true, Ordering::Release);
        info!(generation = %self.store.generation(), "serving cached generation from disk");
        Ok(true)
    }

    /// Make this generation the only one on disk.
    pub async fn activate(&self) -> Result<(), CacheError> {
        if !self.is_ready() {
            return Err(CacheError::NotInstalled);
        }
        let removed = self.store.delete_other_generations().await?;
        info!(
            generation = %self.store.generation(),
            removed = removed.len(),
            "cache generation activated"
        );
        Ok(())
    }

    pub async fn handle(&self, request: Request) -> Response {
        if !self.is_ready() {
            return match self.network.execute(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!("network failure before cache install: {err}");
                    service_unavailable()
                }
            };
        }

        let decision = self.routes.decide(&request);
        debug!(path = %request.path, ?decision, "routing request");
        match decision {
            CacheDecision::Bypass => self.network_only(request).await,
            CacheDecision::NetworkOnlyWithFallback => self.auth_page(request).await,
            CacheDecision::NetworkFirstRevalidate => self.network_first(request).await,
            CacheDecision::CacheFirstWithNetworkFallback => self.cache_first(request).await,
        }
    }

    /// API traffic: never read from or written to the cache.
    async fn network_only(&self, request: Request) -> Response {
        let path = request.path.clone();
        match self.network.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%path, "api unreachable: {err}");
                api_unreachable()
            }
        }
    }

    async fn auth_page(&self, mut request: Request) -> Response {
        request.cache = CacheMode::NoStore;
        let path = request.path.clone();
        match self.network.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%path, "auth page unreachable: {err}");
                self.offline_page().await
            }
        }
    }

    /// Only a direct 200 counts; redirects and error statuses fall back.
    async fn network_first(&self, request: Request) -> Response {
        let failure = match self.network.execute(request.clone()).await {
            Ok(response) if response.status == StatusCode::OK && !response.redirected => {
                self.remember(&request, &response).await;
                return response;
            }
            Ok(response) => format!("status {} (redirected: {})", response.status, response.redirected),
            Err(err) => err.to_string(),
        };

        debug!(path = %request.path, %failure, "navigation failed; trying cache");
        if let Some(cached) = self.lookup(&request).await {
            return cached;
        }
        self.offline_page().await
    }

    async fn cache_first(&self, request: Request) -> Response {
        if let Some(cached) = self.lookup(&request).await {
            return cached;
        }

        match self.network.execute(request.clone()).await {
            Ok(response) => {
                self.remember(&request, &response).await;
                response
            }
            Err(err) => self.asset_fallback(&request, err).await,
        }
    }

    async fn asset_fallback(&self, request: &Request, err: TransportError) -> Response {
        warn!(path = %request.path, "asset unreachable: {err}");
        if is_image(request) {
            let placeholder = Request::get(self.manifest.placeholder_image.as_str());
            if let Some(mut image) = self.lookup(&placeholder).await {
                image.source = ResponseSource::Fallback;
                return image;
            }
        }
        service_unavailable()
    }

    async fn offline_page(&self) -> Response {
        let request = Request::get(self.manifest.offline_page.as_str());
        match self.lookup(&request).await {
            Some(mut page) => {
                page.source = ResponseSource::Fallback;
                page
            }
            None => Response::new(StatusCode::OK, BUILTIN_OFFLINE_PAGE, ResponseSource::Fallback)
                .with_header("content-type", "text/html; charset=utf-8"),
        }
    }

    /// Cache read; storage problems count as a miss.
    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.store.get(request).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(path = %request.path, "cache read failed: {err}");
                None
            }
        }
    }

    async fn remember(&self, request: &Request, response: &Response) {
        if !DiskCache::is_storable(request, response) {
            return;
        }
        if let Err(err) = self.store.put(request, response).await {
            warn!(path = %request.path, "cache write failed: {err}");
        }
    }
}

#[async_trait]
impl Transport for ResourceCache {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        Ok(self.handle(request).await)
    }
}

fn destination_for(path: &str) -> Destination {
    let extension = extension(path);
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Destination::Image
    } else if extension == "js" {
        Destination::Script
    } else if extension == "css" {
        Destination::Style
    } else if extension.is_empty() || extension == "html" {
        Destination::Document
    } else {
        Destination::Other
    }
}

fn extension(path: &str) -> String {
    let route = path.split(['?', '#']).next().unwrap_or_default();
    let file = route.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((_, extension)) => extension.to_ascii_lowercase(),
        None => String::new(),
    }
}

fn is_image(request: &Request) -> bool {
    request.destination == Destination::Image
        || IMAGE_EXTENSIONS.contains(&extension(&request.path).as_str())
}

pub fn api_unreachable() -> Response {
    let body = json!({
        "success": false,
        "error": "Service unreachable",
        "offline": true,
    });
    Response::new(StatusCode::SERVICE_UNAVAILABLE, body.to_string(), ResponseSource::Synthetic)
        .with_header("content-type", "application/json")
}

pub fn service_unavailable() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable", ResponseSource::Synthetic)
        .with_header("content-type", "text/plain; charset=utf-8")
}
