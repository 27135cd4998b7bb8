//! On-disk response cache, one directory per cache generation.
//!
//! Each entry is a `<digest>.json` metadata file plus a `<digest>.body` file,
//! where the digest is the SHA-256 of `GET <path>`.

use crate::errors::CacheError;
use crate::transport::{Request, Response, ResponseSource};
use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    path: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    generation: String,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>, generation: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            generation: generation.into(),
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    fn dir(&self) -> PathBuf {
        self.root.join(&self.generation)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(format!(".{}.staging", self.generation))
    }

    /// Only successful `GET`s are worth keeping.
    pub fn is_storable(request: &Request, response: &Response) -> bool {
        request.method == Method::GET && response.status == StatusCode::OK && !response.redirected
    }

    pub async fn get(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let name = entry_name(&request.path);
        let dir = self.dir();

        let meta = match fs::read(dir.join(format!("{name}.json"))).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let meta: EntryMeta = match serde_json::from_slice(&meta) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %request.path, "discarding unreadable cache entry: {err}");
                return Ok(None);
            }
        };
        let body = match fs::read(dir.join(format!("{name}.body"))).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let status = StatusCode::from_u16(meta.status).unwrap_or(StatusCode::OK);
        Ok(Some(Response {
            status,
            headers: meta.headers,
            body,
            redirected: false,
            source: ResponseSource::Cache,
        }))
    }

    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        let dir = self.dir();
        fs::create_dir_all(&dir).await?;
        write_entry(&dir, &request.path, response).await
    }

    /// Write a complete set of entries as this generation's contents.
    ///
    /// Entries are staged in a sibling directory and moved into place only
    /// once every write succeeded.
    pub async fn replace_with(&self, entries: &[(String, Response)]) -> Result<(), CacheError> {
        let staging = self.staging_dir();
        remove_dir_if_present(&staging).await?;
        fs::create_dir_all(&staging).await?;

        for (path, response) in entries {
            if let Err(err) = write_entry(&staging, path, response).await {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(err);
            }
        }

        let dir = self.dir();
        remove_dir_if_present(&dir).await?;
        fs::rename(&staging, &dir).await?;
        Ok(())
    }

    pub async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete every generation other than this one. Returns what was removed.
    pub async fn delete_other_generations(&self) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        for name in self.generations().await? {
            if name == self.generation {
                continue;
            }
            fs::remove_dir_all(self.root.join(&name)).await?;
            info!(generation = %name, "deleted stale cache generation");
            removed.push(name);
        }
        Ok(removed)
    }
}

fn entry_name(path: &str) -> String {
    hex::encode(Sha256::digest(format!("GET {path}").as_bytes()))
}

async fn write_entry(dir: &Path, path: &str, response: &Response) -> Result<(), CacheError> {
    let name = entry_name(path);
    let meta = EntryMeta {
        path: path.to_string(),
        status: response.status.as_u16(),
        headers: response.headers.clone(),
        stored_at: Utc::now(),
    };
    // Body first so a visible meta file always has its body.
    fs::write(dir.join(format!("{name}.body")), &response.body).await?;
    fs::write(dir.join(format!("{name}.json")), serde_json::to_vec_pretty(&meta)?).await?;
    Ok(())
}

async fn remove_dir_if_present(dir: &Path) -> Result<(), CacheError> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn unique_cache_root(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut path = std::env::temp_dir();
        path.push(format!("lab_progress_{tag}_{}_{}", std::process::id(), nanos));
        path
    }

    fn ok(body: &str) -> Response {
        Response::new(StatusCode::OK, body, ResponseSource::Network)
            .with_header("content-type", "text/plain")
    }

    #[tokio::test]
    async fn put_then_get_round_trips_body_and_headers() {
        let cache = DiskCache::new(unique_cache_root("rt"), "v1");
        let request = Request::get("/static/app.js");
        cache.put(&request, &ok("console.log(1)")).await.unwrap();

        let hit = cache.get(&request).await.unwrap().unwrap();
        assert_eq!(hit.body, b"console.log(1)");
        assert_eq!(hit.header("content-type"), Some("text/plain"));
        assert_eq!(hit.source, ResponseSource::Cache);
        assert!(cache.get(&Request::get("/other.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_current_generation_survives_cleanup() {
        let root = unique_cache_root("gen");
        let old = DiskCache::new(&root, "v1");
        old.put(&Request::get("/a"), &ok("a")).await.unwrap();
        let current = DiskCache::new(&root, "v2");
        current
            .replace_with(&[("/b".to_string(), ok("b"))])
            .await
            .unwrap();

        assert_eq!(current.generations().await.unwrap(), vec!["v1", "v2"]);
        assert_eq!(current.delete_other_generations().await.unwrap(), vec!["v1"]);
        assert_eq!(current.generations().await.unwrap(), vec!["v2"]);
        assert!(current.get(&Request::get("/b")).await.unwrap().is_some());
    }

    #[test]
    fn redirected_or_non_get_responses_are_not_storable() {
        let mut redirected = ok("x");
        redirected.redirected = true;
        assert!(!DiskCache::is_storable(&Request::get("/"), &redirected));
        assert!(!DiskCache::is_storable(&Request::new(Method::POST, "/"), &ok("x")));
        assert!(DiskCache::is_storable(&Request::get("/"), &ok("x")));
    }
}
