use serde::{Serialize, de::DeserializeOwned};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::error;

/// Read a JSON file, falling back to the default when it is missing or unreadable.
pub async fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!(path = %path.display(), "failed to parse data file: {err}");
                T::default()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            error!(path = %path.display(), "failed to read data file: {err}");
            T::default()
        }
    }
}

pub async fn persist_json<T: Serialize>(path: &Path, data: &T) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    fs::write(path, payload).await
}
