use std::{env, net::SocketAddr, path::PathBuf};
use tracing::warn;
use url::Url;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKEND: &str = "http://127.0.0.1:3000";
pub const DEFAULT_CACHE_VERSION: &str = "lab-progress-v1";

/// Backend paths the core talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_prefix: String,
    pub csrf_token: String,
    pub login: String,
    pub register: String,
    pub logout: String,
    pub progress: String,
    pub reset_lab: String,
    pub leaderboard: String,
    pub preferences: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            csrf_token: "/api/csrf-token".to_string(),
            login: "/api/login".to_string(),
            register: "/api/register".to_string(),
            logout: "/api/logout".to_string(),
            progress: "/api/progress".to_string(),
            reset_lab: "/api/progress/reset".to_string(),
            leaderboard: "/api/admin/leaderboard".to_string(),
            preferences: "/api/preferences".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: Url,
    pub data_dir: PathBuf,
    pub cache_version: String,
    pub catalog_path: Option<PathBuf>,
    pub endpoints: Endpoints,
}

impl Config {
    pub fn from_env() -> Result<Self, url::ParseError> {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let backend = match env::var("BACKEND_URL").ok().map(|value| Url::parse(&value)) {
            Some(Ok(url)) => url,
            Some(Err(err)) => {
                warn!("ignoring invalid BACKEND_URL: {err}");
                Url::parse(DEFAULT_BACKEND)?
            }
            None => Url::parse(DEFAULT_BACKEND)?,
        };

        let data_dir = env::var("APP_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let cache_version = env::var("CACHE_VERSION")
            .ok()
            .filter(|value| is_valid_generation(value))
            .unwrap_or_else(|| DEFAULT_CACHE_VERSION.to_string());

        let catalog_path = env::var("CATALOG_PATH").ok().map(PathBuf::from);

        Ok(Self {
            port,
            backend,
            data_dir,
            cache_version,
            catalog_path,
            endpoints: Endpoints::default(),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Generation names become directory names, so keep them to a safe alphabet.
fn is_valid_generation(value: &str) -> bool {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !value.starts_with('.');
    if !valid {
        warn!("ignoring invalid CACHE_VERSION {value:?}");
    }
    valid
}
