pub mod app;
pub mod backend;
pub mod cache;
pub mod cache_store;
pub mod catalog;
pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod preferences;
pub mod projector;
pub mod routing;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;
pub mod transport;
pub mod ui;

pub use app::router;
pub use backend::{BackendApi, ProgressBackend};
pub use cache::{Manifest, ResourceCache};
pub use cache_store::DiskCache;
pub use catalog::Catalog;
pub use config::Config;
pub use events::{EventBus, StoreEvent};
pub use preferences::{LocalPreferences, PreferenceStore, RemotePreferences, TieredPreferences};
pub use projector::{Projector, RenderTarget};
pub use routing::RouteTable;
pub use session::SessionManager;
pub use state::{AppState, LiveView};
pub use store::ProgressStore;
pub use transport::{HttpTransport, Transport};
